//! # Audio Function
//!
//! One bound UAC2 function instance. Owns both stream runtimes and routes
//! everything the gadget core hands it: alt-setting changes, class
//! requests, request completions and the periodic event work.
//!
//! ```text
//!  gadget core                         audio subsystem
//!      │ set_alt / setup / complete         │ pcm(dir).open / trigger / ...
//!      ▼                                    ▼
//!  ┌──────────────── AudioFunction ─────────────────┐
//!  │ AltSettingController  ControlRequestProcessor  │
//!  │ StreamRuntime[Playback]  StreamRuntime[Capture]│
//!  │ EventNotifier          PcmAdapter x2           │
//!  └────────────────────────────────────────────────┘
//! ```

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::altset::{AltSettingController, InterfaceNumbers};
use crate::config::{FunctionOptions, SharedConfig, Uac2Config};
use crate::control::{ControlReply, ControlRequest, ControlRequestProcessor};
use crate::descriptors::{self, DescriptorParams, DescriptorSet, StringIds, StringIndex};
use crate::events::{Clock, EventNotifier, HostEventSink};
use crate::pcm::PcmAdapter;
use crate::stream::StreamRuntime;
use crate::transport::{IsoEndpoint, UsbRequest, UsbSpeed};
use crate::{Direction, Uac2Error, FUNCTION_NAME};

/// Resources the gadget core provides at bind time
pub struct FunctionBinding {
    /// Negotiated link speed
    pub speed: UsbSpeed,
    /// Isochronous IN endpoint (playback)
    pub in_ep: Arc<dyn IsoEndpoint>,
    /// Isochronous OUT endpoint (capture)
    pub out_ep: Arc<dyn IsoEndpoint>,
    /// Where host events go
    pub sink: Arc<dyn HostEventSink>,
    pub clock: Arc<dyn Clock>,
}

/// A bound UAC2 function
pub struct AudioFunction {
    options: Arc<FunctionOptions>,
    config: SharedConfig,
    speed: UsbSpeed,
    descriptors: DescriptorSet,
    altset: AltSettingController,
    control: ControlRequestProcessor,
    notifier: Arc<EventNotifier>,
    pcm: [PcmAdapter; 2],
    bound: AtomicBool,
}

impl AudioFunction {
    /// Binds a function instance to `options`.
    ///
    /// The options stay locked against edits until [`AudioFunction::unbind`].
    pub fn bind(options: Arc<FunctionOptions>, binding: FunctionBinding) -> Result<Self, Uac2Error> {
        let snapshot = options.acquire();
        match Self::build(
            &options,
            snapshot.config,
            snapshot.first_interface,
            snapshot.first_string_id,
            binding,
        ) {
            Ok(f) => Ok(f),
            Err(e) => {
                options.release();
                log::error!("uac2: bind failed: {}", e);
                Err(e)
            }
        }
    }

    fn build(
        options: &Arc<FunctionOptions>,
        config: Uac2Config,
        first_interface: u8,
        first_string_id: u8,
        binding: FunctionBinding,
    ) -> Result<Self, Uac2Error> {
        config.validate()?;

        // three interfaces and the whole string table must fit in u8 ids
        if first_interface > u8::MAX - 2 {
            return Err(Uac2Error::InvalidArgument);
        }
        if first_string_id == 0
            || first_string_id as usize + StringIndex::COUNT as usize - 1 > u8::MAX as usize
        {
            return Err(Uac2Error::InvalidArgument);
        }

        let interfaces = InterfaceNumbers::consecutive(first_interface);
        let speed = binding.speed;

        let descriptors = DescriptorSet::build(&DescriptorParams {
            interfaces,
            strings: StringIds::new(first_string_id),
            in_address: binding.in_ep.address(),
            out_address: binding.out_ep.address(),
            playback_rate: config.playback.sample_rate,
            capture_rate: config.capture.sample_rate,
        });

        let playback = Arc::new(StreamRuntime::new(
            Direction::Playback,
            binding.in_ep.clone(),
            speed,
            descriptors::endpoint_descriptor(Direction::Playback, speed, binding.in_ep.address()),
        ));
        let capture = Arc::new(StreamRuntime::new(
            Direction::Capture,
            binding.out_ep.clone(),
            speed,
            descriptors::endpoint_descriptor(Direction::Capture, speed, binding.out_ep.address()),
        ));

        let shared: SharedConfig = Arc::new(Mutex::new(config));
        let notifier = Arc::new(EventNotifier::new(binding.sink, binding.clock));

        let altset = AltSettingController::new(
            interfaces,
            shared.clone(),
            [playback.clone(), capture.clone()],
            notifier.clone(),
        );
        let control = ControlRequestProcessor::new(shared.clone(), interfaces.control);
        let pcm = [
            PcmAdapter::new(playback, shared.clone()),
            PcmAdapter::new(capture, shared.clone()),
        ];

        log::info!(
            "uac2: {} bound at {} speed, interfaces {}-{}",
            FUNCTION_NAME,
            speed.as_str(),
            interfaces.control,
            interfaces.stream_in
        );

        Ok(Self {
            options: options.clone(),
            config: shared,
            speed,
            descriptors,
            altset,
            control,
            notifier,
            pcm,
            bound: AtomicBool::new(true),
        })
    }

    /// Stops both streams, frees the rings and releases the options.
    /// Safe to call more than once.
    pub fn unbind(&self) {
        if !self.bound.swap(false, Ordering::AcqRel) {
            return;
        }
        self.altset.disable();
        for pcm in self.pcm.iter() {
            pcm.close();
            pcm.hw_free();
        }
        self.options.release();
        log::info!("uac2: {} unbound", FUNCTION_NAME);
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub fn speed(&self) -> UsbSpeed {
        self.speed
    }

    pub fn interfaces(&self) -> InterfaceNumbers {
        self.altset.interfaces()
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    /// Live clock configuration
    pub fn config(&self) -> Uac2Config {
        *self.config.lock()
    }

    // =========================================================================
    // Gadget Core Side
    // =========================================================================

    pub fn set_alt(&self, intf: u8, alt: u8) -> Result<(), Uac2Error> {
        if !self.is_bound() {
            return Err(Uac2Error::NotConfigured);
        }
        self.altset.set_alt(intf, alt)
    }

    pub fn get_alt(&self, intf: u8) -> Result<u8, Uac2Error> {
        self.altset.get_alt(intf)
    }

    /// The host dropped the configuration
    pub fn disable(&self) {
        self.altset.disable();
    }

    /// Class request setup stage
    pub fn setup(&self, req: &ControlRequest) -> Result<ControlReply, Uac2Error> {
        self.control.setup(req)
    }

    /// Class request data stage
    pub fn control_data_stage(&self, payload: &[u8]) -> Result<(), Uac2Error> {
        self.control.complete_data_stage(payload)
    }

    pub fn control_cancel(&self) {
        self.control.cancel_data_stage();
    }

    /// Completion callback for every request this function submitted
    pub fn complete(&self, req: UsbRequest) {
        self.altset.stream(req.context().direction).complete(req);
    }

    /// Runs due host-event work. The caller arranges to be called again by
    /// [`AudioFunction::next_event_deadline`].
    pub fn run_pending_events(&self) -> usize {
        self.notifier.run_pending(|direction| self.altset.current_alt(direction))
    }

    pub fn next_event_deadline(&self) -> Option<u64> {
        self.notifier.next_deadline()
    }

    // =========================================================================
    // Audio Subsystem Side
    // =========================================================================

    pub fn pcm(&self, direction: Direction) -> &PcmAdapter {
        &self.pcm[direction.index()]
    }

    pub fn stream(&self, direction: Direction) -> &Arc<StreamRuntime> {
        self.altset.stream(direction)
    }
}

impl Drop for AudioFunction {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HostEvent;
    use crate::transport::{QueueError, TransportError};
    use alloc::vec::Vec;

    struct NullEp(u8);

    impl IsoEndpoint for NullEp {
        fn address(&self) -> u8 {
            self.0
        }
        fn enable(&self, _desc: &descriptors::EndpointDescriptor) -> Result<(), TransportError> {
            Ok(())
        }
        fn disable(&self) -> Result<(), TransportError> {
            Ok(())
        }
        fn queue(&self, request: UsbRequest) -> Result<(), QueueError> {
            Err(QueueError {
                request,
                error: TransportError::Disabled,
            })
        }
        fn dequeue_all(&self) -> Vec<UsbRequest> {
            Vec::new()
        }
    }

    struct NullSink;

    impl HostEventSink for NullSink {
        fn send(&self, _event: HostEvent) {}
    }

    struct ZeroClock;

    impl Clock for ZeroClock {
        fn now_ms(&self) -> u64 {
            0
        }
    }

    fn binding() -> FunctionBinding {
        FunctionBinding {
            speed: UsbSpeed::High,
            in_ep: Arc::new(NullEp(0x81)),
            out_ep: Arc::new(NullEp(0x01)),
            sink: Arc::new(NullSink),
            clock: Arc::new(ZeroClock),
        }
    }

    #[test]
    fn test_bind_locks_options() {
        let options = Arc::new(FunctionOptions::default());
        let f = AudioFunction::bind(options.clone(), binding()).unwrap();
        assert!(options.is_bound());
        assert_eq!(options.set_first_interface(3), Err(Uac2Error::Busy));

        f.unbind();
        assert!(!options.is_bound());
        f.unbind();
        assert!(!options.is_bound());
        assert!(options.set_first_interface(3).is_ok());
    }

    #[test]
    fn test_bind_rejects_string_overflow() {
        let options = Arc::new(FunctionOptions::default());
        options.set_first_string_id(250).unwrap();
        assert!(matches!(
            AudioFunction::bind(options.clone(), binding()),
            Err(Uac2Error::InvalidArgument)
        ));
        assert!(!options.is_bound());
    }

    #[test]
    fn test_interfaces_follow_options() {
        let options = Arc::new(FunctionOptions::default());
        options.set_first_interface(2).unwrap();
        let f = AudioFunction::bind(options, binding()).unwrap();
        assert_eq!(f.interfaces(), InterfaceNumbers::consecutive(2));
        assert_eq!(f.get_alt(2), Ok(0));
        assert_eq!(f.get_alt(5), Err(Uac2Error::InvalidArgument));
    }

    #[test]
    fn test_set_alt_after_unbind() {
        let f = AudioFunction::bind(Arc::new(FunctionOptions::default()), binding()).unwrap();
        f.unbind();
        assert_eq!(f.set_alt(1, 1), Err(Uac2Error::NotConfigured));
    }
}
