//! Test doubles for the gadget core, the audio subsystem and the clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use splax_uac2::{
    AudioFunction, Clock, EndpointDescriptor, FunctionBinding, FunctionOptions, HostEvent,
    HostEventSink, IsoEndpoint, PcmSubstream, QueueError, RequestContext, RequestStatus,
    TransportError, Uac2Error, UsbRequest, UsbSpeed,
};

/// Default interface layout: control 0, capture 1, playback 2
pub const AC_INTF: u8 = 0;
pub const CAPTURE_INTF: u8 = 1;
pub const PLAYBACK_INTF: u8 = 2;

#[derive(Default)]
struct EpState {
    enabled: bool,
    queued: VecDeque<UsbRequest>,
    /// Payload lengths in submission order
    submitted: Vec<usize>,
    /// Copy of the last submitted payload
    last_payload: Vec<u8>,
    fail_alloc_at: Option<u8>,
    refuse: Option<TransportError>,
    enables: usize,
    disables: usize,
    allocs: usize,
}

/// In-memory isochronous endpoint
pub struct MockEndpoint {
    address: u8,
    state: Mutex<EpState>,
}

impl MockEndpoint {
    pub fn new(address: u8) -> Arc<Self> {
        Arc::new(Self {
            address,
            state: Mutex::new(EpState::default()),
        })
    }

    /// Make allocation of request `slot` fail
    pub fn fail_alloc_at(&self, slot: u8) {
        self.state.lock().unwrap().fail_alloc_at = Some(slot);
    }

    pub fn clear_alloc_failure(&self) {
        self.state.lock().unwrap().fail_alloc_at = None;
    }

    /// Refuse every submission with `error`
    pub fn refuse(&self, error: Option<TransportError>) {
        self.state.lock().unwrap().refuse = error;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    pub fn queued(&self) -> usize {
        self.state.lock().unwrap().queued.len()
    }

    pub fn submitted(&self) -> Vec<usize> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn clear_submitted(&self) {
        self.state.lock().unwrap().submitted.clear();
    }

    pub fn last_payload(&self) -> Vec<u8> {
        self.state.lock().unwrap().last_payload.clone()
    }

    pub fn enables(&self) -> usize {
        self.state.lock().unwrap().enables
    }

    pub fn disables(&self) -> usize {
        self.state.lock().unwrap().disables
    }

    pub fn allocs(&self) -> usize {
        self.state.lock().unwrap().allocs
    }

    /// Takes the oldest request off the controller queue
    pub fn take_next(&self) -> Option<UsbRequest> {
        self.state.lock().unwrap().queued.pop_front()
    }

    /// Completes the oldest queued request. For an IN endpoint the whole
    /// payload counts as sent; `data` fills an OUT request.
    pub fn complete_next(&self, func: &AudioFunction, data: Option<&[u8]>) -> bool {
        let mut req = match self.take_next() {
            Some(req) => req,
            None => return false,
        };
        let actual = match data {
            Some(bytes) => {
                let n = bytes.len().min(req.capacity());
                req.buffer_mut()[..n].copy_from_slice(&bytes[..n]);
                n
            }
            None => req.length(),
        };
        req.finish(RequestStatus::Completed, actual);
        func.complete(req);
        true
    }

    /// Completes the oldest queued request with `status`
    pub fn fail_next(&self, func: &AudioFunction, status: RequestStatus) -> bool {
        let mut req = match self.take_next() {
            Some(req) => req,
            None => return false,
        };
        req.finish(status, 0);
        func.complete(req);
        true
    }
}

impl IsoEndpoint for MockEndpoint {
    fn address(&self) -> u8 {
        self.address
    }

    fn enable(&self, _desc: &EndpointDescriptor) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.enabled = true;
        state.enables += 1;
        Ok(())
    }

    fn disable(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.enabled = false;
        state.disables += 1;
        Ok(())
    }

    fn queue(&self, request: UsbRequest) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if !state.enabled {
            return Err(QueueError {
                request,
                error: TransportError::Disabled,
            });
        }
        if let Some(error) = state.refuse {
            return Err(QueueError { request, error });
        }
        state.submitted.push(request.length());
        state.last_payload = request.payload().to_vec();
        state.queued.push_back(request);
        Ok(())
    }

    fn dequeue_all(&self) -> Vec<UsbRequest> {
        let mut state = self.state.lock().unwrap();
        state
            .queued
            .drain(..)
            .map(|mut req| {
                req.finish(RequestStatus::Shutdown, 0);
                req
            })
            .collect()
    }

    fn alloc_request(&self, context: RequestContext, buf_len: usize) -> Result<UsbRequest, Uac2Error> {
        let mut state = self.state.lock().unwrap();
        state.allocs += 1;
        if state.fail_alloc_at == Some(context.slot) {
            return Err(Uac2Error::OutOfMemory);
        }
        UsbRequest::try_alloc(context, buf_len)
    }
}

/// Audio subsystem substream that counts what it is told
#[derive(Default)]
pub struct RecordingSubstream {
    periods: AtomicUsize,
    disconnected: AtomicBool,
}

impl RecordingSubstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn periods(&self) -> usize {
        self.periods.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl PcmSubstream for RecordingSubstream {
    fn period_elapsed(&self) {
        self.periods.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<HostEvent>>);

impl RecordingSink {
    pub fn take(&self) -> Vec<HostEvent> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl HostEventSink for RecordingSink {
    fn send(&self, event: HostEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A bound function with handles on every double
pub struct Harness {
    pub func: AudioFunction,
    pub options: Arc<FunctionOptions>,
    pub in_ep: Arc<MockEndpoint>,
    pub out_ep: Arc<MockEndpoint>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(speed: UsbSpeed) -> Self {
        Self::with_options(speed, Arc::new(FunctionOptions::default()))
    }

    pub fn with_options(speed: UsbSpeed, options: Arc<FunctionOptions>) -> Self {
        let in_ep = MockEndpoint::new(0x81);
        let out_ep = MockEndpoint::new(0x02);
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::default());
        let func = AudioFunction::bind(
            options.clone(),
            FunctionBinding {
                speed,
                in_ep: in_ep.clone(),
                out_ep: out_ep.clone(),
                sink: sink.clone(),
                clock: clock.clone(),
            },
        )
        .expect("bind");
        Self {
            func,
            options,
            in_ep,
            out_ep,
            sink,
            clock,
        }
    }

    /// Advances the clock and runs whatever host-event work is due
    pub fn tick_events(&self, ms: u64) -> Vec<HostEvent> {
        self.clock.advance(ms);
        self.func.run_pending_events();
        self.sink.take()
    }
}
