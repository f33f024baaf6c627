//! # PCM Adapter
//!
//! The operation set the local audio subsystem drives: open, close,
//! hw_params, hw_free, prepare, trigger and pointer, plus direct access to
//! the ring (`write_at`/`read_at`) in place of a memory mapping.
//!
//! Every call except [`PcmAdapter::pointer`] runs in the control context
//! and may overlap the completion path; shared fields are only touched
//! under the direction's lock.

use alloc::sync::Arc;
use spin::Mutex;

use crate::config::{ClockConfig, SharedConfig};
use crate::format::PcmFormat;
use crate::stream::StreamRuntime;
use crate::{Direction, Uac2Error, BUFF_SIZE_MAX, MIN_PERIODS, PRD_SIZE_MAX};

/// Most periods per ring buffer
pub const MAX_PERIODS: usize = 16;

/// A running stream of the local audio subsystem
pub trait PcmSubstream: Send + Sync {
    /// One period of audio has been consumed (playback) or produced (capture)
    fn period_elapsed(&self);

    /// The host stopped streaming; the substream must stop and report
    /// itself disconnected
    fn disconnect(&self);
}

/// Trigger commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    Start,
    Resume,
    Stop,
    Suspend,
}

impl TriggerCommand {
    /// Start and Resume bind the substream, Stop and Suspend unbind it
    pub const fn is_start(&self) -> bool {
        matches!(self, TriggerCommand::Start | TriggerCommand::Resume)
    }
}

/// Buffer geometry chosen by the audio subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwParams {
    /// Ring size in bytes
    pub buffer_bytes: usize,
    /// Period size in bytes
    pub period_bytes: usize,
}

impl HwParams {
    pub const fn periods(&self) -> usize {
        if self.period_bytes == 0 {
            0
        } else {
            self.buffer_bytes / self.period_bytes
        }
    }
}

/// What the function can carry for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmHardware {
    pub format: PcmFormat,
    pub rate_min: u32,
    pub rate_max: u32,
    pub channels_min: u32,
    pub channels_max: u32,
    pub buffer_bytes_max: usize,
    pub period_bytes_min: usize,
    pub period_bytes_max: usize,
    pub periods_min: usize,
    pub periods_max: usize,
}

impl PcmHardware {
    /// Capabilities for the configured clock.
    ///
    /// The smallest period is two max-size packets per minimum period count.
    pub fn for_clock(clock: &ClockConfig, max_packet: usize) -> Result<Self, Uac2Error> {
        let format = PcmFormat::from_clock(clock).ok_or(Uac2Error::NotSupported)?;
        Ok(Self {
            format,
            rate_min: clock.sample_rate,
            rate_max: clock.sample_rate,
            channels_min: clock.channels(),
            channels_max: clock.channels(),
            buffer_bytes_max: BUFF_SIZE_MAX,
            period_bytes_min: 2 * max_packet / MIN_PERIODS,
            period_bytes_max: PRD_SIZE_MAX,
            periods_min: MIN_PERIODS,
            periods_max: MAX_PERIODS,
        })
    }

    pub fn frame_bytes(&self) -> usize {
        self.format.bytes_per_sample() * self.channels_max as usize
    }

    /// Checks geometry against these limits
    pub fn check(&self, params: &HwParams) -> Result<(), Uac2Error> {
        let HwParams {
            buffer_bytes,
            period_bytes,
        } = *params;

        if period_bytes < self.period_bytes_min || period_bytes > self.period_bytes_max {
            return Err(Uac2Error::InvalidArgument);
        }
        if buffer_bytes == 0 || buffer_bytes > self.buffer_bytes_max {
            return Err(Uac2Error::InvalidArgument);
        }
        if buffer_bytes % period_bytes != 0 {
            return Err(Uac2Error::InvalidArgument);
        }
        let periods = params.periods();
        if periods < self.periods_min || periods > self.periods_max {
            return Err(Uac2Error::InvalidArgument);
        }
        let frame = self.frame_bytes();
        if frame == 0 || period_bytes % frame != 0 {
            return Err(Uac2Error::InvalidArgument);
        }
        Ok(())
    }
}

/// Per-direction entry point for the local audio subsystem
pub struct PcmAdapter {
    direction: Direction,
    stream: Arc<StreamRuntime>,
    config: SharedConfig,
    /// Limits handed out by the last open
    hardware: Mutex<Option<PcmHardware>>,
}

impl PcmAdapter {
    pub fn new(stream: Arc<StreamRuntime>, config: SharedConfig) -> Self {
        Self {
            direction: stream.direction(),
            stream,
            config,
            hardware: Mutex::new(None),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Opens the direction for `substream`.
    ///
    /// Fails with `NotReady` until the host has selected a streaming alt
    /// setting, and with `Busy` if a substream is already open.
    pub fn open(&self, substream: Arc<dyn PcmSubstream>) -> Result<PcmHardware, Uac2Error> {
        if self.stream.alt() == 0 {
            log::debug!("uac2: {} open refused, host not streaming", self.direction.as_str());
            return Err(Uac2Error::NotReady);
        }

        let clock = *self.config.lock().get(self.direction);
        let hw = PcmHardware::for_clock(&clock, self.stream.max_packet())?;

        self.stream.open_session(substream, hw.frame_bytes())?;
        *self.hardware.lock() = Some(hw);

        log::debug!(
            "uac2: {} open {} {} Hz x{}",
            self.direction.as_str(),
            hw.format.as_str(),
            hw.rate_max,
            hw.channels_max
        );
        Ok(hw)
    }

    pub fn close(&self) {
        self.stream.close_session();
        *self.hardware.lock() = None;
    }

    /// Binds ring geometry and allocates the ring
    pub fn hw_params(&self, params: HwParams) -> Result<(), Uac2Error> {
        let hw = (*self.hardware.lock()).ok_or(Uac2Error::NotReady)?;
        hw.check(&params)?;
        self.stream.bind_buffer(params.buffer_bytes, params.period_bytes)
    }

    /// Releases the ring
    pub fn hw_free(&self) {
        self.stream.free_buffer();
    }

    pub fn prepare(&self) -> Result<(), Uac2Error> {
        Ok(())
    }

    pub fn trigger(&self, cmd: TriggerCommand) -> Result<(), Uac2Error> {
        self.stream.trigger(cmd)
    }

    /// Current ring position in frames
    pub fn pointer(&self) -> usize {
        self.stream.pointer_frames()
    }

    /// Writes application audio into the ring at byte `offset`
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<usize, Uac2Error> {
        self.stream.write_ring(offset, data)
    }

    /// Reads captured audio from the ring at byte `offset`
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, Uac2Error> {
        self.stream.read_ring(offset, buf)
    }

    /// Limits reported by the last open
    pub fn hardware(&self) -> Option<PcmHardware> {
        *self.hardware.lock()
    }
}
