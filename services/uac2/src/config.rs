//! Per-direction clock configuration and function options.
//!
//! The live [`Uac2Config`] sits behind one [`spin::Mutex`] shared by the
//! control-request processor (writer) and the alt-setting controller and
//! PCM adapter (readers).

use alloc::sync::Arc;
use spin::Mutex;

use crate::{Direction, Uac2Error};

/// Sample rates a clock source can be set to
pub const SUPPORTED_RATES: [u32; 2] = [44100, 48000];

/// Default channel mask: front left + front right
pub const DEFAULT_CHANNEL_MASK: u32 = 0x3;

/// Default sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default subslot size in bytes
pub const DEFAULT_SUBSLOT_BYTES: u8 = 2;

/// Default sample resolution in bits
pub const DEFAULT_RESOLUTION_BITS: u8 = 16;

/// Maximum channels per stream
pub const MAX_CHANNELS: u32 = 2;

/// Clock and sample layout of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Significant bits per sample
    pub sample_resolution_bits: u8,
    /// Bytes each sample occupies on the wire
    pub subslot_bytes: u8,
    /// Spatial channel bitmap
    pub channel_mask: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            sample_resolution_bits: DEFAULT_RESOLUTION_BITS,
            subslot_bytes: DEFAULT_SUBSLOT_BYTES,
            channel_mask: DEFAULT_CHANNEL_MASK,
        }
    }
}

impl ClockConfig {
    /// Number of channels (popcount of the mask)
    pub const fn channels(&self) -> u32 {
        self.channel_mask.count_ones()
    }

    /// Bytes per frame (all channels)
    pub const fn frame_bytes(&self) -> usize {
        self.subslot_bytes as usize * self.channels() as usize
    }

    pub fn validate(&self) -> Result<(), Uac2Error> {
        if !is_supported_rate(self.sample_rate) {
            return Err(Uac2Error::InvalidArgument);
        }
        if !(1..=4).contains(&self.subslot_bytes) {
            return Err(Uac2Error::InvalidArgument);
        }
        if self.sample_resolution_bits == 0
            || self.sample_resolution_bits as u32 > self.subslot_bytes as u32 * 8
        {
            return Err(Uac2Error::InvalidArgument);
        }
        let channels = self.channels();
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(Uac2Error::InvalidArgument);
        }
        Ok(())
    }
}

/// Returns true if a clock source may be set to `rate`
pub fn is_supported_rate(rate: u32) -> bool {
    SUPPORTED_RATES.contains(&rate)
}

/// Configuration of both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Uac2Config {
    /// Local audio → host (IN endpoint, clock entity 10)
    pub playback: ClockConfig,
    /// Host → local audio (OUT endpoint, clock entity 9)
    pub capture: ClockConfig,
}

impl Uac2Config {
    pub fn get(&self, direction: Direction) -> &ClockConfig {
        match direction {
            Direction::Playback => &self.playback,
            Direction::Capture => &self.capture,
        }
    }

    pub fn get_mut(&mut self, direction: Direction) -> &mut ClockConfig {
        match direction {
            Direction::Playback => &mut self.playback,
            Direction::Capture => &mut self.capture,
        }
    }

    pub fn validate(&self) -> Result<(), Uac2Error> {
        self.playback.validate()?;
        self.capture.validate()
    }
}

/// Live configuration shared across contexts
pub type SharedConfig = Arc<Mutex<Uac2Config>>;

// =============================================================================
// Function Options
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct OptionsState {
    config: Uac2Config,
    first_interface: u8,
    first_string_id: u8,
    refcnt: usize,
}

/// Values a function instance is created from.
///
/// Options are writable until a function binds to them; while any bound
/// instance holds them every setter fails with [`Uac2Error::Busy`].
#[derive(Debug)]
pub struct FunctionOptions {
    state: Mutex<OptionsState>,
}

/// Options captured at bind time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionsSnapshot {
    pub config: Uac2Config,
    pub first_interface: u8,
    pub first_string_id: u8,
}

impl Default for FunctionOptions {
    fn default() -> Self {
        Self::new(Uac2Config::default())
    }
}

impl FunctionOptions {
    pub fn new(config: Uac2Config) -> Self {
        Self {
            state: Mutex::new(OptionsState {
                config,
                first_interface: 0,
                first_string_id: 1,
                refcnt: 0,
            }),
        }
    }

    /// Current configuration
    pub fn config(&self) -> Uac2Config {
        self.state.lock().config
    }

    /// Edits the configuration in place. The edit is dropped if it leaves
    /// the configuration invalid.
    pub fn update<F>(&self, f: F) -> Result<(), Uac2Error>
    where
        F: FnOnce(&mut Uac2Config),
    {
        let mut state = self.state.lock();
        if state.refcnt > 0 {
            return Err(Uac2Error::Busy);
        }
        let mut next = state.config;
        f(&mut next);
        next.validate()?;
        state.config = next;
        Ok(())
    }

    pub fn set_first_interface(&self, intf: u8) -> Result<(), Uac2Error> {
        let mut state = self.state.lock();
        if state.refcnt > 0 {
            return Err(Uac2Error::Busy);
        }
        state.first_interface = intf;
        Ok(())
    }

    pub fn set_first_string_id(&self, id: u8) -> Result<(), Uac2Error> {
        let mut state = self.state.lock();
        if state.refcnt > 0 {
            return Err(Uac2Error::Busy);
        }
        if id == 0 {
            return Err(Uac2Error::InvalidArgument);
        }
        state.first_string_id = id;
        Ok(())
    }

    /// True while at least one function is bound to these options
    pub fn is_bound(&self) -> bool {
        self.state.lock().refcnt > 0
    }

    pub(crate) fn acquire(&self) -> OptionsSnapshot {
        let mut state = self.state.lock();
        state.refcnt += 1;
        OptionsSnapshot {
            config: state.config,
            first_interface: state.first_interface,
            first_string_id: state.first_string_id,
        }
    }

    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        state.refcnt = state.refcnt.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Uac2Config::default();
        assert_eq!(cfg.playback.sample_rate, 48000);
        assert_eq!(cfg.capture.channels(), 2);
        assert_eq!(cfg.playback.frame_bytes(), 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut c = ClockConfig::default();
        c.sample_rate = 96000;
        assert_eq!(c.validate(), Err(Uac2Error::InvalidArgument));

        let mut c = ClockConfig::default();
        c.subslot_bytes = 5;
        assert_eq!(c.validate(), Err(Uac2Error::InvalidArgument));

        let mut c = ClockConfig::default();
        c.sample_resolution_bits = 24;
        assert_eq!(c.validate(), Err(Uac2Error::InvalidArgument));

        let mut c = ClockConfig::default();
        c.channel_mask = 0;
        assert_eq!(c.validate(), Err(Uac2Error::InvalidArgument));

        c.channel_mask = 0x7;
        assert_eq!(c.validate(), Err(Uac2Error::InvalidArgument));
    }

    #[test]
    fn test_options_busy_while_bound() {
        let opts = FunctionOptions::default();
        opts.update(|c| c.capture.sample_rate = 44100).unwrap();
        assert_eq!(opts.config().capture.sample_rate, 44100);

        let snap = opts.acquire();
        assert_eq!(snap.config.capture.sample_rate, 44100);
        assert!(opts.is_bound());
        assert_eq!(opts.set_first_interface(3), Err(Uac2Error::Busy));
        assert_eq!(
            opts.update(|c| c.playback.sample_rate = 44100),
            Err(Uac2Error::Busy)
        );

        opts.release();
        assert!(opts.set_first_interface(3).is_ok());
    }

    #[test]
    fn test_invalid_update_is_dropped() {
        let opts = FunctionOptions::default();
        assert_eq!(
            opts.update(|c| c.playback.sample_rate = 8000),
            Err(Uac2Error::InvalidArgument)
        );
        assert_eq!(opts.config(), Uac2Config::default());
    }
}
