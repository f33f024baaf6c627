//! # Alt-Setting Controller
//!
//! Maps SET_INTERFACE onto stream start and stop.
//!
//! ```text
//!               set_alt(k)                     set_alt(0)
//!   Inactive ───────────────▶ Active(k) ──────────────────▶ Inactive
//!                               │  ▲
//!                   set_alt(k') │  │ teardown + reprovision
//!                               └──┘
//! ```
//!
//! The control interface only has alt 0.

use alloc::sync::Arc;

use crate::config::SharedConfig;
use crate::events::EventNotifier;
use crate::format::AltFormat;
use crate::stream::StreamRuntime;
use crate::{Direction, Uac2Error};

/// Interface numbers assigned at bind time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceNumbers {
    /// Audio control
    pub control: u8,
    /// Audio streaming, host → device (capture)
    pub stream_out: u8,
    /// Audio streaming, device → host (playback)
    pub stream_in: u8,
}

impl InterfaceNumbers {
    /// Three consecutive interfaces starting at `first`
    pub const fn consecutive(first: u8) -> Self {
        Self {
            control: first,
            stream_out: first.wrapping_add(1),
            stream_in: first.wrapping_add(2),
        }
    }

    pub fn classify(&self, intf: u8) -> Option<SubInterface> {
        if intf == self.control {
            Some(SubInterface::Control)
        } else if intf == self.stream_out {
            Some(SubInterface::Stream(Direction::Capture))
        } else if intf == self.stream_in {
            Some(SubInterface::Stream(Direction::Playback))
        } else {
            None
        }
    }
}

/// One of the function's three interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubInterface {
    Control,
    Stream(Direction),
}

/// Alt-setting state machine for both streaming interfaces
pub struct AltSettingController {
    interfaces: InterfaceNumbers,
    config: SharedConfig,
    streams: [Arc<StreamRuntime>; 2],
    notifier: Arc<EventNotifier>,
}

impl AltSettingController {
    /// `streams` is indexed by [`Direction::index`]
    pub fn new(
        interfaces: InterfaceNumbers,
        config: SharedConfig,
        streams: [Arc<StreamRuntime>; 2],
        notifier: Arc<EventNotifier>,
    ) -> Self {
        Self {
            interfaces,
            config,
            streams,
            notifier,
        }
    }

    pub fn interfaces(&self) -> InterfaceNumbers {
        self.interfaces
    }

    pub fn stream(&self, direction: Direction) -> &Arc<StreamRuntime> {
        &self.streams[direction.index()]
    }

    /// Handles SET_INTERFACE
    pub fn set_alt(&self, intf: u8, alt: u8) -> Result<(), Uac2Error> {
        let direction = match self.interfaces.classify(intf) {
            Some(SubInterface::Control) if alt == 0 => return Ok(()),
            Some(SubInterface::Control) => {
                log::error!("uac2: control interface has no alt {}", alt);
                return Err(Uac2Error::InvalidArgument);
            }
            Some(SubInterface::Stream(direction)) => direction,
            None => {
                log::error!("uac2: set_alt on unknown interface {}", intf);
                return Err(Uac2Error::InvalidArgument);
            }
        };

        let format = match alt {
            0 => None,
            k => match AltFormat::lookup(k) {
                Some(f) => Some(f),
                None => {
                    log::error!("uac2: {} alt {} out of range", direction.as_str(), k);
                    return Err(Uac2Error::InvalidArgument);
                }
            },
        };

        let stream = self.stream(direction);
        let was_active = stream.alt() != 0 || stream.is_enabled();
        if was_active {
            // the session is gone whether or not an alt follows
            stream.deactivate();
            self.notifier.schedule_disconnect(direction);
        }

        let format = match format {
            Some(f) => f,
            None => return Ok(()),
        };

        let clock = {
            let mut config = self.config.lock();
            let clock = config.get_mut(direction);
            format.apply(clock);
            *clock
        };

        if let Err(e) = stream.activate(alt, &clock) {
            log::error!(
                "uac2: {} alt {} activation failed: {}",
                direction.as_str(),
                alt,
                e
            );
            return Err(e);
        }

        self.notifier.schedule_connect(direction);
        Ok(())
    }

    /// Handles GET_INTERFACE
    pub fn get_alt(&self, intf: u8) -> Result<u8, Uac2Error> {
        match self.interfaces.classify(intf) {
            Some(SubInterface::Control) => Ok(0),
            Some(SubInterface::Stream(direction)) => Ok(self.current_alt(direction)),
            None => {
                log::error!("uac2: get_alt on unknown interface {}", intf);
                Err(Uac2Error::InvalidArgument)
            }
        }
    }

    pub fn current_alt(&self, direction: Direction) -> u8 {
        self.stream(direction).alt()
    }

    /// The configuration went away: stop both streams
    pub fn disable(&self) {
        for direction in Direction::ALL {
            self.stream(direction).deactivate();
        }
        self.notifier.cable_disconnected();
    }
}
