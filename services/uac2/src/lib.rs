//! # S-UAC2: USB Audio Class 2.0 Gadget Function
//!
//! S-UAC2 is the device side of a USB Audio Class 2.0 link. It moves PCM
//! audio between the local audio subsystem and a USB host in both
//! directions while reconciling two clock domains: the local sample clock
//! and the USB frame clock.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Local Audio Subsystem                      │
//! │        open / hw_params / trigger / pointer / close         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      PcmAdapter                             │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │   Playback StreamRuntime     │    Capture StreamRuntime     │
//! │  RingCursor + DmaArea        │   RingCursor + DmaArea       │
//! │  PacingEngine                │                              │
//! │  TransferPool (8 requests)   │   TransferPool (8 requests)  │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │  AltSettingController   │  ControlRequestProcessor          │
//! │  (SET_INTERFACE)        │  (UAC2 CUR / RANGE on clocks)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │            USB gadget transport (IsoEndpoint)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! A finished isochronous request is routed back through
//! [`AudioFunction::complete`]. For playback the [`PacingEngine`] sizes
//! the next packet, the packet is copied between the staging buffer and
//! the ring, `hw_ptr` advances, the request is re-armed and, if a period
//! boundary was crossed, the bound substream is told a period elapsed.
//!
//! ## Contexts
//!
//! - **Completion context**: [`AudioFunction::complete`]. Never blocks,
//!   never allocates, holds the per-direction lock for pointer math only.
//! - **Control context**: alt-setting changes, control requests and every
//!   [`PcmAdapter`] call except `pointer`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod altset;
pub mod config;
pub mod control;
pub mod descriptors;
pub mod events;
pub mod format;
pub mod function;
pub mod pacing;
pub mod pcm;
pub mod pool;
pub mod ring;
pub mod stream;
pub mod transport;

use core::fmt;

pub use altset::{AltSettingController, InterfaceNumbers, SubInterface};
pub use config::{ClockConfig, FunctionOptions, SharedConfig, Uac2Config, SUPPORTED_RATES};
pub use control::{ControlReply, ControlRequest, ControlRequestProcessor};
pub use descriptors::{DescriptorParams, DescriptorSet, EndpointDescriptor, StringIds};
pub use events::{Clock, EventNotifier, HostEvent, HostEventSink};
pub use format::{AltFormat, PcmFormat, ALT_FORMATS};
pub use function::{AudioFunction, FunctionBinding};
pub use pacing::PacingEngine;
pub use pcm::{HwParams, PcmAdapter, PcmHardware, PcmSubstream, TriggerCommand};
pub use pool::TransferPool;
pub use ring::{CopyChunks, DmaArea, RingAdvance, RingCursor, COPY_CHUNK};
pub use stream::StreamRuntime;
pub use transport::{
    IsoEndpoint, QueueError, RequestContext, RequestStatus, TransportError, UsbRequest, UsbSpeed,
};

/// S-UAC2 version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Function name reported to the gadget core
pub const FUNCTION_NAME: &str = "uac2_func";

/// Number of isochronous requests kept in flight per direction
pub const USB_XFERS: usize = 8;

/// Page size used for PCM buffer limits
pub const PAGE_SIZE: usize = 4096;

/// Largest ring buffer the audio subsystem may request
pub const BUFF_SIZE_MAX: usize = PAGE_SIZE * 16;

/// Largest period the audio subsystem may request
pub const PRD_SIZE_MAX: usize = PAGE_SIZE;

/// Fewest periods per ring buffer
pub const MIN_PERIODS: usize = 4;

/// Debounce applied before a "stream connected" event reaches the host side
pub const UEVENT_DELAY_MS: u64 = 30;

/// Stream direction, named from the local audio subsystem's point of view.
///
/// Playback leaves the device on the IN endpoint; capture arrives from the
/// host on the OUT endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// Local audio → USB host (IN endpoint)
    Playback,
    /// USB host → local audio (OUT endpoint)
    Capture,
}

impl Direction {
    /// Both directions, playback first
    pub const ALL: [Direction; 2] = [Direction::Playback, Direction::Capture];

    /// Dense index for per-direction arrays
    pub const fn index(self) -> usize {
        match self {
            Direction::Playback => 0,
            Direction::Capture => 1,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Playback => "playback",
            Direction::Capture => "capture",
        }
    }
}

/// Errors returned by the UAC2 function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uac2Error {
    /// Unknown interface, bad alt index or malformed parameters
    InvalidArgument,
    /// Request, selector or entity the function does not implement
    NotSupported,
    /// Buffer or request allocation failed
    OutOfMemory,
    /// The host has not selected a streaming alt setting yet
    NotReady,
    /// Options cannot change while the function is bound
    Busy,
    /// Buffer geometry has not been configured
    NotConfigured,
    /// The USB transport refused an operation
    Transport(TransportError),
}

impl Uac2Error {
    /// Negative errno as expected by a gadget core
    pub const fn errno(&self) -> i32 {
        match self {
            Uac2Error::InvalidArgument => -22,
            Uac2Error::NotSupported => -95,
            Uac2Error::OutOfMemory => -12,
            Uac2Error::NotReady => -32,
            Uac2Error::Busy => -16,
            Uac2Error::NotConfigured => -19,
            Uac2Error::Transport(_) => -5,
        }
    }
}

impl fmt::Display for Uac2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uac2Error::InvalidArgument => write!(f, "invalid argument"),
            Uac2Error::NotSupported => write!(f, "operation not supported"),
            Uac2Error::OutOfMemory => write!(f, "out of memory"),
            Uac2Error::NotReady => write!(f, "host is not streaming"),
            Uac2Error::Busy => write!(f, "function is bound"),
            Uac2Error::NotConfigured => write!(f, "buffer geometry not configured"),
            Uac2Error::Transport(e) => write!(f, "transport error: {:?}", e),
        }
    }
}

impl From<TransportError> for Uac2Error {
    fn from(e: TransportError) -> Self {
        Uac2Error::Transport(e)
    }
}

/// Allocates a zero-filled byte buffer, reporting failure instead of aborting.
pub(crate) fn try_zeroed(len: usize) -> Result<alloc::vec::Vec<u8>, Uac2Error> {
    let mut buf = alloc::vec::Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Uac2Error::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_zeroed() {
        let buf = try_zeroed(64).expect("small allocation");
        assert_eq!(buf.len(), 64);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_direction_index_is_dense() {
        assert_eq!(Direction::Playback.index(), 0);
        assert_eq!(Direction::Capture.index(), 1);
        for (i, d) in Direction::ALL.iter().enumerate() {
            assert_eq!(d.index(), i);
        }
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Uac2Error::InvalidArgument.errno(), -22);
        assert_eq!(Uac2Error::NotSupported.errno(), -95);
        assert_eq!(Uac2Error::OutOfMemory.errno(), -12);
        assert_eq!(Uac2Error::NotReady.errno(), -32);
        assert_eq!(
            Uac2Error::from(TransportError::Disabled),
            Uac2Error::Transport(TransportError::Disabled)
        );
    }
}
