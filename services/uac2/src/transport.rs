//! # USB Gadget Transport
//!
//! The narrow view of the USB device controller the function needs:
//! isochronous endpoints that accept owned requests and hand them back on
//! completion.
//!
//! A [`UsbRequest`] is owned by exactly one party at a time. While it sits
//! in a [`TransferPool`](crate::TransferPool) the function owns it;
//! [`IsoEndpoint::queue`] moves it into the transport; the transport gives
//! it back either through the completion callback or through
//! [`IsoEndpoint::dequeue_all`].

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::descriptors::EndpointDescriptor;
use crate::{Direction, Uac2Error};

/// Bus speed negotiated with the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    /// 12 Mbps, 1 ms frames
    Full,
    /// 480 Mbps, 125 µs microframes
    High,
    /// 5 Gbps, 125 µs microframes
    Super,
}

impl UsbSpeed {
    /// Largest isochronous packet the streaming endpoints advertise
    pub const fn max_packet_size(self) -> u16 {
        match self {
            UsbSpeed::Full => 1023,
            UsbSpeed::High | UsbSpeed::Super => 1024,
        }
    }

    /// bInterval advertised by the streaming endpoints at this speed
    pub const fn stream_interval(self) -> u8 {
        match self {
            UsbSpeed::Full => 1,
            UsbSpeed::High | UsbSpeed::Super => 4,
        }
    }

    /// Isochronous service opportunities per second for an endpoint with
    /// the given `bInterval` (period is `2^(bInterval-1)` (micro)frames).
    pub fn packets_per_second(self, b_interval: u8) -> u32 {
        let base: u32 = match self {
            UsbSpeed::Full => 1000,
            UsbSpeed::High | UsbSpeed::Super => 8000,
        };
        let shift = b_interval.clamp(1, 16) - 1;
        (base >> shift).max(1)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UsbSpeed::Full => "Full Speed (12 Mbps)",
            UsbSpeed::High => "High Speed (480 Mbps)",
            UsbSpeed::Super => "SuperSpeed (5 Gbps)",
        }
    }
}

/// Completion status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Transfer finished
    Completed,
    /// Endpoint is going away; the request must not be re-armed
    Shutdown,
    /// Request was dequeued before it finished
    Cancelled,
    /// Any other controller-reported failure (negative errno)
    Error(i32),
}

impl RequestStatus {
    pub const fn is_ok(&self) -> bool {
        matches!(self, RequestStatus::Completed)
    }
}

/// Back-handle stored in every request at allocation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// Stream the request belongs to
    pub direction: Direction,
    /// Slot within the direction's pool
    pub slot: u8,
    /// Pool generation the request was allocated in
    pub epoch: u32,
}

/// One isochronous transfer descriptor with its staging buffer
#[derive(Debug)]
pub struct UsbRequest {
    context: RequestContext,
    buf: Box<[u8]>,
    length: usize,
    actual: usize,
    status: RequestStatus,
}

impl UsbRequest {
    /// Wraps an existing staging buffer
    pub fn new(context: RequestContext, buf: Box<[u8]>) -> Self {
        let length = buf.len();
        Self {
            context,
            buf,
            length,
            actual: 0,
            status: RequestStatus::Completed,
        }
    }

    /// Allocates a request with a zeroed staging buffer of `buf_len` bytes
    pub fn try_alloc(context: RequestContext, buf_len: usize) -> Result<Self, Uac2Error> {
        let buf = crate::try_zeroed(buf_len)?;
        Ok(Self::new(context, buf.into_boxed_slice()))
    }

    pub fn context(&self) -> RequestContext {
        self.context
    }

    /// Size of the staging buffer
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes the transport should move on the next submission
    pub fn length(&self) -> usize {
        self.length
    }

    /// Sets the submission length, clamped to the staging buffer
    pub fn set_length(&mut self, length: usize) {
        self.length = length.min(self.buf.len());
    }

    /// Bytes actually moved by the last transfer
    pub fn actual(&self) -> usize {
        self.actual
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Records a transfer result. Called by the transport.
    pub fn finish(&mut self, status: RequestStatus, actual: usize) {
        self.status = status;
        self.actual = actual.min(self.buf.len());
    }

    pub(crate) fn set_actual(&mut self, actual: usize) {
        self.actual = actual.min(self.buf.len());
    }

    /// The whole staging buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Bytes queued for the next submission
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.length]
    }
}

/// Transport-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Endpoint is disabled or shutting down
    Disabled,
    /// Controller queue is full
    Busy,
    /// Controller reported an I/O failure
    Io,
}

/// A refused submission. The request comes back to the caller.
#[derive(Debug)]
pub struct QueueError {
    pub request: UsbRequest,
    pub error: TransportError,
}

/// Isochronous endpoint provided by the USB device controller
pub trait IsoEndpoint: Send + Sync {
    /// Endpoint address including the direction bit
    fn address(&self) -> u8;

    /// Configures the endpoint for the given descriptor
    fn enable(&self, desc: &EndpointDescriptor) -> Result<(), TransportError>;

    /// Stops the endpoint. Later `queue` calls fail with `Disabled`.
    fn disable(&self) -> Result<(), TransportError>;

    /// Hands a request to the controller
    fn queue(&self, request: UsbRequest) -> Result<(), QueueError>;

    /// Synchronously withdraws every request the controller still holds.
    /// No completion fires for a withdrawn request.
    fn dequeue_all(&self) -> Vec<UsbRequest>;

    /// Allocates a request for this endpoint
    fn alloc_request(&self, context: RequestContext, buf_len: usize) -> Result<UsbRequest, Uac2Error> {
        UsbRequest::try_alloc(context, buf_len)
    }
}
