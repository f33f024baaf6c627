//! # Transfer Pool
//!
//! A fixed set of isochronous requests per direction. The set is allocated
//! once when the host selects a streaming alt setting and dropped when it
//! deselects it; requests are never allocated per packet.
//!
//! ```text
//!             provision              submit_all
//!   (empty) ────────────▶ idle[N] ─────────────▶ transport (in flight)
//!                            ▲                       │
//!                            │ park (refused/stale)  │ complete → rearm
//!                            └───────────────────────┘
//! ```
//!
//! Every request is owned by exactly one of: the idle list, the transport,
//! or the completion routine currently handling it.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use spin::Mutex;

use crate::transport::{IsoEndpoint, QueueError, RequestContext, TransportError, UsbRequest};
use crate::{Direction, Uac2Error};

/// Bounded request pool for one direction
pub struct TransferPool {
    direction: Direction,
    /// Number of requests provisioned per activation
    depth: usize,
    /// Requests held by the function (not queued)
    idle: Mutex<Vec<UsbRequest>>,
    /// Requests currently owned by the transport
    in_flight: AtomicUsize,
    /// Requests alive in total (idle + in flight + being completed)
    allocated: AtomicUsize,
    /// Bumped by every withdraw; requests of older generations are stale
    epoch: AtomicU32,
}

impl TransferPool {
    pub const fn new(direction: Direction, depth: usize) -> Self {
        Self {
            direction,
            depth,
            idle: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
            epoch: AtomicU32::new(0),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Allocates `depth` requests with `buf_len`-byte staging buffers.
    ///
    /// Either all requests are allocated or none are: on failure the
    /// partial set is dropped and `OutOfMemory` is returned.
    pub fn provision(
        &self,
        ep: &dyn IsoEndpoint,
        buf_len: usize,
        initial_len: usize,
    ) -> Result<(), Uac2Error> {
        let mut reqs: Vec<UsbRequest> = Vec::new();
        reqs.try_reserve_exact(self.depth)
            .map_err(|_| Uac2Error::OutOfMemory)?;

        let epoch = self.epoch.load(Ordering::Acquire);
        for slot in 0..self.depth {
            let ctx = RequestContext {
                direction: self.direction,
                slot: slot as u8,
                epoch,
            };
            let mut req = match ep.alloc_request(ctx, buf_len) {
                Ok(req) => req,
                Err(e) => {
                    log::warn!(
                        "uac2: {} request {} allocation failed, rolling back {} requests",
                        self.direction.as_str(),
                        slot,
                        reqs.len()
                    );
                    return Err(e);
                }
            };
            req.set_length(initial_len);
            reqs.push(req);
        }

        let stale = core::mem::replace(&mut *self.idle.lock(), reqs);
        self.allocated.store(self.depth, Ordering::Release);
        drop(stale);
        Ok(())
    }

    /// Queues every idle request. Refused requests stay idle.
    ///
    /// Returns the number of requests the transport accepted.
    pub fn submit_all(&self, ep: &dyn IsoEndpoint) -> usize {
        let pending: Vec<UsbRequest> = {
            let mut idle = self.idle.lock();
            let n = idle.len();
            idle.drain(..n).collect()
        };

        let mut accepted = 0;
        for req in pending {
            if self.queue(ep, req) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Re-submits a request that just completed.
    ///
    /// Never allocates. A refused request is parked until the next
    /// withdraw, or dropped if the endpoint is disabled.
    pub fn rearm(&self, ep: &dyn IsoEndpoint, req: UsbRequest) -> bool {
        self.queue(ep, req)
    }

    fn queue(&self, ep: &dyn IsoEndpoint, req: UsbRequest) -> bool {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        match ep.queue(req) {
            Ok(()) => true,
            Err(QueueError { request, error }) => {
                self.completed();
                let slot = request.context().slot;
                if error == TransportError::Disabled {
                    log::debug!(
                        "uac2: {} request {} not queued, endpoint disabled",
                        self.direction.as_str(),
                        slot
                    );
                    self.discard(request);
                } else {
                    log::error!(
                        "uac2: {} request {} re-queue failed: {:?}",
                        self.direction.as_str(),
                        slot,
                        error
                    );
                    self.park(request);
                }
                false
            }
        }
    }

    /// Marks one request as handed back by the transport.
    ///
    /// Saturates at zero: a withdraw may already have reset the count.
    pub fn completed(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Holds a request without queueing it
    pub fn park(&self, req: UsbRequest) {
        let mut idle = self.idle.lock();
        if idle.len() < idle.capacity() {
            idle.push(req);
        } else {
            drop(idle);
            self.discard(req);
        }
    }

    fn discard(&self, req: UsbRequest) {
        let _ = self
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        drop(req);
    }

    /// Takes every request back from the transport and frees the pool.
    ///
    /// The endpoint must already refuse new submissions. Returns the number
    /// of requests withdrawn from the transport.
    pub fn withdraw(&self, ep: &dyn IsoEndpoint) -> usize {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let returned = ep.dequeue_all();
        let withdrawn = returned.len();
        for _ in 0..withdrawn {
            self.completed();
        }
        drop(returned);

        let idle = core::mem::take(&mut *self.idle.lock());
        drop(idle);

        self.in_flight.store(0, Ordering::Release);
        self.allocated.store(0, Ordering::Release);
        withdrawn
    }

    /// Zeroes the staging buffers of idle requests
    pub fn zero_idle(&self) {
        for req in self.idle.lock().iter_mut() {
            req.buffer_mut().fill(0);
        }
    }

    /// False for a request allocated before the last withdraw
    pub fn is_current(&self, req: &UsbRequest) -> bool {
        req.context().epoch == self.epoch.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::EndpointDescriptor;
    use core::sync::atomic::AtomicBool;

    struct FakeEp {
        queued: Mutex<Vec<UsbRequest>>,
        disabled: AtomicBool,
        fail_alloc_at: Option<u8>,
    }

    impl FakeEp {
        fn new(fail_alloc_at: Option<u8>) -> Self {
            Self {
                queued: Mutex::new(Vec::new()),
                disabled: AtomicBool::new(false),
                fail_alloc_at,
            }
        }
    }

    impl IsoEndpoint for FakeEp {
        fn address(&self) -> u8 {
            0x81
        }
        fn enable(&self, _desc: &EndpointDescriptor) -> Result<(), TransportError> {
            self.disabled.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn disable(&self) -> Result<(), TransportError> {
            self.disabled.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn queue(&self, request: UsbRequest) -> Result<(), QueueError> {
            if self.disabled.load(Ordering::SeqCst) {
                return Err(QueueError { request, error: TransportError::Disabled });
            }
            self.queued.lock().push(request);
            Ok(())
        }
        fn dequeue_all(&self) -> Vec<UsbRequest> {
            core::mem::take(&mut *self.queued.lock())
        }
        fn alloc_request(&self, ctx: RequestContext, len: usize) -> Result<UsbRequest, Uac2Error> {
            if Some(ctx.slot) == self.fail_alloc_at {
                return Err(Uac2Error::OutOfMemory);
            }
            UsbRequest::try_alloc(ctx, len)
        }
    }

    #[test]
    fn test_provision_and_submit() {
        let ep = FakeEp::new(None);
        let pool = TransferPool::new(Direction::Capture, 8);
        pool.provision(&ep, 1024, 1024).unwrap();
        assert_eq!(pool.idle_len(), 8);

        assert_eq!(pool.submit_all(&ep), 8);
        assert_eq!(pool.in_flight(), 8);
        assert_eq!(pool.idle_len(), 0);

        let slots: Vec<u8> = ep.queued.lock().iter().map(|r| r.context().slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_provision_rolls_back() {
        let ep = FakeEp::new(Some(5));
        let pool = TransferPool::new(Direction::Playback, 8);
        assert_eq!(pool.provision(&ep, 1024, 192), Err(Uac2Error::OutOfMemory));
        assert_eq!(pool.idle_len(), 0);
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_withdraw_empties_everything() {
        let ep = FakeEp::new(None);
        let pool = TransferPool::new(Direction::Playback, 8);
        pool.provision(&ep, 1024, 192).unwrap();
        pool.submit_all(&ep);

        ep.disable().unwrap();
        assert_eq!(pool.withdraw(&ep), 8);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.allocated(), 0);
        assert!(ep.queued.lock().is_empty());
    }

    #[test]
    fn test_rearm_on_disabled_endpoint_drops() {
        let ep = FakeEp::new(None);
        let pool = TransferPool::new(Direction::Playback, 2);
        pool.provision(&ep, 64, 64).unwrap();
        pool.submit_all(&ep);

        let req = ep.queued.lock().pop().unwrap();
        pool.completed();
        ep.disable().unwrap();
        assert!(!pool.rearm(&ep, req));
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn test_withdraw_makes_requests_stale() {
        let ep = FakeEp::new(None);
        let pool = TransferPool::new(Direction::Capture, 2);
        pool.provision(&ep, 64, 64).unwrap();
        pool.submit_all(&ep);

        // one request is in the middle of completing when teardown runs
        let late = ep.queued.lock().pop().unwrap();
        assert!(pool.is_current(&late));
        ep.disable().unwrap();
        assert_eq!(pool.withdraw(&ep), 1);
        assert!(!pool.is_current(&late));

        ep.enable(&crate::descriptors::endpoint_descriptor(
            Direction::Capture,
            crate::transport::UsbSpeed::High,
            0x01,
        ))
        .unwrap();
        pool.provision(&ep, 64, 64).unwrap();
        assert!(!pool.is_current(&late));
    }
}
