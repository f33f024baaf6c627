//! # Stream Runtime
//!
//! Everything one direction owns: the endpoint, its request pool, the ring
//! and the pacing state, and the completion path tying them together.
//!
//! ## Locking
//!
//! ```text
//! state (spin)  hw_ptr, geometry, bound substream, pacing   O(1) hold
//! dma   (spin)  ring storage                                one chunk per hold
//! pool.idle     parked requests                             push/pop only
//! ```
//!
//! `state` is never held while `dma` is taken. The two directions share
//! nothing.
//!
//! ## Teardown
//!
//! 1. `ep_enabled` cleared: completions that race in are parked untouched
//! 2. endpoint disabled: the transport refuses new submissions
//! 3. `dequeue_all`: every outstanding request comes back
//! 4. pool freed
//!
//! Only after 3 may the ring be released. A request the controller was
//! completing while 3 ran comes back with an old pool epoch and is dropped.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use spin::Mutex;

use crate::config::ClockConfig;
use crate::descriptors::EndpointDescriptor;
use crate::pacing::PacingEngine;
use crate::pcm::{PcmSubstream, TriggerCommand};
use crate::pool::TransferPool;
use crate::ring::{CopyChunks, DmaArea, RingCursor, COPY_CHUNK};
use crate::transport::{IsoEndpoint, RequestStatus, UsbRequest, UsbSpeed};
use crate::{Direction, Uac2Error, USB_XFERS};

/// Fields shared between the completion path and the control context
struct StreamState {
    cursor: RingCursor,
    /// Substream bound by trigger(start); completions only touch the ring
    /// while this is set
    bound: Option<Arc<dyn PcmSubstream>>,
    /// Substream opened by the audio subsystem
    session: Option<Arc<dyn PcmSubstream>>,
    /// Bytes per frame of the open session
    frame_bytes: usize,
    pacing: PacingEngine,
}

/// Per-direction streaming state
pub struct StreamRuntime {
    direction: Direction,
    endpoint: Arc<dyn IsoEndpoint>,
    speed: UsbSpeed,
    desc: EndpointDescriptor,
    /// Cleared before teardown so late completions back off
    ep_enabled: AtomicBool,
    /// Alt setting currently selected by the host
    alt: AtomicU8,
    state: Mutex<StreamState>,
    dma: Mutex<DmaArea>,
    pool: TransferPool,
}

impl StreamRuntime {
    pub fn new(
        direction: Direction,
        endpoint: Arc<dyn IsoEndpoint>,
        speed: UsbSpeed,
        desc: EndpointDescriptor,
    ) -> Self {
        Self {
            direction,
            endpoint,
            speed,
            desc,
            ep_enabled: AtomicBool::new(false),
            alt: AtomicU8::new(0),
            state: Mutex::new(StreamState {
                cursor: RingCursor::new(),
                bound: None,
                session: None,
                frame_bytes: 0,
                pacing: PacingEngine::new(),
            }),
            dma: Mutex::new(DmaArea::new()),
            pool: TransferPool::new(direction, USB_XFERS),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn speed(&self) -> UsbSpeed {
        self.speed
    }

    pub fn endpoint_descriptor(&self) -> &EndpointDescriptor {
        &self.desc
    }

    /// Largest packet the endpoint carries
    pub fn max_packet(&self) -> usize {
        self.desc.max_packet_size as usize
    }

    pub fn alt(&self) -> u8 {
        self.alt.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.ep_enabled.load(Ordering::Acquire)
    }

    pub fn pool(&self) -> &TransferPool {
        &self.pool
    }

    /// Requests currently owned by the transport
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    // =========================================================================
    // Activation
    // =========================================================================

    /// Starts streaming with the format of `alt`.
    ///
    /// On failure nothing stays armed: the pool is empty and the endpoint
    /// is disabled.
    pub fn activate(&self, alt: u8, clock: &ClockConfig) -> Result<(), Uac2Error> {
        let max_packet = self.max_packet();
        let initial_len = match self.direction {
            Direction::Playback => {
                let mut state = self.state.lock();
                state.pacing.configure(
                    clock.sample_rate,
                    clock.frame_bytes(),
                    self.desc.packets_per_second(self.speed),
                    max_packet,
                );
                state.pacing.packet_size()
            }
            Direction::Capture => max_packet,
        };

        self.endpoint.enable(&self.desc)?;

        if let Err(e) = self.pool.provision(&*self.endpoint, max_packet, initial_len) {
            if let Err(te) = self.endpoint.disable() {
                log::warn!("uac2: {} endpoint disable failed: {:?}", self.direction.as_str(), te);
            }
            return Err(e);
        }

        self.alt.store(alt, Ordering::Release);
        self.ep_enabled.store(true, Ordering::Release);

        let queued = self.pool.submit_all(&*self.endpoint);
        log::debug!(
            "uac2: {} alt {} active, {} Hz, {} bytes/frame, {}/{} requests queued",
            self.direction.as_str(),
            alt,
            clock.sample_rate,
            clock.frame_bytes(),
            queued,
            self.pool.depth()
        );
        Ok(())
    }

    /// Stops streaming and takes every request back from the transport.
    ///
    /// An open session is disconnected first. Returns the number of
    /// requests withdrawn.
    pub fn deactivate(&self) -> usize {
        self.alt.store(0, Ordering::Release);
        let was_enabled = self.ep_enabled.swap(false, Ordering::AcqRel);

        let session = {
            let mut state = self.state.lock();
            state.bound = None;
            state.session.clone()
        };
        if let Some(ss) = session {
            ss.disconnect();
        }

        if !was_enabled {
            return 0;
        }

        if let Err(e) = self.endpoint.disable() {
            log::warn!("uac2: {} endpoint disable failed: {:?}", self.direction.as_str(), e);
        }
        let withdrawn = self.pool.withdraw(&*self.endpoint);
        log::debug!(
            "uac2: {} inactive, {} requests withdrawn",
            self.direction.as_str(),
            withdrawn
        );
        withdrawn
    }

    /// Snapshot of the pacing state
    pub fn pacing(&self) -> PacingEngine {
        self.state.lock().pacing
    }

    // =========================================================================
    // Completion Path
    // =========================================================================

    /// Handles a request handed back by the transport.
    ///
    /// Runs in completion context: no allocation, no blocking, the state
    /// lock is held for pointer math only.
    pub fn complete(&self, mut req: UsbRequest) {
        if !self.pool.is_current(&req) {
            // withdrawn while completing; already uncounted
            log::debug!(
                "uac2: {} stale request {} dropped",
                self.direction.as_str(),
                req.context().slot
            );
            return;
        }
        self.pool.completed();
        let status = req.status();

        if !self.ep_enabled.load(Ordering::Acquire) || status == RequestStatus::Shutdown {
            self.pool.park(req);
            return;
        }

        if !status.is_ok() {
            log::debug!(
                "uac2: {} iso completion status {:?} {}/{}",
                self.direction.as_str(),
                status,
                req.actual(),
                req.length()
            );
        }

        let (advance, substream) = {
            let mut state = self.state.lock();
            if self.direction == Direction::Playback {
                let len = state.pacing.next_packet_len();
                req.set_length(len);
                let len = req.length();
                req.set_actual(len);
            }
            match state.bound.clone() {
                Some(ss) => (Some(state.cursor.advance(req.actual())), Some(ss)),
                None => (None, None),
            }
        };

        match (self.direction, advance) {
            (Direction::Playback, Some(adv)) => {
                let len = req.length();
                self.dma.lock().copy_out(adv.start, &mut req.buffer_mut()[..len]);
            }
            (Direction::Playback, None) => {
                let len = req.length();
                req.buffer_mut()[..len].fill(0);
            }
            (Direction::Capture, Some(adv)) => {
                let len = req.actual();
                self.dma.lock().copy_in(adv.start, &req.buffer()[..len]);
            }
            (Direction::Capture, None) => {}
        }

        self.pool.rearm(&*self.endpoint, req);

        if let (Some(adv), Some(ss)) = (advance, substream) {
            if adv.period_elapsed {
                ss.period_elapsed();
            }
        }
    }

    // =========================================================================
    // Audio Subsystem Side
    // =========================================================================

    pub(crate) fn open_session(
        &self,
        substream: Arc<dyn PcmSubstream>,
        frame_bytes: usize,
    ) -> Result<(), Uac2Error> {
        let mut state = self.state.lock();
        if state.session.is_some() {
            return Err(Uac2Error::Busy);
        }
        state.session = Some(substream);
        state.frame_bytes = frame_bytes;
        Ok(())
    }

    pub(crate) fn close_session(&self) {
        let mut state = self.state.lock();
        state.session = None;
        state.bound = None;
    }

    /// True while the audio subsystem has the direction open
    pub fn is_open(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// True while completions feed a substream
    pub fn is_bound(&self) -> bool {
        self.state.lock().bound.is_some()
    }

    pub(crate) fn bind_buffer(&self, buffer_bytes: usize, period_bytes: usize) -> Result<(), Uac2Error> {
        let area = DmaArea::with_len(buffer_bytes)?;

        let mut cursor = RingCursor::new();
        cursor.configure(buffer_bytes, period_bytes)?;

        let stale = core::mem::replace(&mut *self.dma.lock(), area);
        {
            let mut state = self.state.lock();
            state.cursor = cursor;
        }
        drop(stale);
        Ok(())
    }

    pub(crate) fn free_buffer(&self) {
        {
            let mut state = self.state.lock();
            state.bound = None;
            state.cursor.clear();
        }
        let area = core::mem::take(&mut *self.dma.lock());
        drop(area);
    }

    /// Bytes of ring storage currently allocated
    pub fn buffer_len(&self) -> usize {
        self.dma.lock().len()
    }

    pub(crate) fn trigger(&self, cmd: TriggerCommand) -> Result<(), Uac2Error> {
        {
            let mut state = self.state.lock();
            state.cursor.reset();
            if cmd.is_start() {
                let session = state.session.clone().ok_or(Uac2Error::NotReady)?;
                if !state.cursor.is_configured() {
                    return Err(Uac2Error::NotConfigured);
                }
                state.bound = Some(session);
            } else {
                state.bound = None;
            }
        }

        if !cmd.is_start() && self.direction == Direction::Playback {
            self.pool.zero_idle();
        }
        log::debug!("uac2: {} trigger {:?}", self.direction.as_str(), cmd);
        Ok(())
    }

    /// Current position in bytes
    pub fn hw_ptr(&self) -> usize {
        self.state.lock().cursor.hw_ptr()
    }

    pub(crate) fn pointer_frames(&self) -> usize {
        let state = self.state.lock();
        match state.frame_bytes {
            0 => 0,
            fb => state.cursor.hw_ptr() / fb,
        }
    }

    /// Ring length, checked against a caller's starting offset
    fn ring_len_at(&self, offset: usize) -> Result<usize, Uac2Error> {
        let dma = self.dma.lock();
        if dma.is_empty() {
            return Err(Uac2Error::NotConfigured);
        }
        if offset >= dma.len() {
            return Err(Uac2Error::InvalidArgument);
        }
        Ok(dma.len())
    }

    /// Application-side copies take the ring lock one chunk at a time so a
    /// completion never waits behind a whole-ring copy. A ring freed or
    /// replaced between chunks ends the copy short.
    pub(crate) fn write_ring(&self, offset: usize, data: &[u8]) -> Result<usize, Uac2Error> {
        let ring_len = self.ring_len_at(offset)?;
        let n = data.len().min(ring_len);

        let mut done = 0;
        for (at, span) in CopyChunks::new(offset, n, ring_len, COPY_CHUNK) {
            let mut dma = self.dma.lock();
            if dma.len() != ring_len {
                break;
            }
            done = span.end;
            dma.copy_in(at, &data[span]);
        }
        Ok(done)
    }

    pub(crate) fn read_ring(&self, offset: usize, buf: &mut [u8]) -> Result<usize, Uac2Error> {
        let ring_len = self.ring_len_at(offset)?;
        let n = buf.len().min(ring_len);

        let mut done = 0;
        for (at, span) in CopyChunks::new(offset, n, ring_len, COPY_CHUNK) {
            let dma = self.dma.lock();
            if dma.len() != ring_len {
                break;
            }
            done = span.end;
            dma.copy_out(at, &mut buf[span]);
        }
        Ok(done)
    }
}
