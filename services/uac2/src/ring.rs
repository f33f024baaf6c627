//! # Transfer Ring
//!
//! Byte accounting for the circular PCM buffer the local audio subsystem
//! reads from (playback) or writes into (capture).
//!
//! [`RingCursor`] is the pointer math: `hw_ptr`, capacity and period. It
//! lives inside the per-direction lock. [`DmaArea`] is the storage and is
//! copied outside that lock.
//!
//! ```text
//!  0                    hw_ptr                      capacity
//!  ├──────────┬──────────┼──────────┬──────────┬──────┤
//!  │ period 0 │ period 1 │ period 2 │ period 3 │ ...  │
//!  └──────────┴──────────┴──────────┴──────────┴──────┘
//!                        └─ next packet copied here, wrapping at capacity
//! ```

use alloc::vec::Vec;
use core::ops::Range;

use crate::{Uac2Error, PRD_SIZE_MAX};

/// Largest span copied under one hold of the ring lock
pub const COPY_CHUNK: usize = PRD_SIZE_MAX;

/// Result of advancing the cursor by one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingAdvance {
    /// `hw_ptr` before the advance; the packet is copied from/to here
    pub start: usize,
    /// The packet crossed a period boundary
    pub period_elapsed: bool,
}

/// Consumer-visible position in the ring.
///
/// Invariant: `hw_ptr < capacity` whenever `capacity > 0`, else `hw_ptr == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingCursor {
    hw_ptr: usize,
    capacity: usize,
    period: usize,
}

impl RingCursor {
    pub const fn new() -> Self {
        Self {
            hw_ptr: 0,
            capacity: 0,
            period: 0,
        }
    }

    /// Binds buffer geometry and rewinds to 0
    pub fn configure(&mut self, capacity: usize, period: usize) -> Result<(), Uac2Error> {
        if capacity == 0 || period == 0 || period > capacity {
            return Err(Uac2Error::InvalidArgument);
        }
        self.capacity = capacity;
        self.period = period;
        self.hw_ptr = 0;
        Ok(())
    }

    /// Forgets the geometry
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn is_configured(&self) -> bool {
        self.capacity != 0
    }

    /// Moves `hw_ptr` forward by `len` bytes, modulo capacity.
    ///
    /// Without geometry this is a no-op that reports no elapsed period.
    pub fn advance(&mut self, len: usize) -> RingAdvance {
        let start = self.hw_ptr;
        if self.capacity == 0 {
            return RingAdvance {
                start,
                period_elapsed: false,
            };
        }

        let pending = self.hw_ptr % self.period + len;
        self.hw_ptr = (self.hw_ptr + len) % self.capacity;

        RingAdvance {
            start,
            period_elapsed: pending >= self.period,
        }
    }

    /// Rewinds to the start of the ring
    pub fn reset(&mut self) {
        self.hw_ptr = 0;
    }

    pub fn hw_ptr(&self) -> usize {
        self.hw_ptr
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

/// Backing storage of the ring
#[derive(Debug, Default)]
pub struct DmaArea {
    buf: Vec<u8>,
}

impl DmaArea {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Allocates a zeroed area of `bytes`
    pub fn with_len(bytes: usize) -> Result<Self, Uac2Error> {
        Ok(Self {
            buf: crate::try_zeroed(bytes)?,
        })
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Copies ring bytes starting at `start` into `dst`, wrapping at the end.
    /// An empty area yields silence.
    pub fn copy_out(&self, start: usize, dst: &mut [u8]) {
        let cap = self.buf.len();
        if cap == 0 {
            dst.fill(0);
            return;
        }

        let mut pos = start % cap;
        let mut done = 0;
        while done < dst.len() {
            let n = (cap - pos).min(dst.len() - done);
            dst[done..done + n].copy_from_slice(&self.buf[pos..pos + n]);
            done += n;
            pos = (pos + n) % cap;
        }
    }

    /// Copies `src` into the ring starting at `start`, wrapping at the end.
    /// Dropped if the area is empty.
    pub fn copy_in(&mut self, start: usize, src: &[u8]) {
        let cap = self.buf.len();
        if cap == 0 {
            return;
        }

        let mut pos = start % cap;
        let mut done = 0;
        while done < src.len() {
            let n = (cap - pos).min(src.len() - done);
            self.buf[pos..pos + n].copy_from_slice(&src[done..done + n]);
            done += n;
            pos = (pos + n) % cap;
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// Splits a copy of `len` bytes at ring offset `start` into spans of at
/// most `chunk` bytes.
///
/// Yields the ring offset of each span and the matching range of the
/// caller's buffer.
#[derive(Debug, Clone)]
pub struct CopyChunks {
    start: usize,
    ring_len: usize,
    len: usize,
    chunk: usize,
    done: usize,
}

impl CopyChunks {
    pub fn new(start: usize, len: usize, ring_len: usize, chunk: usize) -> Self {
        Self {
            start,
            ring_len,
            len,
            chunk,
            done: 0,
        }
    }
}

impl Iterator for CopyChunks {
    type Item = (usize, Range<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done >= self.len || self.ring_len == 0 || self.chunk == 0 {
            return None;
        }
        let n = (self.len - self.done).min(self.chunk);
        let at = (self.start + self.done) % self.ring_len;
        let span = self.done..self.done + n;
        self.done += n;
        Some((at, span))
    }
}
