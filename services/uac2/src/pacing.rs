//! # Playback Packet Pacing
//!
//! The host polls the IN endpoint a fixed number of times per second, but
//! `rate × frame_size` is rarely a multiple of that. Each packet carries
//! the integer share of bytes; the fractional remainder is collected in a
//! residue accumulator and paid out as one extra frame whenever a whole
//! frame's worth has built up.
//!
//! ```text
//! length   = packet_size
//! residue += packet_size_residue
//! if residue / interval >= frame_size {
//!     length  += frame_size
//!     residue -= frame_size * interval
//! }
//! ```
//!
//! `interval` is the number of service opportunities per second, so
//! `residue` counts bytes scaled by `interval`. After every tick
//! `residue < frame_size * interval`.

use crate::config::ClockConfig;
use crate::transport::UsbSpeed;

/// Packet-size state for the playback direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacingEngine {
    /// Integer bytes per packet
    packet_size: u32,
    /// `bytes_per_second % interval`, or 0 when `packet_size` is capped
    packet_size_residue: u32,
    /// Packets per second
    interval: u32,
    /// Bytes per frame
    frame_size: u32,
    /// Accumulated remainder, in bytes × interval
    residue: u32,
}

impl PacingEngine {
    pub const fn new() -> Self {
        Self {
            packet_size: 0,
            packet_size_residue: 0,
            interval: 0,
            frame_size: 0,
            residue: 0,
        }
    }

    /// Recomputes every field from scratch.
    ///
    /// `interval` is in packets per second; `max_packet` caps the base size
    /// and turns residue tracking off when reached.
    pub fn configure(&mut self, sample_rate: u32, frame_size: usize, interval: u32, max_packet: usize) {
        let interval = interval.max(1);
        let frame_size = frame_size as u32;
        let rate = sample_rate as u64 * frame_size as u64;

        let base = rate / interval as u64;
        let max_packet = max_packet as u64;

        *self = if base < max_packet {
            Self {
                packet_size: base as u32,
                packet_size_residue: (rate % interval as u64) as u32,
                interval,
                frame_size,
                residue: 0,
            }
        } else {
            Self {
                packet_size: max_packet as u32,
                packet_size_residue: 0,
                interval,
                frame_size,
                residue: 0,
            }
        };
    }

    /// Configures from a clock and the bus speed the endpoints run at
    pub fn configure_for(&mut self, clock: &ClockConfig, speed: UsbSpeed) {
        self.configure(
            clock.sample_rate,
            clock.frame_bytes(),
            speed.packets_per_second(speed.stream_interval()),
            speed.max_packet_size() as usize,
        );
    }

    /// Length of the next packet in bytes
    pub fn next_packet_len(&mut self) -> usize {
        let mut length = self.packet_size;
        if self.interval == 0 {
            return length as usize;
        }

        self.residue += self.packet_size_residue;
        if self.residue / self.interval >= self.frame_size && self.frame_size != 0 {
            length += self.frame_size;
            self.residue -= self.frame_size * self.interval;
        }
        length as usize
    }

    /// Clears the accumulator, keeping the computed sizes
    pub fn reset(&mut self) {
        self.residue = 0;
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size as usize
    }

    pub fn packet_size_residue(&self) -> u32 {
        self.packet_size_residue
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size as usize
    }

    pub fn residue(&self) -> u32 {
        self.residue
    }

    pub fn is_configured(&self) -> bool {
        self.interval != 0
    }
}
