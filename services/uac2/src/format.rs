//! Streaming alt-setting formats and PCM sample formats.

use crate::config::ClockConfig;

/// Mono channel mask (front left)
pub const CHMASK_MONO: u32 = 0x1;
/// Stereo channel mask (front left + front right)
pub const CHMASK_STEREO: u32 = 0x3;

/// Format carried by one active alt setting of a streaming interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AltFormat {
    /// Alt setting number (1-based)
    pub alt: u8,
    pub channel_mask: u32,
    pub subslot_bytes: u8,
    pub resolution_bits: u8,
}

/// Active alt settings, identical for both streaming interfaces
pub const ALT_FORMATS: [AltFormat; 6] = [
    AltFormat { alt: 1, channel_mask: CHMASK_MONO, subslot_bytes: 2, resolution_bits: 16 },
    AltFormat { alt: 2, channel_mask: CHMASK_STEREO, subslot_bytes: 2, resolution_bits: 16 },
    AltFormat { alt: 3, channel_mask: CHMASK_MONO, subslot_bytes: 3, resolution_bits: 24 },
    AltFormat { alt: 4, channel_mask: CHMASK_STEREO, subslot_bytes: 3, resolution_bits: 24 },
    AltFormat { alt: 5, channel_mask: CHMASK_MONO, subslot_bytes: 4, resolution_bits: 24 },
    AltFormat { alt: 6, channel_mask: CHMASK_STEREO, subslot_bytes: 4, resolution_bits: 24 },
];

impl AltFormat {
    /// Format for an active alt setting, `None` for 0 or out of range
    pub fn lookup(alt: u8) -> Option<&'static AltFormat> {
        ALT_FORMATS.iter().find(|f| f.alt == alt)
    }

    pub const fn channels(&self) -> u32 {
        self.channel_mask.count_ones()
    }

    pub const fn is_stereo(&self) -> bool {
        self.channel_mask == CHMASK_STEREO
    }

    /// Stores this format's sample layout, keeping the configured rate
    pub fn apply(&self, clock: &mut ClockConfig) {
        clock.channel_mask = self.channel_mask;
        clock.subslot_bytes = self.subslot_bytes;
        clock.sample_resolution_bits = self.resolution_bits;
    }
}

/// PCM sample format offered to the local audio subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    /// Signed 16-bit little-endian
    S16Le,
    /// Signed 24-bit little-endian, packed in 3 bytes
    S24_3Le,
    /// Signed 24-bit little-endian in a 4-byte container
    S24Le,
    /// Signed 32-bit little-endian
    S32Le,
}

impl PcmFormat {
    /// Maps (resolution, subslot) to a PCM format
    pub fn from_layout(resolution_bits: u8, subslot_bytes: u8) -> Option<Self> {
        match (resolution_bits, subslot_bytes) {
            (16, 2) => Some(PcmFormat::S16Le),
            (24, 3) => Some(PcmFormat::S24_3Le),
            (24, 4) => Some(PcmFormat::S24Le),
            (32, 4) => Some(PcmFormat::S32Le),
            _ => None,
        }
    }

    pub fn from_clock(clock: &ClockConfig) -> Option<Self> {
        Self::from_layout(clock.sample_resolution_bits, clock.subslot_bytes)
    }

    /// Bytes per sample
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            PcmFormat::S16Le => 2,
            PcmFormat::S24_3Le => 3,
            PcmFormat::S24Le | PcmFormat::S32Le => 4,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            PcmFormat::S16Le => "S16_LE",
            PcmFormat::S24_3Le => "S24_3LE",
            PcmFormat::S24Le => "S24_LE",
            PcmFormat::S32Le => "S32_LE",
        }
    }
}
