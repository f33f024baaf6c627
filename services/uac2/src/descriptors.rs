//! # UAC2 Descriptor Construction
//!
//! Builds the function's descriptor streams from the values negotiated at
//! bind time. Nothing here is global or patched in place: every call to
//! [`DescriptorSet::build`] produces a fresh immutable set.
//!
//! ## Layout (per speed)
//!
//! ```text
//! IAD
//! AC interface (alt 0)
//!   AC header
//!   clock source IN (10), clock source OUT (9)
//!   USB-OUT IT, IO-IN IT, USB-IN OT, IO-OUT OT      (mono: 1,3,7,5)
//!   USB-OUT IT, IO-IN IT, USB-IN OT, IO-OUT OT      (stereo: 2,4,8,6)
//! AS OUT interface alt 0
//! AS OUT interface alt 1..6
//!   AS general, format type I, endpoint, [SS companion], CS endpoint
//! AS IN interface alt 0
//! AS IN interface alt 1..6
//!   AS general, format type I, endpoint, [SS companion], CS endpoint
//! ```

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::altset::InterfaceNumbers;
use crate::format::{AltFormat, ALT_FORMATS, CHMASK_MONO};
use crate::transport::UsbSpeed;
use crate::Direction;

// =============================================================================
// Constants
// =============================================================================

/// Audio class code
pub const USB_CLASS_AUDIO: u8 = 0x01;

/// Audio interface protocol for UAC 2.0
pub const UAC_VERSION_2: u8 = 0x20;

/// Audio subclass codes
pub mod subclass {
    pub const FUNCTION_UNDEFINED: u8 = 0x00;
    pub const AUDIO_CONTROL: u8 = 0x01;
    pub const AUDIO_STREAMING: u8 = 0x02;
}

/// Descriptor type codes
pub mod dt {
    pub const INTERFACE: u8 = 0x04;
    pub const ENDPOINT: u8 = 0x05;
    pub const INTERFACE_ASSOCIATION: u8 = 0x0B;
    pub const CS_INTERFACE: u8 = 0x24;
    pub const CS_ENDPOINT: u8 = 0x25;
    pub const SS_ENDPOINT_COMP: u8 = 0x30;
}

/// Class-specific AC interface subtypes
pub mod ac_subtype {
    pub const HEADER: u8 = 0x01;
    pub const INPUT_TERMINAL: u8 = 0x02;
    pub const OUTPUT_TERMINAL: u8 = 0x03;
    pub const CLOCK_SOURCE: u8 = 0x0A;
}

/// Class-specific AS interface subtypes
pub mod as_subtype {
    pub const GENERAL: u8 = 0x01;
    pub const FORMAT_TYPE: u8 = 0x02;
}

/// Terminal types
pub mod terminal {
    pub const USB_STREAMING: u16 = 0x0101;
    pub const INPUT_UNDEFINED: u16 = 0x0200;
    pub const OUTPUT_UNDEFINED: u16 = 0x0300;
}

/// Entity ids of the audio-control topology
pub mod entity {
    pub const USB_OUT_MONO_IT: u8 = 1;
    pub const USB_OUT_STEREO_IT: u8 = 2;
    pub const IO_IN_MONO_IT: u8 = 3;
    pub const IO_IN_STEREO_IT: u8 = 4;
    pub const IO_OUT_MONO_OT: u8 = 5;
    pub const IO_OUT_STEREO_OT: u8 = 6;
    pub const USB_IN_MONO_OT: u8 = 7;
    pub const USB_IN_STEREO_OT: u8 = 8;
    /// Clock of the host → device (capture) stream
    pub const USB_OUT_CLK: u8 = 9;
    /// Clock of the device → host (playback) stream
    pub const USB_IN_CLK: u8 = 10;
}

const FUNCTION_IO_BOX: u8 = 0x08;
const FORMAT_TYPE_I: u8 = 0x01;
const FORMAT_TYPE_I_PCM: u32 = 0x0000_0001;
const CLOCK_SOURCE_INT_PROG: u8 = 0x03;
const EP_GENERAL: u8 = 0x01;

/// Terminal copy-protect control, host programmable
const TERMINAL_COPY_RW: u16 = 0x0003;

bitflags::bitflags! {
    /// Endpoint bmAttributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EndpointAttributes: u8 {
        /// Isochronous transfer type
        const ISOCHRONOUS = 0x01;
        /// Asynchronous synchronisation type
        const ASYNC = 0x04;
    }
}

bitflags::bitflags! {
    /// Clock source bmControls
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClockControls: u8 {
        /// Sampling frequency readable
        const FREQ_READ = 0x01;
        /// Sampling frequency writable
        const FREQ_WRITE = 0x02;
    }
}

bitflags::bitflags! {
    /// Spatial channel configuration
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelConfig: u32 {
        const FRONT_LEFT = 0x0000_0001;
        const FRONT_RIGHT = 0x0000_0002;
    }
}

// =============================================================================
// Strings
// =============================================================================

/// Strings of the function, in allocation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StringIndex {
    Assoc = 0,
    ControlInterface,
    ClockSourceIn,
    ClockSourceOut,
    UsbIt,
    IoIt,
    UsbOt,
    IoOt,
    AsOutAlt0,
    AsOutActive,
    AsInAlt0,
    AsInActive,
}

impl StringIndex {
    pub const COUNT: u8 = 12;
}

/// String ids handed out by the gadget core, allocated contiguously
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringIds {
    pub first: u8,
}

impl StringIds {
    pub const fn new(first: u8) -> Self {
        Self { first }
    }

    pub const fn id(&self, index: StringIndex) -> u8 {
        self.first.wrapping_add(index as u8)
    }
}

// =============================================================================
// Endpoint Descriptor
// =============================================================================

/// Standard isochronous endpoint descriptor (7 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint address, bit 7 set for IN
    pub endpoint_address: u8,
    pub attributes: EndpointAttributes,
    pub max_packet_size: u16,
    /// Service interval exponent
    pub interval: u8,
}

impl EndpointDescriptor {
    pub const LEN: u8 = 7;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN as usize || data[1] != dt::ENDPOINT {
            return None;
        }
        Some(Self {
            endpoint_address: data[2],
            attributes: EndpointAttributes::from_bits_retain(data[3]),
            max_packet_size: u16::from_le_bytes([data[4], data[5]]),
            interval: data[6],
        })
    }

    pub fn is_in(&self) -> bool {
        (self.endpoint_address & 0x80) != 0
    }

    pub fn endpoint_number(&self) -> u8 {
        self.endpoint_address & 0x0F
    }

    /// Isochronous packets per second at `speed`
    pub fn packets_per_second(&self, speed: UsbSpeed) -> u32 {
        speed.packets_per_second(self.interval)
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mps = self.max_packet_size.to_le_bytes();
        out.extend_from_slice(&[
            Self::LEN,
            dt::ENDPOINT,
            self.endpoint_address,
            self.attributes.bits(),
            mps[0],
            mps[1],
            self.interval,
        ]);
    }
}

/// Streaming endpoint parameters for a direction at a bus speed
pub fn endpoint_descriptor(direction: Direction, speed: UsbSpeed, address: u8) -> EndpointDescriptor {
    let endpoint_address = match direction {
        Direction::Playback => address | 0x80,
        Direction::Capture => address & 0x7F,
    };
    EndpointDescriptor {
        endpoint_address,
        attributes: EndpointAttributes::ISOCHRONOUS | EndpointAttributes::ASYNC,
        max_packet_size: speed.max_packet_size(),
        interval: speed.stream_interval(),
    }
}

// =============================================================================
// Descriptor Set
// =============================================================================

/// Values negotiated with the gadget core at bind time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorParams {
    pub interfaces: InterfaceNumbers,
    pub strings: StringIds,
    /// IN endpoint address (playback)
    pub in_address: u8,
    /// OUT endpoint address (capture)
    pub out_address: u8,
    pub playback_rate: u32,
    pub capture_rate: u32,
}

/// Immutable descriptor streams and string table of one bound function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSet {
    full_speed: Vec<u8>,
    high_speed: Vec<u8>,
    super_speed: Vec<u8>,
    strings: Vec<(u8, String)>,
}

impl DescriptorSet {
    pub fn build(params: &DescriptorParams) -> Self {
        Self {
            full_speed: build_stream(params, UsbSpeed::Full),
            high_speed: build_stream(params, UsbSpeed::High),
            super_speed: build_stream(params, UsbSpeed::Super),
            strings: build_strings(params),
        }
    }

    /// Descriptor bytes to report at `speed`
    pub fn for_speed(&self, speed: UsbSpeed) -> &[u8] {
        match speed {
            UsbSpeed::Full => &self.full_speed,
            UsbSpeed::High => &self.high_speed,
            UsbSpeed::Super => &self.super_speed,
        }
    }

    /// (id, text) pairs of the function's strings
    pub fn strings(&self) -> &[(u8, String)] {
        &self.strings
    }

    pub fn string(&self, id: u8) -> Option<&str> {
        self.strings
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, s)| s.as_str())
    }
}

fn build_strings(params: &DescriptorParams) -> Vec<(u8, String)> {
    let ids = params.strings;
    let text: [(StringIndex, String); StringIndex::COUNT as usize] = [
        (StringIndex::Assoc, String::from("Source/Sink")),
        (StringIndex::ControlInterface, String::from("Topology Control")),
        (StringIndex::ClockSourceIn, format!("{}Hz", params.playback_rate)),
        (StringIndex::ClockSourceOut, format!("{}Hz", params.capture_rate)),
        (StringIndex::UsbIt, String::from("USBH Out")),
        (StringIndex::IoIt, String::from("USBD Out")),
        (StringIndex::UsbOt, String::from("USBH In")),
        (StringIndex::IoOt, String::from("USBD In")),
        (StringIndex::AsOutAlt0, String::from("Playback Inactive")),
        (StringIndex::AsOutActive, String::from("Playback Active")),
        (StringIndex::AsInAlt0, String::from("Capture Inactive")),
        (StringIndex::AsInActive, String::from("Capture Active")),
    ];
    text.into_iter().map(|(idx, s)| (ids.id(idx), s)).collect()
}

fn build_stream(params: &DescriptorParams, speed: UsbSpeed) -> Vec<u8> {
    let mut out = Vec::new();
    let ids = params.strings;
    let intf = params.interfaces;

    // IAD
    out.extend_from_slice(&[
        8,
        dt::INTERFACE_ASSOCIATION,
        intf.control,
        3,
        USB_CLASS_AUDIO,
        subclass::FUNCTION_UNDEFINED,
        UAC_VERSION_2,
        ids.id(StringIndex::Assoc),
    ]);

    write_interface(
        &mut out,
        intf.control,
        0,
        0,
        subclass::AUDIO_CONTROL,
        ids.id(StringIndex::ControlInterface),
    );
    write_control_topology(&mut out, ids);

    write_streaming_interface(&mut out, params, Direction::Capture, speed);
    write_streaming_interface(&mut out, params, Direction::Playback, speed);

    out
}

fn write_interface(out: &mut Vec<u8>, number: u8, alt: u8, endpoints: u8, subclass: u8, string: u8) {
    out.extend_from_slice(&[
        9,
        dt::INTERFACE,
        number,
        alt,
        endpoints,
        USB_CLASS_AUDIO,
        subclass,
        UAC_VERSION_2,
        string,
    ]);
}

const AC_HEADER_LEN: usize = 9;
const CLOCK_SOURCE_LEN: usize = 8;
const INPUT_TERMINAL_LEN: usize = 17;
const OUTPUT_TERMINAL_LEN: usize = 12;

/// Total length of the class-specific AC descriptors, header included
pub const AC_TOTAL_LEN: u16 =
    (AC_HEADER_LEN + 2 * CLOCK_SOURCE_LEN + 4 * INPUT_TERMINAL_LEN + 4 * OUTPUT_TERMINAL_LEN) as u16;

fn write_control_topology(out: &mut Vec<u8>, ids: StringIds) {
    let total = AC_TOTAL_LEN.to_le_bytes();
    out.extend_from_slice(&[
        AC_HEADER_LEN as u8,
        dt::CS_INTERFACE,
        ac_subtype::HEADER,
        0x00,
        0x02,
        FUNCTION_IO_BOX,
        total[0],
        total[1],
        0,
    ]);

    write_clock_source(out, entity::USB_IN_CLK, ids.id(StringIndex::ClockSourceIn));
    write_clock_source(out, entity::USB_OUT_CLK, ids.id(StringIndex::ClockSourceOut));

    for stereo in [false, true] {
        let mask = if stereo {
            ChannelConfig::FRONT_LEFT | ChannelConfig::FRONT_RIGHT
        } else {
            ChannelConfig::FRONT_LEFT
        };
        let pick = |mono: u8, st: u8| if stereo { st } else { mono };

        write_input_terminal(
            out,
            pick(entity::USB_OUT_MONO_IT, entity::USB_OUT_STEREO_IT),
            terminal::USB_STREAMING,
            entity::USB_OUT_CLK,
            mask,
            ids.id(StringIndex::UsbIt),
        );
        write_input_terminal(
            out,
            pick(entity::IO_IN_MONO_IT, entity::IO_IN_STEREO_IT),
            terminal::INPUT_UNDEFINED,
            entity::USB_IN_CLK,
            mask,
            ids.id(StringIndex::IoIt),
        );
        write_output_terminal(
            out,
            pick(entity::USB_IN_MONO_OT, entity::USB_IN_STEREO_OT),
            terminal::USB_STREAMING,
            pick(entity::IO_IN_MONO_IT, entity::IO_IN_STEREO_IT),
            entity::USB_IN_CLK,
            ids.id(StringIndex::UsbOt),
        );
        write_output_terminal(
            out,
            pick(entity::IO_OUT_MONO_OT, entity::IO_OUT_STEREO_OT),
            terminal::OUTPUT_UNDEFINED,
            pick(entity::USB_OUT_MONO_IT, entity::USB_OUT_STEREO_IT),
            entity::USB_OUT_CLK,
            ids.id(StringIndex::IoOt),
        );
    }
}

fn write_clock_source(out: &mut Vec<u8>, id: u8, string: u8) {
    let controls = ClockControls::FREQ_READ | ClockControls::FREQ_WRITE;
    out.extend_from_slice(&[
        CLOCK_SOURCE_LEN as u8,
        dt::CS_INTERFACE,
        ac_subtype::CLOCK_SOURCE,
        id,
        CLOCK_SOURCE_INT_PROG,
        controls.bits(),
        0,
        string,
    ]);
}

fn write_input_terminal(
    out: &mut Vec<u8>,
    id: u8,
    terminal_type: u16,
    clock: u8,
    channels: ChannelConfig,
    string: u8,
) {
    let tt = terminal_type.to_le_bytes();
    let cfg = channels.bits().to_le_bytes();
    let ctl = TERMINAL_COPY_RW.to_le_bytes();
    out.extend_from_slice(&[
        INPUT_TERMINAL_LEN as u8,
        dt::CS_INTERFACE,
        ac_subtype::INPUT_TERMINAL,
        id,
        tt[0],
        tt[1],
        0,
        clock,
        channels.bits().count_ones() as u8,
        cfg[0],
        cfg[1],
        cfg[2],
        cfg[3],
        0,
        ctl[0],
        ctl[1],
        string,
    ]);
}

fn write_output_terminal(
    out: &mut Vec<u8>,
    id: u8,
    terminal_type: u16,
    source: u8,
    clock: u8,
    string: u8,
) {
    let tt = terminal_type.to_le_bytes();
    let ctl = TERMINAL_COPY_RW.to_le_bytes();
    out.extend_from_slice(&[
        OUTPUT_TERMINAL_LEN as u8,
        dt::CS_INTERFACE,
        ac_subtype::OUTPUT_TERMINAL,
        id,
        tt[0],
        tt[1],
        0,
        source,
        clock,
        ctl[0],
        ctl[1],
        string,
    ]);
}

fn write_streaming_interface(out: &mut Vec<u8>, params: &DescriptorParams, direction: Direction, speed: UsbSpeed) {
    let ids = params.strings;
    let (number, address, alt0_str, active_str) = match direction {
        Direction::Capture => (
            params.interfaces.stream_out,
            params.out_address,
            ids.id(StringIndex::AsOutAlt0),
            ids.id(StringIndex::AsOutActive),
        ),
        Direction::Playback => (
            params.interfaces.stream_in,
            params.in_address,
            ids.id(StringIndex::AsInAlt0),
            ids.id(StringIndex::AsInActive),
        ),
    };
    let ep = endpoint_descriptor(direction, speed, address);

    write_interface(out, number, 0, 0, subclass::AUDIO_STREAMING, alt0_str);
    for fmt in ALT_FORMATS.iter() {
        write_interface(out, number, fmt.alt, 1, subclass::AUDIO_STREAMING, active_str);
        write_as_general(out, direction, fmt);
        out.extend_from_slice(&[
            6,
            dt::CS_INTERFACE,
            as_subtype::FORMAT_TYPE,
            FORMAT_TYPE_I,
            fmt.subslot_bytes,
            fmt.resolution_bits,
        ]);
        ep.write(out);
        if speed == UsbSpeed::Super {
            let bpi = ep.max_packet_size.to_le_bytes();
            out.extend_from_slice(&[6, dt::SS_ENDPOINT_COMP, 0, 0, bpi[0], bpi[1]]);
        }
        out.extend_from_slice(&[8, dt::CS_ENDPOINT, EP_GENERAL, 0, 0, 0, 0, 0]);
    }
}

fn write_as_general(out: &mut Vec<u8>, direction: Direction, fmt: &AltFormat) {
    let mono = fmt.channel_mask == CHMASK_MONO;
    let link = match (direction, mono) {
        (Direction::Capture, true) => entity::USB_OUT_MONO_IT,
        (Direction::Capture, false) => entity::USB_OUT_STEREO_IT,
        (Direction::Playback, true) => entity::USB_IN_MONO_OT,
        (Direction::Playback, false) => entity::USB_IN_STEREO_OT,
    };
    let formats = FORMAT_TYPE_I_PCM.to_le_bytes();
    let cfg = fmt.channel_mask.to_le_bytes();
    out.extend_from_slice(&[
        16,
        dt::CS_INTERFACE,
        as_subtype::GENERAL,
        link,
        0,
        FORMAT_TYPE_I,
        formats[0],
        formats[1],
        formats[2],
        formats[3],
        fmt.channels() as u8,
        cfg[0],
        cfg[1],
        cfg[2],
        cfg[3],
        0,
    ]);
}

/// Splits a descriptor stream into its descriptors
pub fn iter_descriptors(mut data: &[u8]) -> impl Iterator<Item = &[u8]> {
    core::iter::from_fn(move || {
        let len = *data.first()? as usize;
        if len < 2 || len > data.len() {
            return None;
        }
        let (head, rest) = data.split_at(len);
        data = rest;
        Some(head)
    })
}
