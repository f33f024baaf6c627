//! # Clock Control Requests
//!
//! Class-specific requests addressed to the audio-control interface. Only
//! the two clock sources are controllable:
//!
//! | Request   | Selector      | Reply                                   |
//! |-----------|---------------|-----------------------------------------|
//! | GET CUR   | SAM_FREQ      | current rate, u32 LE                    |
//! | GET CUR   | CLOCK_VALID   | 1                                       |
//! | GET RANGE | SAM_FREQ      | count=1, {rate, rate, 0}                |
//! | SET CUR   | SAM_FREQ      | data stage; rate applied if supported   |
//!
//! Everything else is answered with [`Uac2Error::NotSupported`].

use spin::Mutex;

use crate::config::{is_supported_rate, SharedConfig};
use crate::descriptors::entity;
use crate::{Direction, Uac2Error};

/// UAC2 request codes
pub mod request {
    pub const CUR: u8 = 0x01;
    pub const RANGE: u8 = 0x02;
}

/// Clock source control selectors
pub mod selector {
    pub const SAM_FREQ_CONTROL: u8 = 0x01;
    pub const CLOCK_VALID_CONTROL: u8 = 0x02;
}

bitflags::bitflags! {
    /// bmRequestType bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestType: u8 {
        /// Data stage flows device → host
        const DEVICE_TO_HOST = 0x80;
        const TYPE_CLASS = 0x20;
        const RECIPIENT_INTERFACE = 0x01;
    }
}

const TYPE_MASK: u8 = 0x60;
const RECIPIENT_MASK: u8 = 0x1F;

/// Largest reply: the one-entry RANGE block
pub const MAX_REPLY: usize = 14;

/// A SETUP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    /// Request type (direction, type, recipient)
    pub request_type: u8,
    /// Request code
    pub request: u8,
    /// Value
    pub value: u16,
    /// Index
    pub index: u16,
    /// Length of data stage
    pub length: u16,
}

impl ControlRequest {
    pub const fn new(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    /// Parses the 8 SETUP bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        Some(Self {
            request_type: data[0],
            request: data[1],
            value: u16::from_le_bytes([data[2], data[3]]),
            index: u16::from_le_bytes([data[4], data[5]]),
            length: u16::from_le_bytes([data[6], data[7]]),
        })
    }

    /// Class request to an audio entity (direction IN or OUT)
    pub fn clock(code: u8, device_to_host: bool, selector: u8, entity: u8, intf: u8, length: u16) -> Self {
        let mut rt = RequestType::TYPE_CLASS | RequestType::RECIPIENT_INTERFACE;
        if device_to_host {
            rt |= RequestType::DEVICE_TO_HOST;
        }
        Self::new(
            rt.bits(),
            code,
            (selector as u16) << 8,
            ((entity as u16) << 8) | intf as u16,
            length,
        )
    }

    pub fn is_device_to_host(&self) -> bool {
        self.request_type & RequestType::DEVICE_TO_HOST.bits() != 0
    }

    pub fn is_class_interface(&self) -> bool {
        self.request_type & TYPE_MASK == RequestType::TYPE_CLASS.bits()
            && self.request_type & RECIPIENT_MASK == RequestType::RECIPIENT_INTERFACE.bits()
    }

    pub fn interface(&self) -> u8 {
        (self.index & 0xFF) as u8
    }

    pub fn entity_id(&self) -> u8 {
        (self.index >> 8) as u8
    }

    pub fn control_selector(&self) -> u8 {
        (self.value >> 8) as u8
    }
}

/// Answer to a SETUP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlReply {
    buf: [u8; MAX_REPLY],
    len: usize,
    /// Terminate with a zero-length packet
    zero: bool,
    /// The host sends `len` bytes that must reach
    /// [`ControlRequestProcessor::complete_data_stage`]
    data_out: bool,
}

impl ControlReply {
    fn data_in(bytes: &[u8], w_length: u16) -> Self {
        let len = bytes.len().min(w_length as usize).min(MAX_REPLY);
        let mut buf = [0u8; MAX_REPLY];
        buf[..len].copy_from_slice(&bytes[..len]);
        Self {
            buf,
            len,
            zero: len < w_length as usize,
            data_out: false,
        }
    }

    fn expect(w_length: u16) -> Self {
        Self {
            buf: [0; MAX_REPLY],
            len: w_length as usize,
            zero: false,
            data_out: true,
        }
    }

    /// Bytes of the IN data stage (empty for OUT requests)
    pub fn data(&self) -> &[u8] {
        if self.data_out {
            &[]
        } else {
            &self.buf[..self.len]
        }
    }

    /// Data stage length
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn zero(&self) -> bool {
        self.zero
    }

    pub fn expects_data(&self) -> bool {
        self.data_out
    }
}

/// Decodes clock requests and applies accepted rate changes
pub struct ControlRequestProcessor {
    config: SharedConfig,
    /// Audio-control interface number
    ac_intf: u8,
    /// Clock awaiting a SET CUR payload
    pending: Mutex<Option<Direction>>,
}

impl ControlRequestProcessor {
    pub fn new(config: SharedConfig, ac_intf: u8) -> Self {
        Self {
            config,
            ac_intf,
            pending: Mutex::new(None),
        }
    }

    /// Stream a clock entity belongs to
    pub fn clock_direction(entity_id: u8) -> Option<Direction> {
        match entity_id {
            entity::USB_IN_CLK => Some(Direction::Playback),
            entity::USB_OUT_CLK => Some(Direction::Capture),
            _ => None,
        }
    }

    pub fn setup(&self, req: &ControlRequest) -> Result<ControlReply, Uac2Error> {
        if !req.is_class_interface() {
            log::error!(
                "uac2: unexpected request type {:#04x} request {:#04x}",
                req.request_type,
                req.request
            );
            return Err(Uac2Error::NotSupported);
        }
        if req.interface() != self.ac_intf {
            log::error!("uac2: class request for interface {}", req.interface());
            return Err(Uac2Error::NotSupported);
        }

        if req.is_device_to_host() {
            match req.request {
                request::CUR => self.get_cur(req),
                request::RANGE => self.get_range(req),
                _ => Err(Uac2Error::NotSupported),
            }
        } else if req.request == request::CUR {
            self.set_cur(req)
        } else {
            Err(Uac2Error::NotSupported)
        }
    }

    fn get_cur(&self, req: &ControlRequest) -> Result<ControlReply, Uac2Error> {
        let direction = Self::clock_direction(req.entity_id()).ok_or(Uac2Error::NotSupported)?;
        match req.control_selector() {
            selector::SAM_FREQ_CONTROL => {
                let rate = self.config.lock().get(direction).sample_rate;
                Ok(ControlReply::data_in(&rate.to_le_bytes(), req.length))
            }
            selector::CLOCK_VALID_CONTROL => Ok(ControlReply::data_in(&[1], req.length)),
            cs => {
                log::error!("uac2: GET CUR selector {} not supported", cs);
                Err(Uac2Error::NotSupported)
            }
        }
    }

    fn get_range(&self, req: &ControlRequest) -> Result<ControlReply, Uac2Error> {
        if req.control_selector() != selector::SAM_FREQ_CONTROL {
            log::error!("uac2: GET RANGE selector {} not supported", req.control_selector());
            return Err(Uac2Error::NotSupported);
        }
        let direction = Self::clock_direction(req.entity_id()).ok_or(Uac2Error::NotSupported)?;
        let rate = self.config.lock().get(direction).sample_rate.to_le_bytes();

        let mut block = [0u8; MAX_REPLY];
        block[0..2].copy_from_slice(&1u16.to_le_bytes());
        block[2..6].copy_from_slice(&rate);
        block[6..10].copy_from_slice(&rate);
        // dRES stays 0
        Ok(ControlReply::data_in(&block, req.length))
    }

    fn set_cur(&self, req: &ControlRequest) -> Result<ControlReply, Uac2Error> {
        if req.control_selector() != selector::SAM_FREQ_CONTROL {
            log::error!("uac2: SET CUR selector {} not supported", req.control_selector());
            return Err(Uac2Error::NotSupported);
        }
        let direction = Self::clock_direction(req.entity_id()).ok_or(Uac2Error::NotSupported)?;
        *self.pending.lock() = Some(direction);
        Ok(ControlReply::expect(req.length))
    }

    /// Delivers the payload of an accepted SET CUR.
    ///
    /// An unsupported rate leaves the configuration unchanged; the host is
    /// not told, since its data stage has already been accepted.
    pub fn complete_data_stage(&self, payload: &[u8]) -> Result<(), Uac2Error> {
        let direction = self.pending.lock().take().ok_or(Uac2Error::InvalidArgument)?;

        let rate = match payload {
            [a, b, c, d, ..] => u32::from_le_bytes([*a, *b, *c, *d]),
            _ => {
                log::warn!("uac2: short SET CUR payload ({} bytes)", payload.len());
                return Ok(());
            }
        };

        if !is_supported_rate(rate) {
            log::warn!(
                "uac2: host asked for unsupported {} rate {}",
                direction.as_str(),
                rate
            );
            return Ok(());
        }

        self.config.lock().get_mut(direction).sample_rate = rate;
        log::debug!("uac2: {} rate set to {}", direction.as_str(), rate);
        Ok(())
    }

    /// Drops a SET CUR whose data stage never arrived
    pub fn cancel_data_stage(&self) {
        self.pending.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Uac2Config;
    use alloc::sync::Arc;

    const AC: u8 = 0;

    fn processor() -> (SharedConfig, ControlRequestProcessor) {
        let config: SharedConfig = Arc::new(Mutex::new(Uac2Config::default()));
        let p = ControlRequestProcessor::new(config.clone(), AC);
        (config, p)
    }

    fn get(request: u8, sel: u8, entity: u8, len: u16) -> ControlRequest {
        ControlRequest::clock(request, true, sel, entity, AC, len)
    }

    #[test]
    fn test_get_cur_rate() {
        let (_, p) = processor();
        let reply = p
            .setup(&get(request::CUR, selector::SAM_FREQ_CONTROL, entity::USB_IN_CLK, 4))
            .unwrap();
        assert_eq!(reply.data(), &48000u32.to_le_bytes());
        assert!(!reply.zero());
    }

    #[test]
    fn test_get_cur_truncates() {
        let (_, p) = processor();
        let reply = p
            .setup(&get(request::CUR, selector::SAM_FREQ_CONTROL, entity::USB_OUT_CLK, 2))
            .unwrap();
        assert_eq!(reply.data(), &48000u32.to_le_bytes()[..2]);
    }

    #[test]
    fn test_clock_valid() {
        let (_, p) = processor();
        let reply = p
            .setup(&get(request::CUR, selector::CLOCK_VALID_CONTROL, entity::USB_IN_CLK, 4))
            .unwrap();
        assert_eq!(reply.data(), &[1u8]);
        assert!(reply.zero());
    }

    #[test]
    fn test_get_range() {
        let (config, p) = processor();
        config.lock().capture.sample_rate = 44100;
        let reply = p
            .setup(&get(request::RANGE, selector::SAM_FREQ_CONTROL, entity::USB_OUT_CLK, 64))
            .unwrap();
        let d = reply.data();
        assert_eq!(d.len(), 14);
        assert_eq!(u16::from_le_bytes([d[0], d[1]]), 1);
        assert_eq!(u32::from_le_bytes([d[2], d[3], d[4], d[5]]), 44100);
        assert_eq!(u32::from_le_bytes([d[6], d[7], d[8], d[9]]), 44100);
        assert_eq!(u32::from_le_bytes([d[10], d[11], d[12], d[13]]), 0);
        assert!(reply.zero());
    }

    #[test]
    fn test_unknown_entity_not_supported() {
        let (_, p) = processor();
        for code in [request::CUR, request::RANGE] {
            assert_eq!(
                p.setup(&get(code, selector::SAM_FREQ_CONTROL, 3, 4)),
                Err(Uac2Error::NotSupported)
            );
        }
    }

    #[test]
    fn test_wrong_interface_or_type() {
        let (_, p) = processor();
        let mut req = get(request::CUR, selector::SAM_FREQ_CONTROL, entity::USB_IN_CLK, 4);
        req.index = (req.index & 0xFF00) | 1;
        assert_eq!(p.setup(&req), Err(Uac2Error::NotSupported));

        let mut req = get(request::CUR, selector::SAM_FREQ_CONTROL, entity::USB_IN_CLK, 4);
        req.request_type = 0x80;
        assert_eq!(p.setup(&req), Err(Uac2Error::NotSupported));
    }

    #[test]
    fn test_set_cur_applies_supported_rate() {
        let (config, p) = processor();
        let req = ControlRequest::clock(
            request::CUR,
            false,
            selector::SAM_FREQ_CONTROL,
            entity::USB_OUT_CLK,
            AC,
            4,
        );
        let reply = p.setup(&req).unwrap();
        assert!(reply.expects_data());
        assert_eq!(reply.len(), 4);

        p.complete_data_stage(&44100u32.to_le_bytes()).unwrap();
        assert_eq!(config.lock().capture.sample_rate, 44100);
        assert_eq!(config.lock().playback.sample_rate, 48000);
    }

    #[test]
    fn test_set_cur_ignores_unsupported_rate() {
        let (config, p) = processor();
        let req = ControlRequest::clock(
            request::CUR,
            false,
            selector::SAM_FREQ_CONTROL,
            entity::USB_IN_CLK,
            AC,
            4,
        );
        p.setup(&req).unwrap();
        assert!(p.complete_data_stage(&96000u32.to_le_bytes()).is_ok());
        assert_eq!(config.lock().playback.sample_rate, 48000);

        // no SET CUR outstanding any more
        assert_eq!(
            p.complete_data_stage(&44100u32.to_le_bytes()),
            Err(Uac2Error::InvalidArgument)
        );
    }

    #[test]
    fn test_setup_from_bytes() {
        let req = ControlRequest::from_bytes(&[0xA1, 0x01, 0x00, 0x01, 0x00, 0x0A, 0x04, 0x00]).unwrap();
        assert!(req.is_device_to_host());
        assert!(req.is_class_interface());
        assert_eq!(req.entity_id(), entity::USB_IN_CLK);
        assert_eq!(req.control_selector(), selector::SAM_FREQ_CONTROL);
        assert_eq!(req.interface(), 0);
        assert_eq!(req.length, 4);
        assert!(ControlRequest::from_bytes(&[0; 7]).is_none());
    }
}
