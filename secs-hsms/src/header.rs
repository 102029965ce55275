//! HSMS message header

use secs_core::{SecsError, SecsResult};
use std::fmt;

/// Length of the HSMS header in bytes
pub const HEADER_LENGTH: usize = 10;

/// Session id used in control messages
pub const CONTROL_SESSION_ID: u16 = 0xFFFF;

/// Session type (S-type) of an HSMS message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SType {
    Data = 0,
    SelectReq = 1,
    SelectRsp = 2,
    DeselectReq = 3,
    DeselectRsp = 4,
    LinktestReq = 5,
    LinktestRsp = 6,
    RejectReq = 7,
    SeparateReq = 9,
}

impl SType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SType::Data),
            1 => Some(SType::SelectReq),
            2 => Some(SType::SelectRsp),
            3 => Some(SType::DeselectReq),
            4 => Some(SType::DeselectRsp),
            5 => Some(SType::LinktestReq),
            6 => Some(SType::LinktestRsp),
            7 => Some(SType::RejectReq),
            9 => Some(SType::SeparateReq),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether a message of this type answers an earlier request
    pub fn is_response(self) -> bool {
        matches!(
            self,
            SType::SelectRsp | SType::DeselectRsp | SType::LinktestRsp | SType::RejectReq
        )
    }
}

impl fmt::Display for SType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SType::Data => "data",
            SType::SelectReq => "select.req",
            SType::SelectRsp => "select.rsp",
            SType::DeselectReq => "deselect.req",
            SType::DeselectRsp => "deselect.rsp",
            SType::LinktestReq => "linktest.req",
            SType::LinktestRsp => "linktest.rsp",
            SType::RejectReq => "reject.req",
            SType::SeparateReq => "separate.req",
        };
        f.write_str(name)
    }
}

/// Select.rsp status, carried in the function byte
pub mod select_status {
    pub const SUCCESS: u8 = 0;
    pub const ALREADY_ACTIVE: u8 = 1;
    pub const NOT_READY: u8 = 2;
    pub const CONNECTIONS_EXHAUSTED: u8 = 3;
}

/// Deselect.rsp status, carried in the function byte
pub mod deselect_status {
    pub const SUCCESS: u8 = 0;
    pub const NOT_ESTABLISHED: u8 = 1;
    pub const BUSY: u8 = 2;
}

/// Reason code of a Reject.req, carried in the function byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    STypeNotSupported = 1,
    PTypeNotSupported = 2,
    TransactionNotOpen = 3,
    EntityNotSelected = 4,
}

impl RejectReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RejectReason::STypeNotSupported),
            2 => Some(RejectReason::PTypeNotSupported),
            3 => Some(RejectReason::TransactionNotOpen),
            4 => Some(RejectReason::EntityNotSelected),
            _ => None,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::STypeNotSupported => "S-type not supported",
            RejectReason::PTypeNotSupported => "P-type not supported",
            RejectReason::TransactionNotOpen => "transaction not open",
            RejectReason::EntityNotSelected => "entity not selected",
        };
        f.write_str(text)
    }
}

/// HSMS message header
///
/// Layout (big-endian):
///
/// | bytes | content                                        |
/// |-------|------------------------------------------------|
/// | 0-1   | session id (device id)                         |
/// | 2     | W-bit (0x80) and stream, or control data       |
/// | 3     | function, or control data                      |
/// | 4     | P-type, always 0                               |
/// | 5     | S-type                                         |
/// | 6-9   | system bytes                                   |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsmsHeader {
    pub session_id: u16,
    pub stream: u8,
    pub function: u8,
    pub require_response: bool,
    pub p_type: u8,
    /// Raw S-type byte; unknown values are kept so they can be rejected
    pub s_type: u8,
    pub system: u32,
}

impl HsmsHeader {
    /// Header for a control message
    pub fn control(system: u32, s_type: SType) -> Self {
        Self {
            session_id: CONTROL_SESSION_ID,
            stream: 0,
            function: 0,
            require_response: false,
            p_type: 0,
            s_type: s_type.to_u8(),
            system,
        }
    }

    /// Header for a data message
    pub fn data(system: u32, session_id: u16, stream: u8, function: u8, require_response: bool) -> Self {
        Self {
            session_id,
            stream: stream & 0x7F,
            function,
            require_response,
            p_type: 0,
            s_type: SType::Data.to_u8(),
            system,
        }
    }

    /// Set the stream/function bytes of a control header
    pub fn with_control_bytes(mut self, byte2: u8, byte3: u8) -> Self {
        self.stream = byte2 & 0x7F;
        self.require_response = byte2 & 0x80 != 0;
        self.function = byte3;
        self
    }

    pub fn s_type(&self) -> Option<SType> {
        SType::from_u8(self.s_type)
    }

    pub fn is_data(&self) -> bool {
        self.s_type == SType::Data.to_u8()
    }

    /// Encode to the 10 wire bytes
    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        let mut bytes = [0u8; HEADER_LENGTH];
        bytes[0..2].copy_from_slice(&self.session_id.to_be_bytes());
        bytes[2] = (self.stream & 0x7F) | if self.require_response { 0x80 } else { 0 };
        bytes[3] = self.function;
        bytes[4] = self.p_type;
        bytes[5] = self.s_type;
        bytes[6..10].copy_from_slice(&self.system.to_be_bytes());
        bytes
    }

    /// Decode from the first 10 bytes of `data`
    pub fn decode(data: &[u8]) -> SecsResult<Self> {
        if data.len() < HEADER_LENGTH {
            return Err(SecsError::FrameInvalid(format!(
                "HSMS header too short: expected {}, got {}",
                HEADER_LENGTH,
                data.len()
            )));
        }
        Ok(Self {
            session_id: u16::from_be_bytes([data[0], data[1]]),
            stream: data[2] & 0x7F,
            require_response: data[2] & 0x80 != 0,
            function: data[3],
            p_type: data[4],
            s_type: data[5],
            system: u32::from_be_bytes([data[6], data[7], data[8], data[9]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_req_bytes() {
        let header = HsmsHeader::control(123, SType::SelectReq);
        assert_eq!(header.session_id, 0xFFFF);
        let bytes = header.encode();
        assert_eq!(bytes, [0xFF, 0xFF, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x7B]);
        assert_eq!(HsmsHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_data_header_w_bit() {
        let header = HsmsHeader::data(0x01020304, 1, 1, 13, true);
        let bytes = header.encode();
        assert_eq!(bytes, [0x00, 0x01, 0x81, 0x0D, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04]);
        let decoded = HsmsHeader::decode(&bytes).unwrap();
        assert_eq!(decoded.stream, 1);
        assert!(decoded.require_response);
        assert!(decoded.is_data());
    }

    #[test]
    fn test_unknown_s_type_is_kept() {
        let bytes = [0xFF, 0xFF, 0, 0, 0, 8, 0, 0, 0, 1];
        let header = HsmsHeader::decode(&bytes).unwrap();
        assert_eq!(header.s_type, 8);
        assert_eq!(header.s_type(), None);
        assert!(HsmsHeader::decode(&bytes[..9]).is_err());
    }

    #[test]
    fn test_reject_reason_codes() {
        assert_eq!(RejectReason::EntityNotSelected as u8, 4);
        assert_eq!(RejectReason::from_u8(3), Some(RejectReason::TransactionNotOpen));
        assert_eq!(RejectReason::from_u8(9), None);
    }
}
