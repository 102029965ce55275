//! HSMS messages and their framing

use crate::header::{
    HEADER_LENGTH, HsmsHeader, RejectReason, SType, deselect_status, select_status,
};
use bytes::{BufMut, Bytes, BytesMut};
use secs_codec::{ToSml, decode_item, encode_item};
use secs_core::{Item, SecsError, SecsResult};
use std::fmt;

/// One HSMS message: header plus (possibly empty) SECS-II body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsmsMessage {
    pub header: HsmsHeader,
    pub body: Bytes,
}

impl HsmsMessage {
    pub fn new(header: HsmsHeader, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Data message carrying `item` as its body
    pub fn data(
        system: u32,
        session_id: u16,
        stream: u8,
        function: u8,
        require_response: bool,
        item: Option<&Item>,
    ) -> SecsResult<Self> {
        let body = match item {
            Some(item) => Bytes::from(encode_item(item)?),
            None => Bytes::new(),
        };
        Ok(Self::new(
            HsmsHeader::data(system, session_id, stream, function, require_response),
            body,
        ))
    }

    pub fn select_req(system: u32) -> Self {
        Self::control(HsmsHeader::control(system, SType::SelectReq))
    }

    pub fn select_rsp(system: u32, status: u8) -> Self {
        Self::control(HsmsHeader::control(system, SType::SelectRsp).with_control_bytes(0, status))
    }

    pub fn deselect_req(system: u32) -> Self {
        Self::control(HsmsHeader::control(system, SType::DeselectReq))
    }

    pub fn deselect_rsp(system: u32, status: u8) -> Self {
        Self::control(HsmsHeader::control(system, SType::DeselectRsp).with_control_bytes(0, status))
    }

    pub fn linktest_req(system: u32) -> Self {
        Self::control(HsmsHeader::control(system, SType::LinktestReq))
    }

    pub fn linktest_rsp(system: u32) -> Self {
        Self::control(HsmsHeader::control(system, SType::LinktestRsp))
    }

    pub fn separate_req(system: u32) -> Self {
        Self::control(HsmsHeader::control(system, SType::SeparateReq))
    }

    /// Reject `rejected`, echoing its system bytes
    ///
    /// Byte 2 carries the rejected P-type for reason 2 and the rejected S-type
    /// otherwise; byte 3 carries the reason code.
    pub fn reject_req(rejected: &HsmsHeader, reason: RejectReason) -> Self {
        let offending = if reason == RejectReason::PTypeNotSupported {
            rejected.p_type
        } else {
            rejected.s_type
        };
        let mut header = HsmsHeader::control(rejected.system, SType::RejectReq);
        header.session_id = rejected.session_id;
        header.stream = offending;
        header.function = reason as u8;
        Self::control(header)
    }

    fn control(header: HsmsHeader) -> Self {
        Self::new(header, Bytes::new())
    }

    pub fn s_type(&self) -> Option<SType> {
        self.header.s_type()
    }

    pub fn is_data(&self) -> bool {
        self.header.is_data()
    }

    /// Status byte of a select / deselect response
    pub fn status(&self) -> u8 {
        self.header.function
    }

    pub fn is_select_success(&self) -> bool {
        self.s_type() == Some(SType::SelectRsp) && self.status() == select_status::SUCCESS
    }

    pub fn is_deselect_success(&self) -> bool {
        self.s_type() == Some(SType::DeselectRsp) && self.status() == deselect_status::SUCCESS
    }

    /// Reason code of a Reject.req
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self.s_type() {
            Some(SType::RejectReq) => RejectReason::from_u8(self.header.function),
            _ => None,
        }
    }

    /// Decode the body; `None` for a header-only message
    pub fn item(&self) -> SecsResult<Option<Item>> {
        decode_item(&self.body)
    }

    /// Encode to a complete frame: 4-byte length, header, body
    pub fn encode(&self) -> Bytes {
        let length = HEADER_LENGTH + self.body.len();
        let mut buffer = BytesMut::with_capacity(4 + length);
        buffer.put_u32(length as u32);
        buffer.put_slice(&self.header.encode());
        buffer.put_slice(&self.body);
        buffer.freeze()
    }

    /// Decode a complete frame, including its length prefix
    pub fn decode(frame: &[u8]) -> SecsResult<Self> {
        if frame.len() < 4 + HEADER_LENGTH {
            return Err(SecsError::FrameInvalid(format!(
                "frame too short: {} bytes",
                frame.len()
            )));
        }
        let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        if length != frame.len() - 4 {
            return Err(SecsError::FrameInvalid(format!(
                "length field {} doesn't match {} bytes",
                length,
                frame.len() - 4
            )));
        }
        Self::from_payload(Bytes::copy_from_slice(&frame[4..]))
    }

    /// Build from the bytes following the length prefix
    pub(crate) fn from_payload(payload: Bytes) -> SecsResult<Self> {
        let header = HsmsHeader::decode(&payload)?;
        Ok(Self::new(header, payload.slice(HEADER_LENGTH..)))
    }
}

impl fmt::Display for HsmsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = &self.header;
        match self.s_type() {
            Some(SType::Data) => {
                write!(
                    f,
                    "S{}F{}{} session={} system={:#010x}",
                    header.stream,
                    header.function,
                    if header.require_response { " W" } else { "" },
                    header.session_id,
                    header.system
                )?;
                match self.item() {
                    Ok(Some(item)) => write!(f, "\n{}", item.to_sml()),
                    Ok(None) => Ok(()),
                    Err(_) => write!(f, " <{} undecodable bytes>", self.body.len()),
                }
            }
            Some(s_type) => write!(
                f,
                "{} system={:#010x} ({:#04x} {:#04x})",
                s_type, header.system, header.stream, header.function
            ),
            None => write!(f, "s-type {} system={:#010x}", header.s_type, header.system),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_req_frame() {
        let frame = HsmsMessage::select_req(123).encode();
        assert_eq!(
            frame.as_ref(),
            &[0, 0, 0, 10, 0xFF, 0xFF, 0, 0, 0, 1, 0, 0, 0, 0x7B]
        );
    }

    #[test]
    fn test_data_frame() {
        let item = Item::list(vec![Item::ascii("MDLN").unwrap(), Item::ascii("1.0").unwrap()]);
        let message = HsmsMessage::data(7, 0, 1, 2, false, Some(&item)).unwrap();
        let frame = message.encode();
        let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(length, frame.len() - 4);
        assert_eq!(&frame[4..14], &[0, 0, 0x01, 0x02, 0, 0, 0, 0, 0, 7]);
        assert_eq!(&frame[14..16], &[0x01, 0x02]);

        let decoded = HsmsMessage::decode(&frame).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.item().unwrap(), Some(item));
    }

    #[test]
    fn test_reject_echoes_rejected_header() {
        let data = HsmsHeader::data(0x55, 3, 1, 1, true);
        let reject = HsmsMessage::reject_req(&data, RejectReason::EntityNotSelected);
        assert_eq!(reject.s_type(), Some(SType::RejectReq));
        assert_eq!(reject.header.system, 0x55);
        assert_eq!(reject.header.stream, 0);
        assert_eq!(reject.reject_reason(), Some(RejectReason::EntityNotSelected));

        let mut odd = HsmsHeader::control(9, SType::LinktestReq);
        odd.p_type = 5;
        let reject = HsmsMessage::reject_req(&odd, RejectReason::PTypeNotSupported);
        assert_eq!(reject.header.stream, 5);
        assert_eq!(reject.header.function, 2);
    }

    #[test]
    fn test_select_status() {
        assert!(HsmsMessage::select_rsp(1, 0).is_select_success());
        assert!(!HsmsMessage::select_rsp(1, select_status::ALREADY_ACTIVE).is_select_success());
        assert!(HsmsMessage::deselect_rsp(1, 0).is_deselect_success());
        assert!(HsmsMessage::linktest_rsp(1).item().unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let mut frame = HsmsMessage::linktest_req(1).encode().to_vec();
        frame[3] = 11;
        assert!(matches!(HsmsMessage::decode(&frame), Err(SecsError::FrameInvalid(_))));
        assert!(HsmsMessage::decode(&frame[..8]).is_err());
    }

    #[test]
    fn test_display() {
        let item = Item::u1(1);
        let message = HsmsMessage::data(1, 0, 1, 15, true, Some(&item)).unwrap();
        let text = message.to_string();
        assert!(text.starts_with("S1F15 W"));
        assert!(text.contains("<U1 1>"));
        assert!(HsmsMessage::linktest_req(2).to_string().starts_with("linktest.req"));
    }
}
