//! SECS-II item header

use secs_core::{ItemKind, SecsError, SecsResult};

/// Largest payload a 3-byte length field can describe
pub const MAX_ITEM_LENGTH: usize = 0xFF_FFFF;

/// Deepest list nesting the decoder and the SML parser accept
pub const MAX_NESTING_DEPTH: usize = 64;

/// Decoded item header: format code and payload length
///
/// The first byte carries the format code in its top 6 bits and the number
/// of length bytes (1 to 3) in the bottom 2 bits. The length follows
/// big-endian. For lists the length is the number of children, for every
/// other kind the payload byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHeader {
    pub format_code: u8,
    pub length: usize,
}

impl ItemHeader {
    pub fn new(kind: ItemKind, length: usize) -> Self {
        Self {
            format_code: kind.format_code(),
            length,
        }
    }

    /// Number of length bytes needed for `length`
    pub fn length_byte_count(length: usize) -> SecsResult<usize> {
        match length {
            0..=0xFF => Ok(1),
            0x100..=0xFFFF => Ok(2),
            0x1_0000..=MAX_ITEM_LENGTH => Ok(3),
            _ => Err(SecsError::Encode(format!(
                "item length {} exceeds the maximum of {}",
                length, MAX_ITEM_LENGTH
            ))),
        }
    }

    /// Encode the header into `out`
    pub fn encode(&self, out: &mut Vec<u8>) -> SecsResult<()> {
        let count = Self::length_byte_count(self.length)?;
        out.push((self.format_code << 2) | count as u8);
        let bytes = (self.length as u32).to_be_bytes();
        out.extend_from_slice(&bytes[4 - count..]);
        Ok(())
    }

    /// Decode a header from the start of `bytes`
    ///
    /// # Returns
    ///
    /// The header and the number of bytes it occupied
    pub fn decode(bytes: &[u8]) -> SecsResult<(Self, usize)> {
        let first = *bytes
            .first()
            .ok_or_else(|| SecsError::Decode("not enough bytes for item header".to_string()))?;
        let count = (first & 0x03) as usize;
        if count == 0 {
            return Err(SecsError::Decode(
                "item header with zero length bytes".to_string(),
            ));
        }
        if bytes.len() < 1 + count {
            return Err(SecsError::Decode(format!(
                "not enough bytes for item length: need {}, have {}",
                count,
                bytes.len() - 1
            )));
        }
        let length = bytes[1..1 + count]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        Ok((
            Self {
                format_code: first >> 2,
                length,
            },
            1 + count,
        ))
    }

    pub fn kind(&self) -> Option<ItemKind> {
        ItemKind::from_format_code(self.format_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_length_widths() {
        let mut out = Vec::new();
        ItemHeader::new(ItemKind::Ascii, 5).encode(&mut out).unwrap();
        assert_eq!(out, vec![0x41, 0x05]);

        out.clear();
        ItemHeader::new(ItemKind::Binary, 0x100).encode(&mut out).unwrap();
        assert_eq!(out, vec![0x22, 0x01, 0x00]);

        out.clear();
        ItemHeader::new(ItemKind::List, 0x1_0000).encode(&mut out).unwrap();
        assert_eq!(out, vec![0x03, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_header_too_long() {
        let mut out = Vec::new();
        assert!(ItemHeader::new(ItemKind::Binary, MAX_ITEM_LENGTH + 1)
            .encode(&mut out)
            .is_err());
    }

    #[test]
    fn test_header_decode() {
        let (header, used) = ItemHeader::decode(&[0x22, 0x01, 0x00, 0xAA]).unwrap();
        assert_eq!(header.kind(), Some(ItemKind::Binary));
        assert_eq!(header.length, 0x100);
        assert_eq!(used, 3);

        assert!(ItemHeader::decode(&[0x40]).is_err());
        assert!(ItemHeader::decode(&[0x42, 0x01]).is_err());
        assert!(ItemHeader::decode(&[]).is_err());
    }
}
