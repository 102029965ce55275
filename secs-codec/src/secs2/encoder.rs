//! SECS-II binary encoder

use crate::secs2::types::ItemHeader;
use secs_core::{Item, SecsResult};

/// Encoder writing SECS-II items into a growing buffer
#[derive(Debug, Default)]
pub struct Secs2Encoder {
    buffer: Vec<u8>,
}

impl Secs2Encoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode one item, recursing into lists
    ///
    /// # Errors
    ///
    /// Returns a validation error for ASCII bytes above 127 and an encode
    /// error for payloads longer than 0xFFFFFF bytes.
    pub fn encode_item(&mut self, item: &Item) -> SecsResult<()> {
        match item {
            Item::List(children) => {
                ItemHeader::new(item.kind(), children.len()).encode(&mut self.buffer)?;
                for child in children {
                    self.encode_item(child)?;
                }
                Ok(())
            }
            Item::Ascii(_) => {
                item.validate()?;
                self.encode_payload(item)
            }
            _ => self.encode_payload(item),
        }
    }

    fn encode_payload(&mut self, item: &Item) -> SecsResult<()> {
        let payload = payload_bytes(item);
        ItemHeader::new(item.kind(), payload.len()).encode(&mut self.buffer)?;
        self.buffer.extend_from_slice(&payload);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Big-endian payload of a non-list item
fn payload_bytes(item: &Item) -> Vec<u8> {
    match item {
        Item::List(_) => Vec::new(),
        Item::Binary(v) | Item::Ascii(v) | Item::Jis8(v) | Item::U1(v) => v.clone(),
        Item::Boolean(v) => v.iter().map(|b| *b as u8).collect(),
        Item::I1(v) => v.iter().map(|x| *x as u8).collect(),
        Item::I2(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
        Item::I4(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
        Item::I8(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
        Item::U2(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
        Item::U4(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
        Item::U8(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
        Item::F4(v) => v.iter().flat_map(|x| x.to_bits().to_be_bytes()).collect(),
        Item::F8(v) => v.iter().flat_map(|x| x.to_bits().to_be_bytes()).collect(),
    }
}

/// Encode a single item into a fresh buffer
pub fn encode_item(item: &Item) -> SecsResult<Vec<u8>> {
    let mut encoder = Secs2Encoder::new();
    encoder.encode_item(item)?;
    Ok(encoder.into_bytes())
}
