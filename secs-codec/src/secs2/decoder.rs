//! SECS-II binary decoder

use crate::secs2::types::{ItemHeader, MAX_NESTING_DEPTH};
use once_cell::sync::Lazy;
use secs_core::{Item, ItemKind, SecsError, SecsResult};
use std::collections::HashMap;

/// Decodes the payload of one item; receives the decoder positioned after
/// the header and the length from the header
type DecodeFn = fn(&mut Secs2Decoder<'_>, usize) -> SecsResult<Item>;

/// Format code -> payload decoder, built once
static DECODERS: Lazy<HashMap<u8, DecodeFn>> = Lazy::new(|| {
    let mut table: HashMap<u8, DecodeFn> = HashMap::new();
    table.insert(ItemKind::List.format_code(), |d, len| d.decode_list(len));
    table.insert(ItemKind::Binary.format_code(), |d, len| {
        Ok(Item::Binary(d.read_bytes(len)?.to_vec()))
    });
    table.insert(ItemKind::Boolean.format_code(), |d, len| {
        let bytes = d.read_bytes(len)?;
        if let Some(bad) = bytes.iter().find(|b| **b > 1) {
            return Err(SecsError::Decode(format!("invalid boolean byte 0x{:02X}", bad)));
        }
        Ok(Item::Boolean(bytes.iter().map(|b| *b == 1).collect()))
    });
    table.insert(ItemKind::Ascii.format_code(), |d, len| {
        let bytes = d.read_bytes(len)?;
        if let Some(bad) = bytes.iter().find(|b| **b > 127) {
            return Err(SecsError::Decode(format!("invalid ASCII byte 0x{:02X}", bad)));
        }
        Ok(Item::Ascii(bytes.to_vec()))
    });
    table.insert(ItemKind::Jis8.format_code(), |d, len| {
        Ok(Item::Jis8(d.read_bytes(len)?.to_vec()))
    });
    table.insert(ItemKind::I1.format_code(), |d, len| {
        Ok(Item::I1(d.read_fixed::<1>(len)?.into_iter().map(|b| b[0] as i8).collect()))
    });
    table.insert(ItemKind::I2.format_code(), |d, len| {
        Ok(Item::I2(d.read_fixed::<2>(len)?.into_iter().map(i16::from_be_bytes).collect()))
    });
    table.insert(ItemKind::I4.format_code(), |d, len| {
        Ok(Item::I4(d.read_fixed::<4>(len)?.into_iter().map(i32::from_be_bytes).collect()))
    });
    table.insert(ItemKind::I8.format_code(), |d, len| {
        Ok(Item::I8(d.read_fixed::<8>(len)?.into_iter().map(i64::from_be_bytes).collect()))
    });
    table.insert(ItemKind::U1.format_code(), |d, len| {
        Ok(Item::U1(d.read_bytes(len)?.to_vec()))
    });
    table.insert(ItemKind::U2.format_code(), |d, len| {
        Ok(Item::U2(d.read_fixed::<2>(len)?.into_iter().map(u16::from_be_bytes).collect()))
    });
    table.insert(ItemKind::U4.format_code(), |d, len| {
        Ok(Item::U4(d.read_fixed::<4>(len)?.into_iter().map(u32::from_be_bytes).collect()))
    });
    table.insert(ItemKind::U8.format_code(), |d, len| {
        Ok(Item::U8(d.read_fixed::<8>(len)?.into_iter().map(u64::from_be_bytes).collect()))
    });
    table.insert(ItemKind::F4.format_code(), |d, len| {
        Ok(Item::F4(d.read_fixed::<4>(len)?.into_iter().map(f32::from_be_bytes).collect()))
    });
    table.insert(ItemKind::F8.format_code(), |d, len| {
        Ok(Item::F8(d.read_fixed::<8>(len)?.into_iter().map(f64::from_be_bytes).collect()))
    });
    table
});

/// Decoder reading SECS-II items from a borrowed buffer
///
/// Never reads past the end of the buffer; every length is checked against
/// the remaining bytes first. Lists nested deeper than [`MAX_NESTING_DEPTH`]
/// are a decode error.
pub struct Secs2Decoder<'a> {
    buffer: &'a [u8],
    position: usize,
    depth: usize,
}

impl<'a> Secs2Decoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
            depth: 0,
        }
    }

    /// Decode the next item
    pub fn decode_item(&mut self) -> SecsResult<Item> {
        let (header, used) = ItemHeader::decode(&self.buffer[self.position..])?;
        self.position += used;

        let decode = DECODERS.get(&header.format_code).ok_or_else(|| {
            SecsError::Decode(format!("unknown format code 0o{:02o}", header.format_code))
        })?;
        decode(self, header.length)
    }

    fn decode_list(&mut self, count: usize) -> SecsResult<Item> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(SecsError::Decode(format!(
                "list nesting exceeds {} levels",
                MAX_NESTING_DEPTH
            )));
        }
        self.depth += 1;
        // every child needs at least two header bytes
        let mut children = Vec::with_capacity(count.min(self.remaining() / 2));
        for _ in 0..count {
            match self.decode_item() {
                Ok(child) => children.push(child),
                Err(e) => {
                    self.depth -= 1;
                    return Err(e);
                }
            }
        }
        self.depth -= 1;
        Ok(Item::List(children))
    }

    fn read_bytes(&mut self, len: usize) -> SecsResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(SecsError::Decode(format!(
                "item length {} exceeds remaining {} bytes",
                len,
                self.remaining()
            )));
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    /// Read `len` bytes as big-endian elements of width `N`
    fn read_fixed<const N: usize>(&mut self, len: usize) -> SecsResult<Vec<[u8; N]>> {
        if len % N != 0 {
            return Err(SecsError::Decode(format!(
                "item length {} is not a multiple of the element size {}",
                len, N
            )));
        }
        let bytes = self.read_bytes(len)?;
        Ok(bytes
            .chunks_exact(N)
            .map(|chunk| {
                let mut element = [0u8; N];
                element.copy_from_slice(chunk);
                element
            })
            .collect())
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }
}

/// Decode a complete message body
///
/// An empty body is "no item". Trailing bytes after the item are an error.
pub fn decode_item(body: &[u8]) -> SecsResult<Option<Item>> {
    if body.is_empty() {
        return Ok(None);
    }
    let mut decoder = Secs2Decoder::new(body);
    let item = decoder.decode_item()?;
    if decoder.remaining() != 0 {
        return Err(SecsError::Decode(format!(
            "{} trailing bytes after item",
            decoder.remaining()
        )));
    }
    Ok(Some(item))
}
