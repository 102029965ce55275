//! SECS-II binary encoding/decoding module

pub mod decoder;
pub mod encoder;
pub mod types;

pub use decoder::{Secs2Decoder, decode_item};
pub use encoder::{Secs2Encoder, encode_item};
pub use types::{ItemHeader, MAX_ITEM_LENGTH, MAX_NESTING_DEPTH};
