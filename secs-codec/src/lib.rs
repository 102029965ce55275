//! Encoding layer for SECS/GEM
//!
//! This crate provides the SECS-II binary codec, the SML text format and the
//! SFDL structure language used to declare stream function bodies.

pub mod secs2;
pub mod sfdl;
pub mod sml;

pub use secs_core::{SecsError, SecsResult};
pub use secs2::{ItemHeader, Secs2Decoder, Secs2Encoder, decode_item, encode_item};
pub use sfdl::{DataItemLookup, Structure, parse_sfdl};
pub use sml::{ToSml, format_item, parse_sml};
