//! SFDL: declarative structure definitions for stream function bodies

pub mod parser;
pub mod structure;

pub use parser::parse_sfdl;
pub use structure::{DataItemLookup, Structure};
