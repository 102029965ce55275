//! SML: the human readable text form of SECS-II items

pub mod formatter;
pub mod parser;
pub mod tokenizer;

pub use formatter::{ToSml, format_item};
pub use parser::{parse_integer, parse_sml};
pub use tokenizer::{Token, TokenKind, tokenize};
