use crate::fsm::TransitionError;
use std::fmt;
use thiserror::Error;

/// Main error type for SECS/GEM operations
#[derive(Error, Debug)]
pub enum SecsError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Not connected")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout")]
    Timeout,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A value outside the legal range of its item kind
    #[error("{0}")]
    Validation(String),

    #[error("SECS-II encoding error: {0}")]
    Encode(String),

    #[error("SECS-II decoding error: {0}")]
    Decode(String),

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Misconfigured state machine (duplicate initial state, unknown state, ...)
    #[error("State machine error: {0}")]
    StateMachine(String),
}

/// Result type alias for SECS/GEM operations
pub type SecsResult<T> = Result<T, SecsError>;

/// SML / SFDL parse error with source location
///
/// Renders as the offending source line followed by a caret line:
///
/// ```text
/// < DSID
///       ^-- Closing tag '>' expected
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ParseError {
    /// 1-based line
    pub line: usize,
    /// 1-based column the caret points at
    pub column: usize,
    /// The full text of the offending line
    pub source_line: String,
    /// What was expected / what went wrong
    pub message: String,
}

impl ParseError {
    pub fn new(
        line: usize,
        column: usize,
        source_line: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            line,
            column,
            source_line: source_line.into(),
            message: message.into(),
        }
    }

    /// Build an error for a position inside `text`
    pub fn at(text: &str, line: usize, column: usize, message: impl Into<String>) -> Self {
        let source_line = text.lines().nth(line.saturating_sub(1)).unwrap_or("");
        Self::new(line, column, source_line, message)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{}^-- {}",
            self.source_line,
            " ".repeat(self.column.saturating_sub(1)),
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_caret() {
        let err = ParseError::at("<L\n< DSID", 2, 7, "Closing tag '>' expected");
        assert_eq!(err.to_string(), "< DSID\n      ^-- Closing tag '>' expected");
    }

    #[test]
    fn test_parse_error_converts() {
        let err: SecsError = ParseError::at("<X>", 1, 2, "unknown data type X").into();
        assert!(err.to_string().ends_with("^-- unknown data type X"));
    }
}
