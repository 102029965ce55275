use thiserror::Error;

/// Failure to fire a transition
///
/// This is a local protocol-state error. It never goes on the wire; the
/// HSMS Reject message is a separate concept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Unknown transition '{transition}' for state machine {machine}")]
    UnknownTransition { machine: String, transition: String },

    #[error(
        "Transition '{transition}' not allowed in state {current} (expected one of: {})",
        .expected.join(", ")
    )]
    WrongSourceState {
        transition: String,
        current: String,
        expected: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_source_message() {
        let err = TransitionError::WrongSourceState {
            transition: "select".to_string(),
            current: "NOT_CONNECTED".to_string(),
            expected: vec!["CONNECTED_NOT_SELECTED".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Transition 'select' not allowed in state NOT_CONNECTED (expected one of: CONNECTED_NOT_SELECTED)"
        );
    }
}
