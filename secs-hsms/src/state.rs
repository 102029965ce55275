//! HSMS connection state machine

use secs_core::{SecsResult, State, StateMachine, Transition};
use std::fmt;

/// HSMS connection state
///
/// ```text
/// NOT_CONNECTED --connect--> CONNECTED_NOT_SELECTED --select--> CONNECTED_SELECTED
///       ^                     ^                                        |
///       |                     +---------------deselect-----------------+
///       +----disconnect---- CONNECTED (either substate)
/// ```
///
/// `Connected` is a composite state; the machine is never left in it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HsmsState {
    /// No TCP connection (initial state)
    NotConnected,
    /// TCP connection established
    Connected,
    /// Connected, waiting for Select
    ConnectedNotSelected,
    /// Connected and selected; data messages may flow
    ConnectedSelected,
}

impl HsmsState {
    /// Whether data messages may be exchanged
    pub fn can_send_data(&self) -> bool {
        matches!(self, HsmsState::ConnectedSelected)
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self, HsmsState::NotConnected)
    }
}

impl fmt::Display for HsmsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HsmsState::NotConnected => "NOT_CONNECTED",
            HsmsState::Connected => "CONNECTED",
            HsmsState::ConnectedNotSelected => "CONNECTED_NOT_SELECTED",
            HsmsState::ConnectedSelected => "CONNECTED_SELECTED",
        };
        f.write_str(name)
    }
}

pub const CONNECT: &str = "connect";
pub const DISCONNECT: &str = "disconnect";
pub const SELECT: &str = "select";
pub const DESELECT: &str = "deselect";

/// Build the connection state machine in `NOT_CONNECTED`
pub fn connection_state_machine() -> SecsResult<StateMachine<HsmsState>> {
    let mut machine = StateMachine::new("hsms");
    machine.register_state(State::new(HsmsState::NotConnected).initial())?;
    machine.register_state(State::new(HsmsState::Connected))?;
    machine.register_state(
        State::new(HsmsState::ConnectedNotSelected).with_parent(HsmsState::Connected),
    )?;
    machine.register_state(
        State::new(HsmsState::ConnectedSelected).with_parent(HsmsState::Connected),
    )?;

    machine.register_transition(Transition::new(
        CONNECT,
        &[HsmsState::NotConnected],
        HsmsState::ConnectedNotSelected,
    ))?;
    machine.register_transition(Transition::new(
        DISCONNECT,
        &[HsmsState::Connected],
        HsmsState::NotConnected,
    ))?;
    machine.register_transition(Transition::new(
        SELECT,
        &[HsmsState::ConnectedNotSelected],
        HsmsState::ConnectedSelected,
    ))?;
    machine.register_transition(Transition::new(
        DESELECT,
        &[HsmsState::ConnectedSelected],
        HsmsState::ConnectedNotSelected,
    ))?;
    Ok(machine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secs_core::{SecsError, TransitionError};

    #[test]
    fn test_select_requires_connection() {
        let mut machine = connection_state_machine().unwrap();
        assert_eq!(machine.current(), Some(HsmsState::NotConnected));

        let err = machine.fire(SELECT).unwrap_err();
        match err {
            SecsError::Transition(TransitionError::WrongSourceState { current, expected, .. }) => {
                assert_eq!(current, "NOT_CONNECTED");
                assert_eq!(expected, vec!["CONNECTED_NOT_SELECTED".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut machine = connection_state_machine().unwrap();
        assert_eq!(machine.fire(CONNECT).unwrap(), HsmsState::ConnectedNotSelected);
        assert!(machine.is_in(HsmsState::Connected));
        assert_eq!(machine.fire(SELECT).unwrap(), HsmsState::ConnectedSelected);
        assert!(machine.fire(SELECT).is_err());
        assert_eq!(machine.fire(DESELECT).unwrap(), HsmsState::ConnectedNotSelected);
        assert_eq!(machine.fire(DISCONNECT).unwrap(), HsmsState::NotConnected);
        assert!(machine.fire(DISCONNECT).is_err());
    }

    #[test]
    fn test_state_helpers() {
        assert!(HsmsState::ConnectedSelected.can_send_data());
        assert!(!HsmsState::ConnectedNotSelected.can_send_data());
        assert!(!HsmsState::NotConnected.is_connected());
    }
}
