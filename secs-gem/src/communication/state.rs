//! Communication state model (SEMI E30)

use secs_core::{SecsResult, State, StateMachine, Transition};
use std::fmt;

/// GEM communication state
///
/// ```text
/// DISABLED
/// ENABLED
///   NOT_COMMUNICATING
///   EQUIPMENT_INITIATED_CONNECT
///     WAIT_DELAY
///     WAIT_CRA
///   HOST_INITIATED_CONNECT
///     WAIT_CR_FROM_HOST
///   COMMUNICATING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommunicationState {
    Disabled,
    Enabled,
    NotCommunicating,
    EquipmentInitiatedConnect,
    WaitDelay,
    WaitCra,
    HostInitiatedConnect,
    WaitCrFromHost,
    Communicating,
}

impl CommunicationState {
    /// Composite states the machine passes through but never rests in
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            CommunicationState::Enabled
                | CommunicationState::EquipmentInitiatedConnect
                | CommunicationState::HostInitiatedConnect
        )
    }
}

impl fmt::Display for CommunicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommunicationState::Disabled => "DISABLED",
            CommunicationState::Enabled => "ENABLED",
            CommunicationState::NotCommunicating => "NOT_COMMUNICATING",
            CommunicationState::EquipmentInitiatedConnect => "EQUIPMENT_INITIATED_CONNECT",
            CommunicationState::WaitDelay => "WAIT_DELAY",
            CommunicationState::WaitCra => "WAIT_CRA",
            CommunicationState::HostInitiatedConnect => "HOST_INITIATED_CONNECT",
            CommunicationState::WaitCrFromHost => "WAIT_CR_FROM_HOST",
            CommunicationState::Communicating => "COMMUNICATING",
        };
        f.write_str(name)
    }
}

pub const ENABLE: &str = "enable";
pub const DISABLE: &str = "disable";
pub const SELECT: &str = "select";
pub const COMMUNICATION_REQ_FAIL: &str = "communicationreqfail";
pub const DELAY_EXPIRED: &str = "delayexpired";
pub const MESSAGE_RECEIVED: &str = "messagereceived";
pub const S1F14_RECEIVED: &str = "s1f14received";
pub const S1F13_RECEIVED: &str = "s1f13received";
pub const COMMUNICATION_FAIL: &str = "communicationfail";
pub const CONNECTION_LOST: &str = "connectionlost";

/// Every transition name, in registration order
pub const TRANSITIONS: [&str; 10] = [
    ENABLE,
    DISABLE,
    SELECT,
    COMMUNICATION_REQ_FAIL,
    DELAY_EXPIRED,
    MESSAGE_RECEIVED,
    S1F14_RECEIVED,
    S1F13_RECEIVED,
    COMMUNICATION_FAIL,
    CONNECTION_LOST,
];

/// Build the communication state machine in `DISABLED`
pub fn communication_state_machine() -> SecsResult<StateMachine<CommunicationState>> {
    use CommunicationState::*;

    let mut machine = StateMachine::new("communication");
    machine.register_state(State::new(Disabled).initial())?;
    machine.register_state(State::new(Enabled))?;
    machine.register_state(State::new(NotCommunicating).with_parent(Enabled))?;
    machine.register_state(State::new(Communicating).with_parent(Enabled))?;
    machine.register_state(State::new(EquipmentInitiatedConnect).with_parent(Enabled))?;
    machine.register_state(State::new(WaitDelay).with_parent(EquipmentInitiatedConnect))?;
    machine.register_state(State::new(WaitCra).with_parent(EquipmentInitiatedConnect))?;
    machine.register_state(State::new(HostInitiatedConnect).with_parent(Enabled))?;
    machine.register_state(State::new(WaitCrFromHost).with_parent(HostInitiatedConnect))?;

    let transitions = [
        Transition::new(ENABLE, &[Disabled], NotCommunicating),
        Transition::new(DISABLE, &[Enabled], Disabled),
        Transition::new(SELECT, &[NotCommunicating], WaitCra),
        Transition::new(COMMUNICATION_REQ_FAIL, &[WaitCra], WaitDelay),
        Transition::new(DELAY_EXPIRED, &[WaitDelay], WaitCra),
        Transition::new(MESSAGE_RECEIVED, &[WaitDelay], WaitCra),
        Transition::new(S1F14_RECEIVED, &[WaitCra], Communicating),
        Transition::new(
            S1F13_RECEIVED,
            &[WaitCrFromHost, WaitDelay, WaitCra],
            Communicating,
        ),
        Transition::new(COMMUNICATION_FAIL, &[Communicating], NotCommunicating),
        Transition::new(
            CONNECTION_LOST,
            &[EquipmentInitiatedConnect, HostInitiatedConnect],
            NotCommunicating,
        ),
    ];
    for transition in transitions {
        machine.register_transition(transition)?;
    }
    Ok(machine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use CommunicationState::*;

    #[test]
    fn test_equipment_initiated_handshake() {
        let mut machine = communication_state_machine().unwrap();
        assert_eq!(machine.current(), Some(Disabled));
        assert!(machine.fire(SELECT).is_err());

        assert_eq!(machine.fire(ENABLE).unwrap(), NotCommunicating);
        assert_eq!(machine.fire(SELECT).unwrap(), WaitCra);
        assert!(machine.is_in(EquipmentInitiatedConnect));
        assert_eq!(machine.fire(COMMUNICATION_REQ_FAIL).unwrap(), WaitDelay);
        assert_eq!(machine.fire(DELAY_EXPIRED).unwrap(), WaitCra);
        assert_eq!(machine.fire(S1F14_RECEIVED).unwrap(), Communicating);
        assert!(machine.fire(S1F13_RECEIVED).is_err());
    }

    #[test]
    fn test_s1f13_while_waiting() {
        let mut machine = communication_state_machine().unwrap();
        machine.fire(ENABLE).unwrap();
        machine.fire(SELECT).unwrap();
        machine.fire(COMMUNICATION_REQ_FAIL).unwrap();
        assert_eq!(machine.fire(S1F13_RECEIVED).unwrap(), Communicating);
    }

    #[test]
    fn test_failures_return_to_not_communicating() {
        let mut machine = communication_state_machine().unwrap();
        machine.fire(ENABLE).unwrap();
        machine.fire(SELECT).unwrap();
        assert!(machine.fire(COMMUNICATION_FAIL).is_err());
        assert_eq!(machine.fire(CONNECTION_LOST).unwrap(), NotCommunicating);

        machine.fire(SELECT).unwrap();
        machine.fire(S1F14_RECEIVED).unwrap();
        assert_eq!(machine.fire(COMMUNICATION_FAIL).unwrap(), NotCommunicating);
        assert_eq!(machine.fire(DISABLE).unwrap(), Disabled);
    }

    #[test]
    fn test_disable_from_nested_state() {
        let mut machine = communication_state_machine().unwrap();
        machine.fire(ENABLE).unwrap();
        machine.fire(SELECT).unwrap();
        machine.fire(COMMUNICATION_REQ_FAIL).unwrap();
        assert_eq!(machine.fire(DISABLE).unwrap(), Disabled);
        assert!(!machine.is_in(Enabled));
    }
}
