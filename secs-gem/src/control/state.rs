//! Control state model (SEMI E30)

use secs_core::{SecsResult, State, StateMachine, Transition};
use std::fmt;

/// GEM control state
///
/// ```text
/// INIT
/// CONTROL
///   OFFLINE
///     EQUIPMENT_OFFLINE
///     ATTEMPT_ONLINE
///     HOST_OFFLINE
///   ONLINE
///     ONLINE_LOCAL
///     ONLINE_REMOTE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlState {
    Init,
    Control,
    Offline,
    EquipmentOffline,
    AttemptOnline,
    HostOffline,
    Online,
    OnlineLocal,
    OnlineRemote,
}

impl ControlState {
    pub fn is_online(&self) -> bool {
        matches!(
            self,
            ControlState::Online | ControlState::OnlineLocal | ControlState::OnlineRemote
        )
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlState::Init => "INIT",
            ControlState::Control => "CONTROL",
            ControlState::Offline => "OFFLINE",
            ControlState::EquipmentOffline => "EQUIPMENT_OFFLINE",
            ControlState::AttemptOnline => "ATTEMPT_ONLINE",
            ControlState::HostOffline => "HOST_OFFLINE",
            ControlState::Online => "ONLINE",
            ControlState::OnlineLocal => "ONLINE_LOCAL",
            ControlState::OnlineRemote => "ONLINE_REMOTE",
        };
        f.write_str(name)
    }
}

pub const START: &str = "start";
pub const INITIAL_OFFLINE: &str = "initial_offline";
pub const INITIAL_ONLINE: &str = "initial_online";
pub const INITIAL_EQUIPMENT_OFFLINE: &str = "initial_equipment_offline";
pub const INITIAL_ATTEMPT_ONLINE: &str = "initial_attempt_online";
pub const INITIAL_HOST_OFFLINE: &str = "initial_host_offline";
pub const INITIAL_ONLINE_LOCAL: &str = "initial_online_local";
pub const INITIAL_ONLINE_REMOTE: &str = "initial_online_remote";
pub const SWITCH_ONLINE: &str = "switch_online";
pub const ATTEMPT_ONLINE_FAIL_EQUIPMENT_OFFLINE: &str = "attempt_online_fail_equipment_offline";
pub const ATTEMPT_ONLINE_FAIL_HOST_OFFLINE: &str = "attempt_online_fail_host_offline";
pub const ATTEMPT_ONLINE_SUCCESS: &str = "attempt_online_success";
pub const SWITCH_OFFLINE: &str = "switch_offline";
pub const SWITCH_ONLINE_LOCAL: &str = "switch_online_local";
pub const SWITCH_ONLINE_REMOTE: &str = "switch_online_remote";
pub const REMOTE_OFFLINE: &str = "remote_offline";
pub const REMOTE_ONLINE: &str = "remote_online";

pub const TRANSITIONS: [&str; 17] = [
    START,
    INITIAL_OFFLINE,
    INITIAL_ONLINE,
    INITIAL_EQUIPMENT_OFFLINE,
    INITIAL_ATTEMPT_ONLINE,
    INITIAL_HOST_OFFLINE,
    INITIAL_ONLINE_LOCAL,
    INITIAL_ONLINE_REMOTE,
    SWITCH_ONLINE,
    ATTEMPT_ONLINE_FAIL_EQUIPMENT_OFFLINE,
    ATTEMPT_ONLINE_FAIL_HOST_OFFLINE,
    ATTEMPT_ONLINE_SUCCESS,
    SWITCH_OFFLINE,
    SWITCH_ONLINE_LOCAL,
    SWITCH_ONLINE_REMOTE,
    REMOTE_OFFLINE,
    REMOTE_ONLINE,
];

/// Build the control state machine in `INIT`
///
/// The `initial_*` transitions leave a composite state for one of its
/// children; they are fired by enter hooks, never by callers.
pub fn control_state_machine() -> SecsResult<StateMachine<ControlState>> {
    use ControlState::*;

    let mut machine = StateMachine::new("control");
    machine.register_state(State::new(Init).initial())?;
    machine.register_state(State::new(Control))?;
    machine.register_state(State::new(Offline).with_parent(Control))?;
    machine.register_state(State::new(EquipmentOffline).with_parent(Offline))?;
    machine.register_state(State::new(AttemptOnline).with_parent(Offline))?;
    machine.register_state(State::new(HostOffline).with_parent(Offline))?;
    machine.register_state(State::new(Online).with_parent(Control))?;
    machine.register_state(State::new(OnlineLocal).with_parent(Online))?;
    machine.register_state(State::new(OnlineRemote).with_parent(Online))?;

    let transitions = [
        Transition::new(START, &[Init], Control),
        Transition::new(INITIAL_OFFLINE, &[Control], Offline),
        Transition::new(INITIAL_ONLINE, &[Control], Online),
        Transition::new(INITIAL_EQUIPMENT_OFFLINE, &[Offline], EquipmentOffline),
        Transition::new(INITIAL_ATTEMPT_ONLINE, &[Offline], AttemptOnline),
        Transition::new(INITIAL_HOST_OFFLINE, &[Offline], HostOffline),
        Transition::new(INITIAL_ONLINE_LOCAL, &[Online], OnlineLocal),
        Transition::new(INITIAL_ONLINE_REMOTE, &[Online], OnlineRemote),
        Transition::new(SWITCH_ONLINE, &[EquipmentOffline], AttemptOnline),
        Transition::new(
            ATTEMPT_ONLINE_FAIL_EQUIPMENT_OFFLINE,
            &[AttemptOnline],
            EquipmentOffline,
        ),
        Transition::new(ATTEMPT_ONLINE_FAIL_HOST_OFFLINE, &[AttemptOnline], HostOffline),
        Transition::new(ATTEMPT_ONLINE_SUCCESS, &[AttemptOnline], Online),
        Transition::new(SWITCH_OFFLINE, &[Online, HostOffline], EquipmentOffline),
        Transition::new(SWITCH_ONLINE_LOCAL, &[OnlineRemote], OnlineLocal),
        Transition::new(SWITCH_ONLINE_REMOTE, &[OnlineLocal], OnlineRemote),
        Transition::new(REMOTE_OFFLINE, &[Online], HostOffline),
        Transition::new(REMOTE_ONLINE, &[HostOffline], Online),
    ];
    for transition in transitions {
        machine.register_transition(transition)?;
    }
    Ok(machine)
}
