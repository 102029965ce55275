//! GEM control state machine

pub mod machine;
pub mod state;

pub use machine::{ControlStateMachine, HostLink};
pub use state::{ControlState, control_state_machine};
