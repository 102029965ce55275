//! GEM communication state machine

pub mod machine;
pub mod state;

pub use machine::CommunicationStateMachine;
pub use state::{CommunicationState, communication_state_machine};
