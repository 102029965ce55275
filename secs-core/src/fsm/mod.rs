//! Generic hierarchical state machine
//!
//! Shared by the HSMS connection state machine and the GEM communication and
//! control state machines.

pub mod error;
pub mod machine;
pub mod state;

pub use error::TransitionError;
pub use machine::{Hook, HookContext, StateMachine};
pub use state::{State, StateId, Transition};
