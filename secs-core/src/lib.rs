//! Core types for the SECS/GEM stack
//!
//! This crate provides the error types, the SECS-II item model and the
//! hierarchical state machine engine used by the other layers.

pub mod datatypes;
pub mod error;
pub mod fsm;

pub use datatypes::{Item, ItemKind, Value};
pub use error::{ParseError, SecsError, SecsResult};
pub use fsm::{HookContext, State, StateId, StateMachine, Transition, TransitionError};
