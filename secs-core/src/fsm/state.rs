//! State and transition descriptors

use std::fmt;
use std::hash::Hash;

/// Identity of a state
///
/// Implemented for every small copyable enum with a `Display` impl; the
/// display text is the state name used in logs and errors.
pub trait StateId: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + 'static {}

impl<T> StateId for T where T: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + 'static {}

/// A state, optionally nested under a parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State<S> {
    pub id: S,
    pub parent: Option<S>,
    pub initial: bool,
}

impl<S: StateId> State<S> {
    pub fn new(id: S) -> Self {
        Self {
            id,
            parent: None,
            initial: false,
        }
    }

    /// Nest this state under `parent`
    pub fn with_parent(mut self, parent: S) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Mark this state as the machine's initial state
    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }
}

/// A named transition with one or more legal sources and one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S> {
    pub name: String,
    pub sources: Vec<S>,
    pub destination: S,
}

impl<S: StateId> Transition<S> {
    pub fn new(name: impl Into<String>, sources: &[S], destination: S) -> Self {
        Self {
            name: name.into(),
            sources: sources.to_vec(),
            destination,
        }
    }
}
