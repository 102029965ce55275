//! Hierarchical state machine engine

use super::error::TransitionError;
use super::state::{State, StateId, Transition};
use crate::error::{SecsError, SecsResult};
use std::collections::{HashMap, VecDeque};

/// Callback run on state enter/leave or after a transition
pub type Hook<S> = Box<dyn FnMut(&mut HookContext<S>) + Send>;

/// What a hook sees about the running transition
///
/// Hooks can't touch the machine directly. They may queue follow-up
/// transitions with [`HookContext::fire`]; those run after the current
/// transition has completed.
#[derive(Debug)]
pub struct HookContext<S> {
    pub transition: String,
    pub source: S,
    pub destination: S,
    follow_ups: Vec<String>,
}

impl<S: StateId> HookContext<S> {
    /// Queue a transition to fire once the current one completes
    pub fn fire(&mut self, transition: impl Into<String>) {
        self.follow_ups.push(transition.into());
    }
}

/// Generic hierarchical finite state machine
///
/// States may be nested. A transition is allowed when the current state or
/// one of its ancestors is among its sources. Firing runs, in order:
///
/// 1. `leave` hooks from the current state outwards, stopping below the
///    closest common ancestor of current state and destination
/// 2. the state change
/// 3. `enter` hooks from below the common ancestor inwards to the destination
/// 4. `called` hooks of the transition
pub struct StateMachine<S: StateId> {
    name: String,
    states: HashMap<S, State<S>>,
    transitions: HashMap<String, Transition<S>>,
    current: Option<S>,
    enter_hooks: HashMap<S, Vec<Hook<S>>>,
    leave_hooks: HashMap<S, Vec<Hook<S>>>,
    called_hooks: HashMap<String, Vec<Hook<S>>>,
}

impl<S: StateId> StateMachine<S> {
    /// Create an empty machine; `name` shows up in logs and errors
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: HashMap::new(),
            transitions: HashMap::new(),
            current: None,
            enter_hooks: HashMap::new(),
            leave_hooks: HashMap::new(),
            called_hooks: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a state
    ///
    /// Parents must be registered before their children. Registering the
    /// initial state makes it current.
    pub fn register_state(&mut self, state: State<S>) -> SecsResult<()> {
        if self.states.contains_key(&state.id) {
            return Err(self.config_error(format!("state {} registered twice", state.id)));
        }
        if let Some(parent) = state.parent {
            if !self.states.contains_key(&parent) {
                return Err(self.config_error(format!(
                    "parent {} of state {} is not registered",
                    parent, state.id
                )));
            }
        }
        if state.initial {
            if let Some(existing) = self.states.values().find(|s| s.initial) {
                return Err(self.config_error(format!(
                    "state {} can't be initial, {} already is",
                    state.id, existing.id
                )));
            }
            self.current = Some(state.id);
        }
        self.states.insert(state.id, state);
        Ok(())
    }

    /// Register a transition; all its states must already be known
    pub fn register_transition(&mut self, transition: Transition<S>) -> SecsResult<()> {
        if self.transitions.contains_key(&transition.name) {
            return Err(self.config_error(format!(
                "transition '{}' registered twice",
                transition.name
            )));
        }
        if transition.sources.is_empty() {
            return Err(self.config_error(format!(
                "transition '{}' has no source state",
                transition.name
            )));
        }
        for state in transition.sources.iter().chain(std::iter::once(&transition.destination)) {
            if !self.states.contains_key(state) {
                return Err(self.config_error(format!(
                    "transition '{}' uses unknown state {}",
                    transition.name, state
                )));
            }
        }
        self.transitions.insert(transition.name.clone(), transition);
        Ok(())
    }

    pub fn on_enter(&mut self, state: S, hook: impl FnMut(&mut HookContext<S>) + Send + 'static) {
        self.enter_hooks.entry(state).or_default().push(Box::new(hook));
    }

    pub fn on_leave(&mut self, state: S, hook: impl FnMut(&mut HookContext<S>) + Send + 'static) {
        self.leave_hooks.entry(state).or_default().push(Box::new(hook));
    }

    pub fn on_called(
        &mut self,
        transition: impl Into<String>,
        hook: impl FnMut(&mut HookContext<S>) + Send + 'static,
    ) {
        self.called_hooks
            .entry(transition.into())
            .or_default()
            .push(Box::new(hook));
    }

    /// The current state, `None` until an initial state is registered
    pub fn current(&self) -> Option<S> {
        self.current
    }

    /// Whether the current state is `state` or nested inside it
    pub fn is_in(&self, state: S) -> bool {
        self.current
            .map(|current| self.ancestors(current).contains(&state))
            .unwrap_or(false)
    }

    /// Whether `transition` may fire from the current state
    pub fn can_fire(&self, transition: &str) -> bool {
        match (self.transitions.get(transition), self.current) {
            (Some(t), Some(current)) => self.source_matches(t, current),
            _ => false,
        }
    }

    /// Fire a transition by name and run queued follow-ups to completion
    ///
    /// Returns the state the machine ends up in. An error from a follow-up
    /// transition is logged, the transition that queued it has already
    /// completed.
    pub fn fire(&mut self, transition: &str) -> SecsResult<S> {
        let mut queue: VecDeque<String> = self.fire_one(transition)?.into();

        while let Some(next) = queue.pop_front() {
            match self.fire_one(&next) {
                Ok(follow_ups) => queue.extend(follow_ups),
                Err(e) => log::warn!("{}: follow-up transition failed: {}", self.name, e),
            }
        }

        self.current
            .ok_or_else(|| self.config_error("no initial state".to_string()))
    }

    fn fire_one(&mut self, name: &str) -> SecsResult<Vec<String>> {
        let transition = self.transitions.get(name).cloned().ok_or_else(|| {
            TransitionError::UnknownTransition {
                machine: self.name.clone(),
                transition: name.to_string(),
            }
        })?;
        let current = self
            .current
            .ok_or_else(|| self.config_error("no initial state".to_string()))?;

        if !self.source_matches(&transition, current) {
            return Err(TransitionError::WrongSourceState {
                transition: transition.name,
                current: current.to_string(),
                expected: transition.sources.iter().map(|s| s.to_string()).collect(),
            }
            .into());
        }

        let destination = transition.destination;
        let source_chain = self.ancestors(current);
        let destination_chain = self.ancestors(destination);
        let common = source_chain
            .iter()
            .position(|s| destination_chain.contains(s))
            .map(|i| source_chain[i]);

        let leaving: Vec<S> = source_chain
            .iter()
            .copied()
            .take_while(|s| Some(*s) != common)
            .collect();
        let mut entering: Vec<S> = destination_chain
            .iter()
            .copied()
            .take_while(|s| Some(*s) != common)
            .collect();
        entering.reverse();

        log::debug!(
            "{}: {} -> {} ({})",
            self.name,
            current,
            destination,
            transition.name
        );

        let mut context = HookContext {
            transition: transition.name.clone(),
            source: current,
            destination,
            follow_ups: Vec::new(),
        };

        for state in leaving {
            run_hooks(&mut self.leave_hooks, &state, &mut context);
        }
        self.current = Some(destination);
        for state in entering {
            run_hooks(&mut self.enter_hooks, &state, &mut context);
        }
        run_hooks(&mut self.called_hooks, &transition.name, &mut context);

        Ok(context.follow_ups)
    }

    fn source_matches(&self, transition: &Transition<S>, current: S) -> bool {
        self.ancestors(current)
            .iter()
            .any(|s| transition.sources.contains(s))
    }

    /// `state` followed by its ancestors, innermost first
    fn ancestors(&self, state: S) -> Vec<S> {
        let mut chain = vec![state];
        let mut cursor = self.states.get(&state).and_then(|s| s.parent);
        while let Some(parent) = cursor {
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            cursor = self.states.get(&parent).and_then(|s| s.parent);
        }
        chain
    }

    fn config_error(&self, message: String) -> SecsError {
        SecsError::StateMachine(format!("{}: {}", self.name, message))
    }
}

fn run_hooks<K, S>(hooks: &mut HashMap<K, Vec<Hook<S>>>, key: &K, context: &mut HookContext<S>)
where
    K: std::hash::Hash + Eq,
{
    if let Some(list) = hooks.get_mut(key) {
        for hook in list.iter_mut() {
            hook(context);
        }
    }
}

impl<S: StateId> std::fmt::Debug for StateMachine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("current", &self.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Conn {
        NotConnected,
        Connected,
        NotSelected,
        Selected,
    }

    impl fmt::Display for Conn {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let name = match self {
                Conn::NotConnected => "NOT_CONNECTED",
                Conn::Connected => "CONNECTED",
                Conn::NotSelected => "CONNECTED_NOT_SELECTED",
                Conn::Selected => "CONNECTED_SELECTED",
            };
            f.write_str(name)
        }
    }

    fn connection_machine() -> StateMachine<Conn> {
        let mut machine = StateMachine::new("test");
        machine.register_state(State::new(Conn::NotConnected).initial()).unwrap();
        machine.register_state(State::new(Conn::Connected)).unwrap();
        machine
            .register_state(State::new(Conn::NotSelected).with_parent(Conn::Connected))
            .unwrap();
        machine
            .register_state(State::new(Conn::Selected).with_parent(Conn::Connected))
            .unwrap();
        machine
            .register_transition(Transition::new("connect", &[Conn::NotConnected], Conn::NotSelected))
            .unwrap();
        machine
            .register_transition(Transition::new("disconnect", &[Conn::Connected], Conn::NotConnected))
            .unwrap();
        machine
            .register_transition(Transition::new("select", &[Conn::NotSelected], Conn::Selected))
            .unwrap();
        machine
            .register_transition(Transition::new("deselect", &[Conn::Selected], Conn::NotSelected))
            .unwrap();
        machine
    }

    #[test]
    fn test_initial_state() {
        let machine = connection_machine();
        assert_eq!(machine.current(), Some(Conn::NotConnected));
        assert!(machine.is_in(Conn::NotConnected));
        assert!(!machine.is_in(Conn::Connected));
    }

    #[test]
    fn test_select_guard() {
        let mut machine = connection_machine();
        let err = machine.fire("select").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("NOT_CONNECTED"));
        assert!(text.contains("CONNECTED_NOT_SELECTED"));

        machine.fire("connect").unwrap();
        assert_eq!(machine.fire("select").unwrap(), Conn::Selected);
        assert!(matches!(
            machine.fire("select"),
            Err(SecsError::Transition(TransitionError::WrongSourceState { .. }))
        ));
    }

    #[test]
    fn test_hierarchical_source() {
        let mut machine = connection_machine();
        machine.fire("connect").unwrap();
        machine.fire("select").unwrap();
        assert!(machine.is_in(Conn::Connected));
        assert!(machine.can_fire("disconnect"));
        assert_eq!(machine.fire("disconnect").unwrap(), Conn::NotConnected);
    }

    #[test]
    fn test_unknown_transition() {
        let mut machine = connection_machine();
        assert!(matches!(
            machine.fire("teleport"),
            Err(SecsError::Transition(TransitionError::UnknownTransition { .. }))
        ));
    }

    #[test]
    fn test_hook_order() {
        let mut machine = connection_machine();
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        for state in [Conn::NotConnected, Conn::Connected, Conn::NotSelected, Conn::Selected] {
            let enter_log = log.clone();
            machine.on_enter(state, move |_| enter_log.lock().unwrap().push(format!("enter {}", state)));
            let leave_log = log.clone();
            machine.on_leave(state, move |_| leave_log.lock().unwrap().push(format!("leave {}", state)));
        }
        let called_log = log.clone();
        machine.on_called("connect", move |ctx| {
            called_log.lock().unwrap().push(format!("called {}", ctx.transition))
        });

        machine.fire("connect").unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "leave NOT_CONNECTED",
                "enter CONNECTED",
                "enter CONNECTED_NOT_SELECTED",
                "called connect"
            ]
        );

        log.lock().unwrap().clear();
        machine.fire("select").unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["leave CONNECTED_NOT_SELECTED", "enter CONNECTED_SELECTED"]
        );

        log.lock().unwrap().clear();
        machine.fire("disconnect").unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["leave CONNECTED_SELECTED", "leave CONNECTED", "enter NOT_CONNECTED"]
        );
    }

    #[test]
    fn test_follow_up_runs_after_transition() {
        let mut machine = connection_machine();
        machine.on_enter(Conn::NotSelected, |ctx| ctx.fire("select"));
        assert_eq!(machine.fire("connect").unwrap(), Conn::Selected);
    }

    #[test]
    fn test_failing_follow_up_is_ignored() {
        let mut machine = connection_machine();
        machine.on_enter(Conn::NotSelected, |ctx| ctx.fire("deselect"));
        assert_eq!(machine.fire("connect").unwrap(), Conn::NotSelected);
    }

    #[test]
    fn test_configuration_errors() {
        let mut machine = connection_machine();
        assert!(machine.register_state(State::new(Conn::Selected)).is_err());

        let mut machine = StateMachine::new("bad");
        machine.register_state(State::new(Conn::NotConnected).initial()).unwrap();
        assert!(matches!(
            machine.register_state(State::new(Conn::Connected).initial()),
            Err(SecsError::StateMachine(_))
        ));
        assert!(machine
            .register_transition(Transition::new("x", &[Conn::NotConnected], Conn::Selected))
            .is_err());
        assert!(machine
            .register_state(State::new(Conn::Selected).with_parent(Conn::Connected))
            .is_err());

        let mut empty: StateMachine<Conn> = StateMachine::new("empty");
        empty.register_state(State::new(Conn::Connected)).unwrap();
        empty
            .register_transition(Transition::new("go", &[Conn::Connected], Conn::Connected))
            .unwrap();
        assert!(matches!(empty.fire("go"), Err(SecsError::StateMachine(_))));
    }
}
