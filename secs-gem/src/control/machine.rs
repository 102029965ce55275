//! Control state machine runtime
//!
//! Wraps the control state model with the E30 behavior: the fan-out from
//! composite states to the configured sub state, the online attempt and
//! the collection events raised on entering EQUIPMENT_OFFLINE, ONLINE_LOCAL
//! and ONLINE_REMOTE.

use super::state::*;
use crate::events::{EventProducer, GemEvent, ceid};
use crate::settings::{GemSettings, InitialControlState, OnlineSubState};
use async_trait::async_trait;
use secs_core::{SecsResult, StateMachine};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use tokio::runtime::Handle;

/// Link to the host used while attempting to go online
#[async_trait]
pub trait HostLink: Send + Sync {
    fn is_communicating(&self) -> bool;

    /// Send S1F1 and report whether S1F2 came back
    async fn are_you_there(&self) -> bool;
}

type Outbox = Arc<Mutex<Vec<GemEvent>>>;
type HostLinkSlot = Arc<RwLock<Option<Weak<dyn HostLink>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Equipment control state machine
///
/// Events raised by hooks are collected while the machine is locked and
/// published once it is released, so listeners may query the machine.
pub struct ControlStateMachine {
    machine: Mutex<StateMachine<ControlState>>,
    outbox: Outbox,
    events: Arc<EventProducer>,
    link: HostLinkSlot,
}

impl ControlStateMachine {
    pub fn new(settings: &GemSettings, events: Arc<EventProducer>) -> SecsResult<Arc<Self>> {
        let mut machine = control_state_machine()?;
        let outbox: Outbox = Arc::default();
        let link: HostLinkSlot = Arc::new(RwLock::new(None));

        Ok(Arc::new_cyclic(|this: &Weak<Self>| {
            install_hooks(
                &mut machine,
                this.clone(),
                &outbox,
                &link,
                settings.initial_control_state,
                settings.initial_online_state,
            );
            Self {
                machine: Mutex::new(machine),
                outbox,
                events,
                link,
            }
        }))
    }

    /// Install the link used by `switch_online`
    pub fn set_host_link(&self, link: Weak<dyn HostLink>) {
        *self
            .link
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(link);
    }

    /// Leave INIT for the configured initial state
    pub fn start(&self) -> SecsResult<ControlState> {
        self.fire(START)
    }

    pub fn current(&self) -> ControlState {
        lock(&self.machine).current().unwrap_or(ControlState::Init)
    }

    /// Whether the current state is `state` or nested inside it
    pub fn is_in(&self, state: ControlState) -> bool {
        lock(&self.machine).is_in(state)
    }

    pub fn is_online(&self) -> bool {
        self.is_in(ControlState::Online)
    }

    /// Operator request to go online from EQUIPMENT_OFFLINE
    pub fn switch_online(&self) -> SecsResult<ControlState> {
        self.fire(SWITCH_ONLINE)
    }

    /// Operator request to go offline from ONLINE or HOST_OFFLINE
    pub fn switch_offline(&self) -> SecsResult<ControlState> {
        self.fire(SWITCH_OFFLINE)
    }

    pub fn switch_online_local(&self) -> SecsResult<ControlState> {
        self.fire(SWITCH_ONLINE_LOCAL)
    }

    pub fn switch_online_remote(&self) -> SecsResult<ControlState> {
        self.fire(SWITCH_ONLINE_REMOTE)
    }

    /// Host request to go offline (S1F15)
    pub fn remote_offline(&self) -> SecsResult<ControlState> {
        self.fire(REMOTE_OFFLINE)
    }

    /// Host request to go online (S1F17)
    pub fn remote_online(&self) -> SecsResult<ControlState> {
        self.fire(REMOTE_ONLINE)
    }

    /// Fire a transition by name and publish the events it raised
    pub fn fire(&self, transition: &str) -> SecsResult<ControlState> {
        let result = lock(&self.machine).fire(transition);
        self.flush_events();
        result
    }

    fn flush_events(&self) {
        let pending = std::mem::take(&mut *lock(&self.outbox));
        for event in pending {
            self.events.fire(event);
        }
    }

    fn finish_attempt(&self, host_answered: bool) {
        let transition = if host_answered {
            ATTEMPT_ONLINE_SUCCESS
        } else {
            ATTEMPT_ONLINE_FAIL_HOST_OFFLINE
        };
        if let Err(e) = self.fire(transition) {
            log::warn!("control: online attempt finished late: {}", e);
        }
    }
}

impl std::fmt::Debug for ControlStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlStateMachine")
            .field("current", &self.current())
            .finish()
    }
}

fn install_hooks(
    machine: &mut StateMachine<ControlState>,
    this: Weak<ControlStateMachine>,
    outbox: &Outbox,
    link: &HostLinkSlot,
    initial: InitialControlState,
    online: OnlineSubState,
) {
    machine.on_enter(ControlState::Control, move |ctx| {
        if ctx.destination == ControlState::Control {
            ctx.fire(match initial {
                InitialControlState::Online => INITIAL_ONLINE,
                _ => INITIAL_OFFLINE,
            });
        }
    });

    machine.on_enter(ControlState::Offline, move |ctx| {
        if ctx.destination == ControlState::Offline {
            ctx.fire(match initial {
                InitialControlState::AttemptOnline => INITIAL_ATTEMPT_ONLINE,
                InitialControlState::HostOffline => INITIAL_HOST_OFFLINE,
                _ => INITIAL_EQUIPMENT_OFFLINE,
            });
        }
    });

    machine.on_enter(ControlState::Online, move |ctx| {
        if ctx.destination == ControlState::Online {
            ctx.fire(match online {
                OnlineSubState::Local => INITIAL_ONLINE_LOCAL,
                OnlineSubState::Remote => INITIAL_ONLINE_REMOTE,
            });
        }
    });

    let slot = link.clone();
    machine.on_enter(ControlState::AttemptOnline, move |ctx| {
        let link = slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .and_then(Weak::upgrade);
        let Some(link) = link.filter(|link| link.is_communicating()) else {
            log::info!("control: host not reachable, staying offline");
            ctx.fire(ATTEMPT_ONLINE_FAIL_HOST_OFFLINE);
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                let this = this.clone();
                handle.spawn(async move {
                    let answered = link.are_you_there().await;
                    if let Some(control) = this.upgrade() {
                        control.finish_attempt(answered);
                    }
                });
            }
            Err(_) => {
                log::error!("control: no runtime for the online attempt");
                ctx.fire(ATTEMPT_ONLINE_FAIL_HOST_OFFLINE);
            }
        }
    });

    let collection_events = [
        (ControlState::EquipmentOffline, ceid::EQUIPMENT_OFFLINE),
        (ControlState::OnlineLocal, ceid::CONTROL_STATE_LOCAL),
        (ControlState::OnlineRemote, ceid::CONTROL_STATE_REMOTE),
    ];
    for (state, id) in collection_events {
        let outbox = outbox.clone();
        machine.on_enter(state, move |_| {
            lock(&outbox).push(GemEvent::CollectionEvent { ceid: id });
        });
    }

    for transition in TRANSITIONS {
        let outbox = outbox.clone();
        machine.on_called(transition, move |ctx| {
            lock(&outbox).push(GemEvent::ControlStateChanged {
                from: ctx.source,
                to: ctx.destination,
            });
        });
    }
}
