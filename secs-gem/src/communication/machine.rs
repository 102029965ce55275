//! Communication state machine runtime
//!
//! Drives the establish communications handshake: once HSMS is selected
//! S1F13 is sent, a positive S1F14 makes the link COMMUNICATING, a negative
//! or missing one waits the establish communication delay and tries again.
//! An S1F13 from the peer completes the handshake from any waiting state.

use super::state::*;
use crate::data_items::commack;
use crate::events::{EventProducer, GemEvent};
use crate::settings::GemSettings;
use secs_core::{Item, SecsResult, StateMachine};
use secs_hsms::{HsmsEvent, HsmsMessage, HsmsProtocol, Timer};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;

type Outbox = Arc<Mutex<Vec<GemEvent>>>;

struct CommunicationTimers {
    delay: Timer,
    wait_cra: Timer,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// S1F2 / S1F13 / S1F14 identification body for the local side
pub(crate) fn identification(settings: &GemSettings) -> SecsResult<Item> {
    if settings.is_equipment() {
        Ok(Item::list(vec![
            Item::ascii(&settings.mdln)?,
            Item::ascii(&settings.softrev)?,
        ]))
    } else {
        Ok(Item::list(vec![]))
    }
}

/// Whether `reply` is an S1F14 carrying COMMACK 0
fn is_accepted(reply: &HsmsMessage) -> bool {
    if reply.header.stream != 1 || reply.header.function != 14 {
        log::warn!("communication: expected S1F14, got {}", reply);
        return false;
    }
    match reply.item() {
        Ok(Some(body)) => {
            body.get(0).and_then(Item::first_int) == Some(commack::ACCEPTED as i128)
        }
        Ok(None) => false,
        Err(e) => {
            log::warn!("communication: undecodable S1F14: {}", e);
            false
        }
    }
}

/// GEM communication state machine bound to one HSMS protocol
pub struct CommunicationStateMachine {
    machine: Mutex<StateMachine<CommunicationState>>,
    outbox: Outbox,
    events: Arc<EventProducer>,
    timers: Arc<Mutex<CommunicationTimers>>,
    communicating: Arc<watch::Sender<bool>>,
}

impl CommunicationStateMachine {
    pub fn new(
        protocol: Arc<HsmsProtocol>,
        settings: &GemSettings,
        events: Arc<EventProducer>,
    ) -> SecsResult<Arc<Self>> {
        let mut machine = communication_state_machine()?;
        let request = identification(settings)?;
        let outbox: Outbox = Arc::default();
        let timers = Arc::new(Mutex::new(CommunicationTimers {
            delay: Timer::new("establish communication delay"),
            wait_cra: Timer::new("S1F13"),
        }));
        let (communicating, _) = watch::channel(false);
        let communicating = Arc::new(communicating);

        Ok(Arc::new_cyclic(|this: &Weak<Self>| {
            let hooks = Hooks {
                this: this.clone(),
                protocol,
                request,
                delay: settings.establish_communication_delay,
                outbox: outbox.clone(),
                timers: timers.clone(),
                communicating: communicating.clone(),
            };
            hooks.install(&mut machine);
            Self {
                machine: Mutex::new(machine),
                outbox,
                events,
                timers,
                communicating,
            }
        }))
    }

    pub fn current(&self) -> CommunicationState {
        lock(&self.machine)
            .current()
            .unwrap_or(CommunicationState::Disabled)
    }

    pub fn is_in(&self, state: CommunicationState) -> bool {
        lock(&self.machine).is_in(state)
    }

    pub fn is_communicating(&self) -> bool {
        self.is_in(CommunicationState::Communicating)
    }

    pub fn enable(&self) -> SecsResult<CommunicationState> {
        self.fire(ENABLE)
    }

    pub fn disable(&self) -> SecsResult<CommunicationState> {
        if !self.is_in(CommunicationState::Enabled) {
            return Ok(self.current());
        }
        self.fire(DISABLE)
    }

    /// Fire a transition by name and publish the events it raised
    pub fn fire(&self, transition: &str) -> SecsResult<CommunicationState> {
        let result = lock(&self.machine).fire(transition);
        self.flush_events();
        result
    }

    /// Track HSMS selection
    pub fn on_hsms_event(&self, event: HsmsEvent) {
        let fired = {
            let mut machine = lock(&self.machine);
            let transition = match event {
                HsmsEvent::Selected if machine.is_in(CommunicationState::NotCommunicating) => {
                    Some(SELECT)
                }
                HsmsEvent::Deselected | HsmsEvent::Disconnected => {
                    if machine.is_in(CommunicationState::Communicating) {
                        Some(COMMUNICATION_FAIL)
                    } else if machine.is_in(CommunicationState::EquipmentInitiatedConnect)
                        || machine.is_in(CommunicationState::HostInitiatedConnect)
                    {
                        Some(CONNECTION_LOST)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            transition.map(|name| machine.fire(name))
        };
        if let Some(Err(e)) = fired {
            log::warn!("communication: {}", e);
        }
        self.flush_events();
    }

    /// The peer sent S1F13 while the handshake is pending
    ///
    /// Returns `true` if the machine became COMMUNICATING.
    pub fn s1f13_received(&self) -> bool {
        let fired = {
            let mut machine = lock(&self.machine);
            machine.can_fire(S1F13_RECEIVED) && machine.fire(S1F13_RECEIVED).is_ok()
        };
        self.flush_events();
        fired
    }

    /// Any message arrived while waiting out the retry delay
    pub fn message_received(&self) {
        let fired = {
            let mut machine = lock(&self.machine);
            machine.current() == Some(CommunicationState::WaitDelay)
                && machine.fire(MESSAGE_RECEIVED).is_ok()
        };
        if fired {
            self.flush_events();
        }
    }

    /// Wait until COMMUNICATING; `false` if `timeout` elapsed first
    pub async fn wait_for_communicating(&self, timeout: Option<Duration>) -> bool {
        let mut receiver = self.communicating.subscribe();
        let wait = receiver.wait_for(|communicating| *communicating);
        match timeout {
            Some(limit) => matches!(tokio::time::timeout(limit, wait).await, Ok(Ok(_))),
            None => wait.await.is_ok(),
        }
    }

    fn fire_logged(&self, transition: &str) {
        if let Err(e) = self.fire(transition) {
            log::debug!("communication: {}", e);
        }
    }

    fn flush_events(&self) {
        let pending = std::mem::take(&mut *lock(&self.outbox));
        for event in pending {
            self.events.fire(event);
        }
    }
}

impl Drop for CommunicationStateMachine {
    fn drop(&mut self) {
        let mut timers = lock(&self.timers);
        timers.delay.cancel();
        timers.wait_cra.cancel();
    }
}

impl std::fmt::Debug for CommunicationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunicationStateMachine")
            .field("current", &self.current())
            .finish()
    }
}

/// Everything the hooks capture
struct Hooks {
    this: Weak<CommunicationStateMachine>,
    protocol: Arc<HsmsProtocol>,
    request: Item,
    delay: Duration,
    outbox: Outbox,
    timers: Arc<Mutex<CommunicationTimers>>,
    communicating: Arc<watch::Sender<bool>>,
}

impl Hooks {
    fn install(self, machine: &mut StateMachine<CommunicationState>) {
        let Hooks {
            this,
            protocol,
            request,
            delay,
            outbox,
            timers,
            communicating,
        } = self;

        let (weak, clock) = (this.clone(), timers.clone());
        machine.on_enter(CommunicationState::WaitCra, move |_| {
            let (weak, protocol, request) = (weak.clone(), protocol.clone(), request.clone());
            lock(&clock).wait_cra.start(Duration::ZERO, async move {
                let accepted = match protocol.data_message(1, 13, true, Some(&request)) {
                    Ok(message) => match protocol.send_and_wait_for_response(&message).await {
                        Ok(Some(reply)) => is_accepted(&reply),
                        Ok(None) => {
                            log::warn!("communication: S1F13 unanswered");
                            false
                        }
                        Err(e) => {
                            log::warn!("communication: S1F13 not sent: {}", e);
                            false
                        }
                    },
                    Err(e) => {
                        log::error!("communication: {}", e);
                        false
                    }
                };
                if let Some(machine) = weak.upgrade() {
                    machine.fire_logged(if accepted {
                        S1F14_RECEIVED
                    } else {
                        COMMUNICATION_REQ_FAIL
                    });
                }
            });
        });

        let clock = timers.clone();
        machine.on_leave(CommunicationState::WaitCra, move |_| {
            lock(&clock).wait_cra.cancel();
        });

        let (weak, clock) = (this, timers.clone());
        machine.on_enter(CommunicationState::WaitDelay, move |_| {
            let weak = weak.clone();
            lock(&clock).delay.start(delay, async move {
                if let Some(machine) = weak.upgrade() {
                    machine.fire_logged(DELAY_EXPIRED);
                }
            });
        });

        let clock = timers;
        machine.on_leave(CommunicationState::WaitDelay, move |_| {
            lock(&clock).delay.cancel();
        });

        let (flag, sink) = (communicating.clone(), outbox.clone());
        machine.on_enter(CommunicationState::Communicating, move |_| {
            flag.send_replace(true);
            lock(&sink).push(GemEvent::Communicating);
        });

        machine.on_leave(CommunicationState::Communicating, move |_| {
            communicating.send_replace(false);
        });

        for transition in TRANSITIONS {
            let sink = outbox.clone();
            machine.on_called(transition, move |ctx| {
                lock(&sink).push(GemEvent::CommunicationStateChanged {
                    from: ctx.source,
                    to: ctx.destination,
                });
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CallbackEventListener;
    use secs_hsms::HsmsSettings;

    async fn wait_for_state(machine: &CommunicationStateMachine, state: CommunicationState) {
        for _ in 0..100 {
            if machine.current() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("communication state stuck in {}", machine.current());
    }

    #[test]
    fn test_identification_body() {
        let host = GemSettings::default();
        assert_eq!(identification(&host).unwrap(), Item::list(vec![]));

        let equipment = GemSettings::new(
            HsmsSettings::new().with_device_type(secs_hsms::DeviceType::Equipment),
        )
        .with_mdln("etcher")
        .with_softrev("1.2");
        assert_eq!(
            identification(&equipment).unwrap(),
            Item::list(vec![Item::ascii("etcher").unwrap(), Item::ascii("1.2").unwrap()])
        );
    }

    #[test]
    fn test_s1f14_acceptance() {
        let accepted = HsmsMessage::data(
            7,
            0,
            1,
            14,
            false,
            Some(&Item::list(vec![Item::binary(vec![0]), Item::list(vec![])])),
        )
        .unwrap();
        assert!(is_accepted(&accepted));

        let denied = HsmsMessage::data(
            7,
            0,
            1,
            14,
            false,
            Some(&Item::list(vec![Item::binary(vec![1]), Item::list(vec![])])),
        )
        .unwrap();
        assert!(!is_accepted(&denied));

        let wrong = HsmsMessage::data(7, 0, 1, 2, false, None).unwrap();
        assert!(!is_accepted(&wrong));
    }

    #[tokio::test]
    async fn test_handshake_retry_and_recovery() {
        let protocol = HsmsProtocol::new(HsmsSettings::new().with_port(0)).unwrap();
        let events = Arc::new(EventProducer::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        events.add_listener(Arc::new(CallbackEventListener::new(move |event: GemEvent| {
            sink.lock().unwrap().push(event.name());
        })));
        let machine =
            CommunicationStateMachine::new(protocol, &GemSettings::default(), events).unwrap();

        assert_eq!(machine.enable().unwrap(), CommunicationState::NotCommunicating);

        // not selected, so S1F13 can't go out and the retry delay starts
        machine.on_hsms_event(HsmsEvent::Selected);
        wait_for_state(&machine, CommunicationState::WaitDelay).await;

        assert!(machine.s1f13_received());
        assert!(machine.wait_for_communicating(Some(Duration::from_millis(100))).await);
        assert!(seen.lock().unwrap().contains(&"communicating"));

        machine.on_hsms_event(HsmsEvent::Deselected);
        assert_eq!(machine.current(), CommunicationState::NotCommunicating);
        assert!(!machine.wait_for_communicating(Some(Duration::from_millis(20))).await);

        assert_eq!(machine.disable().unwrap(), CommunicationState::Disabled);
    }

    #[tokio::test]
    async fn test_connection_lost_during_handshake() {
        let protocol = HsmsProtocol::new(HsmsSettings::new().with_port(0)).unwrap();
        let machine = CommunicationStateMachine::new(
            protocol,
            &GemSettings::default(),
            Arc::new(EventProducer::new()),
        )
        .unwrap();
        machine.enable().unwrap();
        machine.on_hsms_event(HsmsEvent::Selected);
        wait_for_state(&machine, CommunicationState::WaitDelay).await;

        machine.message_received();
        wait_for_state(&machine, CommunicationState::WaitDelay).await;

        machine.on_hsms_event(HsmsEvent::Disconnected);
        assert_eq!(machine.current(), CommunicationState::NotCommunicating);
        assert!(!machine.s1f13_received());
    }
}
