//! GEM events and listeners
//!
//! State changes of the communication and control state machines, the
//! collection events they trigger and event reports received from the
//! equipment are published through an [`EventProducer`]. Listeners are called
//! synchronously on the task that produced the event, after the state machine
//! involved has been released.

use crate::communication::CommunicationState;
use crate::control::ControlState;
use secs_core::Item;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Collection event ids raised by the control state machine
pub mod ceid {
    pub const EQUIPMENT_OFFLINE: u32 = 1;
    pub const CONTROL_STATE_LOCAL: u32 = 2;
    pub const CONTROL_STATE_REMOTE: u32 = 3;
}

/// Something that happened in the GEM layer
#[derive(Debug, Clone, PartialEq)]
pub enum GemEvent {
    /// TCP connection to the peer established
    HsmsConnected,
    /// HSMS select procedure completed
    HsmsSelected,
    /// HSMS connection deselected or closed
    HsmsDisconnected,
    CommunicationStateChanged {
        from: CommunicationState,
        to: CommunicationState,
    },
    /// Establish communications handshake completed
    Communicating,
    ControlStateChanged { from: ControlState, to: ControlState },
    /// Collection event raised locally
    CollectionEvent { ceid: u32 },
    /// S6F11 event report received from the equipment
    EventReportReceived {
        /// CEID of the report, when it is an integer
        ceid: Option<i128>,
        report: Item,
    },
}

impl GemEvent {
    /// Stable snake_case name
    pub fn name(&self) -> &'static str {
        match self {
            GemEvent::HsmsConnected => "hsms_connected",
            GemEvent::HsmsSelected => "hsms_selected",
            GemEvent::HsmsDisconnected => "hsms_disconnected",
            GemEvent::CommunicationStateChanged { .. } => "communication_state_changed",
            GemEvent::Communicating => "communicating",
            GemEvent::ControlStateChanged { .. } => "control_state_changed",
            GemEvent::CollectionEvent { .. } => "collection_event",
            GemEvent::EventReportReceived { .. } => "event_report_received",
        }
    }

    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            GemEvent::CommunicationStateChanged { .. } | GemEvent::ControlStateChanged { .. }
        )
    }

    pub fn description(&self) -> String {
        match self {
            GemEvent::HsmsConnected => "hsms connected".to_string(),
            GemEvent::HsmsSelected => "hsms selected".to_string(),
            GemEvent::HsmsDisconnected => "hsms disconnected".to_string(),
            GemEvent::CommunicationStateChanged { from, to } => {
                format!("communication state {} -> {}", from, to)
            }
            GemEvent::Communicating => "communicating".to_string(),
            GemEvent::ControlStateChanged { from, to } => {
                format!("control state {} -> {}", from, to)
            }
            GemEvent::CollectionEvent { ceid } => format!("collection event {}", ceid),
            GemEvent::EventReportReceived { ceid: Some(ceid), .. } => {
                format!("event report {}", ceid)
            }
            GemEvent::EventReportReceived { ceid: None, .. } => "event report".to_string(),
        }
    }
}

/// Receiver of GEM events
///
/// Called on the task that produced the event; must not block.
pub trait GemEventListener: Send + Sync {
    fn on_event(&self, event: GemEvent);
}

/// Listener forwarding events to a callback
pub struct CallbackEventListener<F>
where
    F: Fn(GemEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackEventListener<F>
where
    F: Fn(GemEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> GemEventListener for CallbackEventListener<F>
where
    F: Fn(GemEvent) + Send + Sync,
{
    fn on_event(&self, event: GemEvent) {
        (self.callback)(event);
    }
}

/// Listener forwarding events into an unbounded channel
pub struct ChannelEventListener {
    sender: UnboundedSender<GemEvent>,
}

impl ChannelEventListener {
    pub fn new() -> (Self, UnboundedReceiver<GemEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl GemEventListener for ChannelEventListener {
    fn on_event(&self, event: GemEvent) {
        // the receiver may be gone
        let _ = self.sender.send(event);
    }
}

/// Fan-out of events to registered listeners
#[derive(Default)]
pub struct EventProducer {
    listeners: RwLock<Vec<Arc<dyn GemEventListener>>>,
}

impl EventProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn GemEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Deliver `event` to every listener in registration order
    pub fn fire(&self, event: GemEvent) {
        log::debug!("gem event: {}", event.description());
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener.on_event(event.clone());
        }
    }
}

impl std::fmt::Debug for EventProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProducer")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
