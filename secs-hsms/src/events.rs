//! Connection events and the handler interface
//!
//! Everything a protocol reports upwards goes through one ordered channel:
//! connection events and data messages that are not replies to an
//! outstanding request. Handlers receive them one at a time, in arrival
//! order, on the protocol's dispatch task.

use crate::message::HsmsMessage;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Change of the HSMS connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsmsEvent {
    /// TCP connection established
    Connected,
    /// Select procedure completed, data may flow
    Selected,
    /// Peer deselected
    Deselected,
    /// TCP connection gone
    Disconnected,
}

impl HsmsEvent {
    pub fn is_communication_ready(&self) -> bool {
        matches!(self, HsmsEvent::Selected)
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, HsmsEvent::Disconnected)
    }

    pub fn description(&self) -> &'static str {
        match self {
            HsmsEvent::Connected => "connection established",
            HsmsEvent::Selected => "connection selected",
            HsmsEvent::Deselected => "connection deselected",
            HsmsEvent::Disconnected => "connection closed",
        }
    }
}

impl fmt::Display for HsmsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One item on the dispatch channel
#[derive(Debug, Clone)]
pub enum HsmsDispatch {
    Event(HsmsEvent),
    Message(HsmsMessage),
}

/// Receiver of connection events and unsolicited data messages
#[async_trait]
pub trait HsmsHandler: Send + Sync {
    async fn on_connection_event(&self, event: HsmsEvent);

    async fn on_data_message(&self, message: HsmsMessage);
}

/// Handler forwarding everything to a callback
pub struct CallbackHandler<F>
where
    F: Fn(HsmsDispatch) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(HsmsDispatch) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> HsmsHandler for CallbackHandler<F>
where
    F: Fn(HsmsDispatch) + Send + Sync,
{
    async fn on_connection_event(&self, event: HsmsEvent) {
        (self.callback)(HsmsDispatch::Event(event));
    }

    async fn on_data_message(&self, message: HsmsMessage) {
        (self.callback)(HsmsDispatch::Message(message));
    }
}

/// Handler forwarding everything into an unbounded channel
pub struct ChannelHandler {
    sender: UnboundedSender<HsmsDispatch>,
}

impl ChannelHandler {
    pub fn new() -> (Self, UnboundedReceiver<HsmsDispatch>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, item: HsmsDispatch) {
        if self.sender.send(item).is_err() {
            log::debug!("hsms channel handler: receiver dropped");
        }
    }
}

#[async_trait]
impl HsmsHandler for ChannelHandler {
    async fn on_connection_event(&self, event: HsmsEvent) {
        self.forward(HsmsDispatch::Event(event));
    }

    async fn on_data_message(&self, message: HsmsMessage) {
        self.forward(HsmsDispatch::Message(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_event_helpers() {
        assert!(HsmsEvent::Selected.is_communication_ready());
        assert!(!HsmsEvent::Connected.is_communication_ready());
        assert!(HsmsEvent::Disconnected.is_connection_lost());
        assert_eq!(HsmsEvent::Deselected.to_string(), "connection deselected");
    }

    #[tokio::test]
    async fn test_callback_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = CallbackHandler::new(move |item| {
            if let HsmsDispatch::Event(event) = item {
                sink.lock().unwrap().push(event);
            }
        });
        handler.on_connection_event(HsmsEvent::Connected).await;
        handler.on_data_message(HsmsMessage::linktest_req(1)).await;
        assert_eq!(*seen.lock().unwrap(), vec![HsmsEvent::Connected]);
    }

    #[tokio::test]
    async fn test_channel_handler() {
        let (handler, mut receiver) = ChannelHandler::new();
        handler.on_connection_event(HsmsEvent::Selected).await;
        handler.on_data_message(HsmsMessage::linktest_req(9)).await;

        assert!(matches!(
            receiver.recv().await,
            Some(HsmsDispatch::Event(HsmsEvent::Selected))
        ));
        match receiver.recv().await {
            Some(HsmsDispatch::Message(message)) => assert_eq!(message.header.system, 9),
            other => panic!("unexpected {other:?}"),
        }
    }
}
