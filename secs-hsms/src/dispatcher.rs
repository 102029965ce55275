//! Reply routing for outstanding requests

use crate::message::HsmsMessage;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Outstanding requests keyed by system bytes
///
/// A reply is delivered to the waiter registered under its system bytes.
/// Clearing the table drops every waiter, which then sees the request as
/// unanswered.
#[derive(Debug, Default)]
pub struct PendingReplies {
    slots: Mutex<HashMap<u32, oneshot::Sender<HsmsMessage>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<HsmsMessage>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a waiter for `system`
    pub fn register(&self, system: u32) -> oneshot::Receiver<HsmsMessage> {
        let (sender, receiver) = oneshot::channel();
        if self.slots().insert(system, sender).is_some() {
            log::warn!("hsms: replaced outstanding request with system {:#010x}", system);
        }
        receiver
    }

    pub fn is_pending(&self, system: u32) -> bool {
        self.slots().contains_key(&system)
    }

    /// Hand `message` to its waiter; gives the message back if nobody waits
    pub fn deliver(&self, message: HsmsMessage) -> Result<(), HsmsMessage> {
        let sender = self.slots().remove(&message.header.system);
        match sender {
            Some(sender) => sender.send(message),
            None => Err(message),
        }
    }

    pub fn remove(&self, system: u32) {
        self.slots().remove(&system);
    }

    pub fn clear(&self) {
        self.slots().clear();
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}
