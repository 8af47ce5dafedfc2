//! Observer registry
//!
//! Callbacks are invoked on the session task, in publish order, so each
//! subscriber sees events for a channel in the order the peripheral sent
//! them.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::types::SessionEvent;

/// Type alias for session event callbacks
pub type EventCallback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Identifier returned by [`Observers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    callbacks: Vec<(SubscriptionId, EventCallback)>,
    senders: Vec<(SubscriptionId, mpsc::UnboundedSender<SessionEvent>)>,
}

impl ObserverList {
    fn next_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }
}

/// Shared list of event subscribers
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<RwLock<ObserverList>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        let mut list = self.inner.write();
        let id = list.next_id();
        list.callbacks.push((id, callback));
        id
    }

    /// Register a channel-backed subscriber and return its receiving end
    ///
    /// The channel is unbounded so no event is ever dropped. The subscriber
    /// is removed on the first publish after its receiver goes away.
    pub fn channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut list = self.inner.write();
        let id = list.next_id();
        list.senders.push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut list = self.inner.write();
        let before = list.callbacks.len() + list.senders.len();
        list.callbacks.retain(|(sid, _)| *sid != id);
        list.senders.retain(|(sid, _)| *sid != id);
        list.callbacks.len() + list.senders.len() != before
    }

    pub fn len(&self) -> usize {
        let list = self.inner.read();
        list.callbacks.len() + list.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every subscriber
    pub fn publish(&self, event: &SessionEvent) {
        // Snapshot first so a callback may subscribe or unsubscribe
        let callbacks: Vec<EventCallback> = self
            .inner
            .read()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event);
        }

        self.inner
            .write()
            .senders
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}
