//! SessionManager - handle for communicating with the SessionActor
//!
//! Cheap to clone; every clone talks to the same actor. Requests are
//! answered as soon as the actor has validated them and issued the first
//! transport call, so none of these methods wait on the radio.

use tokio::sync::{mpsc, oneshot, watch};

use super::commands::{Reply, SessionCommand};
use super::observer::{EventCallback, Observers, SubscriptionId};
use super::types::{SessionEvent, SessionSnapshot};
use crate::channel::Channel;
use crate::error::SessionError;

#[derive(Clone)]
pub struct SessionManager {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    observers: Observers,
}

impl SessionManager {
    pub(crate) fn new(
        cmd_tx: mpsc::UnboundedSender<SessionCommand>,
        snapshot_rx: watch::Receiver<SessionSnapshot>,
        observers: Observers,
    ) -> Self {
        Self {
            cmd_tx,
            snapshot_rx,
            observers,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Start scanning for the peripheral
    ///
    /// Fails with `AlreadyConnected` unless the session is Disconnected.
    /// Progress and failures are reported through connection status events.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(|response| SessionCommand::Connect { response })
            .await
    }

    /// Close the link without auto-retry. No-op when already disconnected.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|response| SessionCommand::Disconnect { response })
            .await
    }

    /// Write `value` to `channel`
    ///
    /// Returns once the write is issued. The outcome arrives as either a
    /// `ChannelChanged` + `LastCommandSent` pair or a `CommandFailed` event.
    pub async fn send_command(&self, channel: Channel, value: u8) -> Result<(), SessionError> {
        self.request(|response| SessionCommand::SendCommand {
            channel,
            value,
            response,
        })
        .await
    }

    /// Latest published state, without waiting on the actor
    pub fn current_state(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Stream of every event published from now on
    pub fn events(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        self.observers.channel()
    }

    /// Close the link and stop the actor
    ///
    /// Later requests on any clone fail with `Closed`.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::Shutdown { response: tx })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.snapshot_rx.borrow().state)
            .field("observers", &self.observers.len())
            .finish()
    }
}
