//! SessionActor - single owner of the device session
//!
//! All session state lives in one task and is mutated only while handling a
//! mailbox message. Transport calls never run inside the loop: each one is
//! spawned and posts its completion back, tagged with the epoch it was
//! started in. Tearing a session down bumps the epoch, which turns every
//! late completion from that session into a no-op.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──link opened──▶ Discovering
//!      ▲  ▲                       │                          │
//!      │  └──── step failed ──────┴──────── step failed ─────┤
//!      │                                                     │ all six read
//!      │        link lost (auto-reconnect)                   ▼
//!      ├──────────────────────────────────────────────────  Ready
//!      │                                                     │ disconnect()
//!      └──────────── transport disconnect done ──── Disconnecting
//! ```

use chrono::Local;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use super::commands::{Epoch, SessionCommand};
use super::manager::SessionManager;
use super::observer::Observers;
use super::types::{
    ChannelState, ConnectionStatus, Freshness, PendingWrite, SessionEvent, SessionSnapshot,
    SessionState,
};
use super::SessionOptions;
use crate::channel::{Channel, SERVICE_UUID};
use crate::error::{ErrorKind, SessionError, TransportError};
use crate::payload;
use crate::transport::{CharacteristicHandle, ConnectionHandle, ServiceHandle, Transport};

type Mailbox = mpsc::WeakUnboundedSender<SessionCommand>;

/// Post a completion to the actor, if it is still running
fn post(mailbox: &Mailbox, cmd: SessionCommand) {
    if let Some(tx) = mailbox.upgrade() {
        let _ = tx.send(cmd);
    }
}

pub(crate) struct SessionActor {
    transport: Arc<dyn Transport>,
    options: SessionOptions,

    state: SessionState,
    channels: BTreeMap<Channel, ChannelState>,
    pending: HashMap<Channel, PendingWrite>,
    characteristics: HashMap<Channel, CharacteristicHandle>,
    /// Latest notified value for channels whose initial read is still in flight
    early_values: HashMap<Channel, u8>,
    connection: Option<ConnectionHandle>,

    /// Generation of the current connection attempt
    epoch: Epoch,
    /// Set when Ready is reached; an explicit disconnect clears it
    resume_on_drop: bool,
    reconnect_attempt: u32,
    /// Invalidates delayed reconnect timers
    reconnect_token: u64,

    observers: Observers,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    mailbox: Mailbox,
}

impl SessionActor {
    /// Spawn the actor on the current tokio runtime and return its handle
    pub(crate) fn spawn(transport: Arc<dyn Transport>, options: SessionOptions) -> SessionManager {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::disconnected());
        let observers = Observers::new();

        let actor = SessionActor {
            transport,
            options,
            state: SessionState::Disconnected,
            channels: SessionSnapshot::disconnected().channels,
            pending: HashMap::new(),
            characteristics: HashMap::new(),
            early_values: HashMap::new(),
            connection: None,
            epoch: 0,
            resume_on_drop: false,
            reconnect_attempt: 0,
            reconnect_token: 0,
            observers: observers.clone(),
            snapshot_tx,
            command_rx: cmd_rx,
            mailbox: cmd_tx.downgrade(),
        };

        tokio::spawn(actor.run());

        SessionManager::new(cmd_tx, snapshot_rx, observers)
    }

    async fn run(mut self) {
        debug!(
            "Session actor started (transport: {}, device: '{}')",
            self.transport.name(),
            self.options.name_filter
        );

        while let Some(cmd) = self.command_rx.recv().await {
            trace!(?cmd, "Processing command");

            match cmd {
                SessionCommand::Connect { response } => {
                    let _ = response.send(self.handle_connect());
                }
                SessionCommand::Disconnect { response } => {
                    self.handle_disconnect();
                    let _ = response.send(Ok(()));
                }
                SessionCommand::SendCommand {
                    channel,
                    value,
                    response,
                } => {
                    let _ = response.send(self.handle_send(channel, value));
                }
                SessionCommand::Shutdown { response } => {
                    self.handle_shutdown();
                    self.sync_snapshot();
                    let _ = response.send(());
                    break;
                }

                SessionCommand::PeripheralFound { epoch, result } => {
                    if self.is_current(epoch) {
                        self.on_peripheral_found(result);
                    }
                }
                SessionCommand::LinkOpened { epoch, result } => {
                    if self.is_current(epoch) {
                        self.on_link_opened(result);
                    } else if let Ok(conn) = result {
                        // Attempt was abandoned while the connect was in flight
                        self.close_in_background(conn);
                    }
                }
                SessionCommand::ChannelDiscovered {
                    epoch,
                    channel,
                    characteristic,
                    payload,
                } => {
                    if self.is_current(epoch) {
                        self.on_channel_discovered(channel, characteristic, &payload);
                    }
                }
                SessionCommand::DiscoveryFailed {
                    epoch,
                    channel,
                    error,
                } => {
                    if self.is_current(epoch) {
                        match channel {
                            Some(c) => warn!("Discovery of {} failed: {}", c, error),
                            None => warn!("Service discovery failed: {}", error),
                        }
                        self.fail_session(error);
                    }
                }
                SessionCommand::Notification {
                    epoch,
                    channel,
                    payload,
                } => {
                    if self.is_current(epoch) {
                        self.on_notification(channel, &payload);
                    }
                }
                SessionCommand::LinkLost { epoch } => {
                    if self.is_current(epoch) {
                        self.on_link_lost();
                    }
                }
                SessionCommand::WriteDone {
                    epoch,
                    channel,
                    value,
                    result,
                } => {
                    if self.is_current(epoch) {
                        self.on_write_done(channel, value, result);
                    }
                }
                SessionCommand::DisconnectDone { epoch, result } => {
                    if let Err(e) = &result {
                        warn!("Transport disconnect reported an error: {}", e);
                    }
                    if self.is_current(epoch) && self.state == SessionState::Disconnecting {
                        self.finish_disconnect();
                    }
                }
                SessionCommand::Reconnect { token } => {
                    if token == self.reconnect_token
                        && self.state == SessionState::Disconnected
                        && self.resume_on_drop
                    {
                        self.begin_attempt(self.reconnect_attempt);
                    }
                }
            }

            self.sync_snapshot();
        }

        debug!("Session actor stopped");
    }

    fn is_current(&self, epoch: Epoch) -> bool {
        if epoch != self.epoch {
            trace!("Discarding result from stale session #{}", epoch);
            return false;
        }
        true
    }

    // =========================================================================
    // Caller requests
    // =========================================================================

    fn handle_connect(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::AlreadyConnected);
        }
        self.reconnect_token += 1;
        self.reconnect_attempt = 0;
        self.begin_attempt(0);
        Ok(())
    }

    fn handle_disconnect(&mut self) {
        self.resume_on_drop = false;
        self.reconnect_token += 1;

        match self.state {
            SessionState::Disconnected | SessionState::Disconnecting => {}
            SessionState::Connecting | SessionState::Discovering => {
                info!("Aborting connection attempt");
                if let Some(conn) = self.connection.take() {
                    self.close_in_background(conn);
                }
                self.teardown();
                self.emit_status(ConnectionStatus::Disconnected);
            }
            SessionState::Ready => {
                info!("🔌 Disconnecting from peripheral");
                self.state = SessionState::Disconnecting;
                self.emit_status(ConnectionStatus::Disconnecting);

                match self.connection.clone() {
                    Some(conn) => {
                        let transport = Arc::clone(&self.transport);
                        let mailbox = self.mailbox.clone();
                        let epoch = self.epoch;
                        tokio::spawn(async move {
                            let result = transport.disconnect(&conn).await;
                            post(&mailbox, SessionCommand::DisconnectDone { epoch, result });
                        });
                    }
                    None => self.finish_disconnect(),
                }
            }
        }
    }

    fn handle_send(&mut self, channel: Channel, value: u8) -> Result<(), SessionError> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotReady);
        }
        if self.pending.contains_key(&channel) {
            return Err(SessionError::WriteInProgress(channel));
        }
        let characteristic = self
            .characteristics
            .get(&channel)
            .cloned()
            .ok_or(SessionError::NotReady)?;

        self.pending.insert(
            channel,
            PendingWrite {
                value,
                issued_at: Instant::now(),
            },
        );
        self.channels.entry(channel).or_default().freshness = Freshness::PendingWrite;
        debug!("📤 {} <- {}", channel, value);

        let transport = Arc::clone(&self.transport);
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = transport
                .write(&characteristic, &payload::encode(value))
                .await;
            post(
                &mailbox,
                SessionCommand::WriteDone {
                    epoch,
                    channel,
                    value,
                    result,
                },
            );
        });

        Ok(())
    }

    fn handle_shutdown(&mut self) {
        self.resume_on_drop = false;
        self.reconnect_token += 1;
        if let Some(conn) = self.connection.take() {
            self.close_in_background(conn);
        }
        if self.state != SessionState::Disconnected {
            self.teardown();
            self.emit_status(ConnectionStatus::Disconnected);
        }
        info!("Session manager shut down");
    }

    // =========================================================================
    // Connection sequence
    // =========================================================================

    fn begin_attempt(&mut self, attempt: u32) {
        self.epoch += 1;
        self.state = SessionState::Connecting;
        let epoch = self.epoch;

        if attempt == 0 {
            info!("🔍 Scanning for '{}'", self.options.name_filter);
        } else {
            info!(
                "🔍 Reconnect #{}: scanning for '{}'",
                attempt, self.options.name_filter
            );
        }
        self.emit_status(ConnectionStatus::Connecting { attempt });

        let transport = Arc::clone(&self.transport);
        let mailbox = self.mailbox.clone();
        let name_filter = self.options.name_filter.clone();
        tokio::spawn(async move {
            let result = transport.discover_peripheral(&name_filter).await;
            post(&mailbox, SessionCommand::PeripheralFound { epoch, result });
        });
    }

    fn on_peripheral_found(&mut self, result: Result<crate::transport::PeripheralHandle, TransportError>) {
        let peripheral = match result {
            Ok(p) => p,
            Err(e) => return self.fail_session(e),
        };
        debug!("Found '{}' ({})", peripheral.name, peripheral.id);

        let transport = Arc::clone(&self.transport);
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = transport.connect(&peripheral).await;
            post(&mailbox, SessionCommand::LinkOpened { epoch, result });
        });
    }

    fn on_link_opened(&mut self, result: Result<ConnectionHandle, TransportError>) {
        let conn = match result {
            Ok(c) => c,
            Err(e) => return self.fail_session(e),
        };
        debug!("GATT connection #{} open", conn.id);

        let epoch = self.epoch;
        let mailbox = self.mailbox.clone();
        self.transport.on_disconnected(
            &conn,
            Box::new(move || post(&mailbox, SessionCommand::LinkLost { epoch })),
        );

        self.connection = Some(conn.clone());
        self.state = SessionState::Discovering;
        self.characteristics.clear();
        self.early_values.clear();
        self.reset_channels();
        self.emit_status(ConnectionStatus::Discovering);

        self.spawn_discovery(conn);
    }

    /// Discover the service, then every channel concurrently
    ///
    /// Each channel reports on its own as soon as its initial read is back,
    /// so a notification for that channel can only be queued after it.
    fn spawn_discovery(&self, conn: ConnectionHandle) {
        let transport = Arc::clone(&self.transport);
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;

        tokio::spawn(async move {
            let service = match transport.discover_service(&conn, SERVICE_UUID).await {
                Ok(s) => s,
                Err(error) => {
                    post(
                        &mailbox,
                        SessionCommand::DiscoveryFailed {
                            epoch,
                            channel: None,
                            error,
                        },
                    );
                    return;
                }
            };

            let discoveries = Channel::all().iter().map(|&channel| {
                let transport = Arc::clone(&transport);
                let mailbox = mailbox.clone();
                let service = service.clone();
                async move {
                    let cmd =
                        match discover_channel(transport.as_ref(), &service, channel, epoch, &mailbox)
                            .await
                        {
                            Ok((characteristic, payload)) => SessionCommand::ChannelDiscovered {
                                epoch,
                                channel,
                                characteristic,
                                payload,
                            },
                            Err(error) => SessionCommand::DiscoveryFailed {
                                epoch,
                                channel: Some(channel),
                                error,
                            },
                        };
                    post(&mailbox, cmd);
                }
            });
            futures::future::join_all(discoveries).await;
        });
    }

    fn on_channel_discovered(
        &mut self,
        channel: Channel,
        characteristic: CharacteristicHandle,
        payload: &[u8],
    ) {
        if self.state != SessionState::Discovering {
            return;
        }
        let read = match self.options.payload_encoding.decode(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!("Initial read of {} unusable: {}", channel, e);
                return self.fail_session(e);
            }
        };
        let value = match self.early_values.remove(&channel) {
            Some(notified) => {
                debug!("{} = {} (read {}, superseded by notification)", channel, notified, read);
                notified
            }
            None => {
                debug!("{} = {}", channel, read);
                read
            }
        };

        self.channels.insert(channel, ChannelState::synced(value));
        self.characteristics.insert(channel, characteristic);

        if self.characteristics.len() == Channel::all().len() {
            self.enter_ready();
        }
    }

    fn enter_ready(&mut self) {
        self.state = SessionState::Ready;
        self.reconnect_attempt = 0;
        self.resume_on_drop = true;

        let device = self
            .connection
            .as_ref()
            .map(|c| c.peripheral.name.clone())
            .unwrap_or_default();
        let channels: BTreeMap<Channel, u8> = self
            .channels
            .iter()
            .filter_map(|(c, s)| s.value.map(|v| (*c, v)))
            .collect();

        info!("✅ Connected to '{}' ({} channels)", device, channels.len());
        self.emit_status(ConnectionStatus::Connected { device, channels });
    }

    // =========================================================================
    // Ready-state traffic
    // =========================================================================

    fn on_notification(&mut self, channel: Channel, payload: &[u8]) {
        let value = match self.options.payload_encoding.decode(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!("Dropping notification for {}: {}", channel, e);
                return;
            }
        };

        match self.state {
            SessionState::Ready => {
                let entry = self.channels.entry(channel).or_default();
                entry.value = Some(value);
                if entry.freshness != Freshness::PendingWrite {
                    entry.freshness = Freshness::Synced;
                }
                debug!("📥 {} changed: {}", channel, value);
                self.emit(SessionEvent::ChannelChanged { channel, value });
            }
            SessionState::Discovering => {
                if self.characteristics.contains_key(&channel) {
                    self.channels.insert(channel, ChannelState::synced(value));
                } else {
                    // Applied once the initial read lands
                    self.early_values.insert(channel, value);
                }
            }
            _ => trace!("Ignoring notification for {} while {}", channel, self.state),
        }
    }

    fn on_write_done(&mut self, channel: Channel, value: u8, result: Result<(), TransportError>) {
        let Some(pending) = self.pending.remove(&channel) else {
            return;
        };
        let elapsed = pending.issued_at.elapsed();

        match result {
            Ok(()) => {
                debug!("✅ {} = {} acknowledged in {:?}", channel, value, elapsed);
                self.channels.insert(channel, ChannelState::synced(value));
                self.emit(SessionEvent::ChannelChanged { channel, value });
                self.emit(SessionEvent::LastCommandSent {
                    channel,
                    value,
                    at: Local::now(),
                });
            }
            Err(e) => {
                warn!("Write of {} to {} failed after {:?}: {}", value, channel, elapsed, e);
                let entry = self.channels.entry(channel).or_default();
                entry.freshness = if entry.value.is_some() {
                    Freshness::Synced
                } else {
                    Freshness::Unread
                };
                self.emit(SessionEvent::CommandFailed {
                    channel,
                    value,
                    error: e.kind(),
                });
            }
        }
    }

    // =========================================================================
    // Teardown and recovery
    // =========================================================================

    fn on_link_lost(&mut self) {
        match self.state {
            SessionState::Ready => {
                warn!("🔌 Link to peripheral lost");
                self.connection = None;
                self.teardown();
                self.emit_status(ConnectionStatus::Disconnected);
                self.maybe_reconnect();
            }
            SessionState::Connecting | SessionState::Discovering => {
                self.connection = None;
                self.fail_session(TransportError::Link(
                    "link lost during discovery".to_string(),
                ));
            }
            SessionState::Disconnecting => self.finish_disconnect(),
            SessionState::Disconnected => {}
        }
    }

    fn fail_session(&mut self, error: TransportError) {
        let kind = error.kind();
        warn!("❌ Connection failed: {}", error);

        if let Some(conn) = self.connection.take() {
            self.close_in_background(conn);
        }
        self.teardown();
        if kind == ErrorKind::NotSupported {
            self.resume_on_drop = false;
        }
        self.emit_status(ConnectionStatus::ConnectionFailed {
            error: kind,
            message: error.to_string(),
        });

        if kind.is_recoverable() {
            self.maybe_reconnect();
        }
    }

    fn finish_disconnect(&mut self) {
        self.teardown();
        info!("Disconnected");
        self.emit_status(ConnectionStatus::Disconnected);
    }

    /// Return to Disconnected and invalidate everything in flight
    fn teardown(&mut self) {
        self.epoch += 1;
        self.state = SessionState::Disconnected;
        self.connection = None;
        self.characteristics.clear();
        self.early_values.clear();
        self.reset_channels();

        let mut abandoned: Vec<(Channel, PendingWrite)> = self.pending.drain().collect();
        abandoned.sort_by_key(|(c, _)| *c);
        for (channel, write) in abandoned {
            warn!("Write of {} to {} abandoned by teardown", write.value, channel);
            self.emit(SessionEvent::CommandFailed {
                channel,
                value: write.value,
                error: ErrorKind::TransportError,
            });
        }
    }

    fn maybe_reconnect(&mut self) {
        if !self.options.auto_reconnect || !self.resume_on_drop {
            return;
        }
        self.reconnect_attempt += 1;
        let attempt = self.reconnect_attempt;
        let delay = self.options.reconnect_delay;

        if delay.is_zero() {
            self.begin_attempt(attempt);
            return;
        }

        self.reconnect_token += 1;
        let token = self.reconnect_token;
        let mailbox = self.mailbox.clone();
        debug!("⏳ Reconnect #{} in {:?}", attempt, delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            post(&mailbox, SessionCommand::Reconnect { token });
        });
    }

    fn close_in_background(&self, conn: ConnectionHandle) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.disconnect(&conn).await {
                debug!("Closing connection #{} failed: {}", conn.id, e);
            }
        });
    }

    fn reset_channels(&mut self) {
        for channel in Channel::all() {
            self.channels.insert(*channel, ChannelState::UNREAD);
        }
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Publish the current state to `current_state()` readers
    fn sync_snapshot(&self) {
        let snapshot = SessionSnapshot {
            state: self.state,
            channels: self.channels.clone(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current != snapshot {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }

    /// Snapshot first, so observers reading `current_state()` see the change
    fn emit(&self, event: SessionEvent) {
        self.sync_snapshot();
        self.observers.publish(&event);
    }

    fn emit_status(&self, status: ConnectionStatus) {
        self.emit(SessionEvent::ConnectionStatusChanged(status));
    }
}

async fn discover_channel(
    transport: &dyn Transport,
    service: &ServiceHandle,
    channel: Channel,
    epoch: Epoch,
    mailbox: &Mailbox,
) -> Result<(CharacteristicHandle, Vec<u8>), TransportError> {
    let characteristic = transport
        .get_characteristic(service, channel.wire_id())
        .await?;

    let notify_mailbox = mailbox.clone();
    transport
        .subscribe(
            &characteristic,
            Arc::new(move |payload| {
                post(
                    &notify_mailbox,
                    SessionCommand::Notification {
                        epoch,
                        channel,
                        payload,
                    },
                )
            }),
        )
        .await?;

    let payload = transport.read(&characteristic).await?;
    Ok((characteristic, payload))
}
