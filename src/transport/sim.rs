//! Simulated peripheral
//!
//! An in-process stand-in for the controller: six byte-valued
//! characteristics behind the real service and characteristic UUIDs. The
//! paired [`SimControl`] lets hosts and tests push notifications, drop the
//! link, inject failures at any discovery step, and hold writes open until
//! they are explicitly acknowledged.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    CharacteristicHandle, ConnectionHandle, DisconnectCallback, NotifyCallback, PeripheralHandle,
    Result, ServiceHandle, SubscriptionHandle, Transport,
};
use crate::channel::{Channel, DEFAULT_DEVICE_NAME, SERVICE_UUID};
use crate::error::TransportError;
use crate::payload::PayloadEncoding;

/// Initial settings for a simulated peripheral
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Advertised local name
    pub name: String,
    /// Encoding used for read and notification payloads
    pub encoding: PayloadEncoding,
    /// Push a notification after every acknowledged write
    pub notify_on_write: bool,
    /// Delay applied to every operation
    pub latency: Duration,
    pub initial_values: BTreeMap<Channel, u8>,
}

impl Default for SimConfig {
    fn default() -> Self {
        // Values a freshly booted controller reports
        let initial_values = BTreeMap::from([
            (Channel::Program, 1),
            (Channel::Mode, 1),
            (Channel::Brightness, 155),
            (Channel::Speed, 5),
            (Channel::Palette, 0),
            (Channel::Control, 0),
        ]);
        Self {
            name: DEFAULT_DEVICE_NAME.to_string(),
            encoding: PayloadEncoding::Raw,
            notify_on_write: false,
            latency: Duration::ZERO,
            initial_values,
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    not_supported: bool,
    absent: bool,
    connect: bool,
    service: bool,
    characteristic: HashSet<Channel>,
    subscribe: HashSet<Channel>,
    read: HashSet<Channel>,
    write: HashSet<Channel>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    scans: usize,
    connects: usize,
    reads: usize,
    writes: usize,
}

struct LiveLink {
    id: u64,
    subscribers: HashMap<Channel, NotifyCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

struct SimState {
    config: SimConfig,
    values: BTreeMap<Channel, u8>,
    faults: Faults,
    counters: Counters,
    link: Option<LiveLink>,
    next_connection_id: u64,
    held_channels: HashSet<Channel>,
    held_writes: HashMap<Channel, VecDeque<oneshot::Sender<bool>>>,
    hold_connect: bool,
    connect_waiters: Vec<oneshot::Sender<()>>,
    /// Value changes pushed right after the next read of a channel is answered
    after_read: HashMap<Channel, u8>,
}

impl SimState {
    fn live(&self, connection: u64) -> Result<&LiveLink> {
        match &self.link {
            Some(link) if link.id == connection => Ok(link),
            _ => Err(TransportError::Link("not connected".to_string())),
        }
    }

    fn encode_value(&self, value: u8) -> Vec<u8> {
        match self.config.encoding {
            PayloadEncoding::Raw => vec![value],
            PayloadEncoding::Text => value.to_string().into_bytes(),
        }
    }
}

fn channel_for(uuid: &Uuid) -> Result<Channel> {
    Channel::from_wire_id(uuid)
        .ok_or_else(|| TransportError::CharacteristicNotFound(uuid.to_string()))
}

/// Simulated transport backend
#[derive(Clone)]
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimTransport {
    pub fn new(config: SimConfig) -> Self {
        let values = config.initial_values.clone();
        Self {
            state: Arc::new(Mutex::new(SimState {
                config,
                values,
                faults: Faults::default(),
                counters: Counters::default(),
                link: None,
                next_connection_id: 1,
                held_channels: HashSet::new(),
                held_writes: HashMap::new(),
                hold_connect: false,
                connect_waiters: Vec::new(),
                after_read: HashMap::new(),
            })),
        }
    }

    /// Control surface sharing this transport's peripheral
    pub fn control(&self) -> SimControl {
        SimControl {
            state: Arc::clone(&self.state),
        }
    }

    async fn step(&self) {
        let latency = self.state.lock().config.latency;
        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

#[async_trait]
impl Transport for SimTransport {
    fn name(&self) -> &str {
        "sim"
    }

    async fn discover_peripheral(&self, name_filter: &str) -> Result<PeripheralHandle> {
        self.step().await;
        let mut state = self.state.lock();
        state.counters.scans += 1;

        if state.faults.not_supported {
            return Err(TransportError::NotSupported(
                "simulated adapter unavailable".to_string(),
            ));
        }
        if state.faults.absent || state.config.name != name_filter {
            return Err(TransportError::NoDeviceFound(name_filter.to_string()));
        }

        Ok(PeripheralHandle {
            id: "sim:00:00:00:00:00:01".to_string(),
            name: state.config.name.clone(),
        })
    }

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<ConnectionHandle> {
        self.step().await;

        let gate = {
            let mut state = self.state.lock();
            state.counters.connects += 1;
            if state.hold_connect {
                let (tx, rx) = oneshot::channel();
                state.connect_waiters.push(tx);
                Some(rx)
            } else {
                None
            }
        };
        if let Some(rx) = gate {
            let _ = rx.await;
        }

        let mut state = self.state.lock();
        if state.faults.connect || state.faults.absent {
            return Err(TransportError::ConnectionFailed(
                "simulated GATT connect refused".to_string(),
            ));
        }
        if state.link.is_some() {
            return Err(TransportError::ConnectionFailed(
                "peripheral already connected".to_string(),
            ));
        }

        let id = state.next_connection_id;
        state.next_connection_id += 1;
        state.link = Some(LiveLink {
            id,
            subscribers: HashMap::new(),
            on_disconnect: None,
        });
        debug!("sim: connection #{} opened", id);

        Ok(ConnectionHandle {
            id,
            peripheral: peripheral.clone(),
        })
    }

    async fn discover_service(
        &self,
        conn: &ConnectionHandle,
        service_id: Uuid,
    ) -> Result<ServiceHandle> {
        self.step().await;
        let state = self.state.lock();
        state.live(conn.id)?;

        if state.faults.service || service_id != SERVICE_UUID {
            return Err(TransportError::ServiceNotFound(service_id.to_string()));
        }
        Ok(ServiceHandle {
            connection: conn.id,
            uuid: service_id,
        })
    }

    async fn get_characteristic(
        &self,
        service: &ServiceHandle,
        wire_id: Uuid,
    ) -> Result<CharacteristicHandle> {
        self.step().await;
        let state = self.state.lock();
        state.live(service.connection)?;

        let channel = channel_for(&wire_id)?;
        if state.faults.characteristic.contains(&channel) {
            return Err(TransportError::CharacteristicNotFound(wire_id.to_string()));
        }
        Ok(CharacteristicHandle {
            connection: service.connection,
            service: service.uuid,
            uuid: wire_id,
        })
    }

    async fn read(&self, characteristic: &CharacteristicHandle) -> Result<Vec<u8>> {
        self.step().await;
        let mut state = self.state.lock();
        state.live(characteristic.connection)?;
        state.counters.reads += 1;

        let channel = channel_for(&characteristic.uuid)?;
        if state.faults.read.contains(&channel) {
            return Err(TransportError::Link(format!("read of {} failed", channel)));
        }
        let value = state.values.get(&channel).copied().unwrap_or(0);
        let answer = state.encode_value(value);

        let Some(next) = state.after_read.remove(&channel) else {
            return Ok(answer);
        };
        state.values.insert(channel, next);
        let payload = state.encode_value(next);
        let callback = state
            .link
            .as_ref()
            .and_then(|l| l.subscribers.get(&channel).cloned());
        drop(state);

        if let Some(callback) = callback {
            callback(payload);
        }
        Ok(answer)
    }

    async fn write(&self, characteristic: &CharacteristicHandle, bytes: &[u8]) -> Result<()> {
        self.step().await;
        let channel = channel_for(&characteristic.uuid)?;

        let gate = {
            let mut state = self.state.lock();
            state.live(characteristic.connection)?;
            state.counters.writes += 1;
            trace!("sim: write {:02X?} to {}", bytes, channel);

            if state.held_channels.contains(&channel) {
                let (tx, rx) = oneshot::channel();
                state.held_writes.entry(channel).or_default().push_back(tx);
                Some(rx)
            } else {
                None
            }
        };

        let acked = match gate {
            Some(rx) => rx.await.unwrap_or(false),
            None => true,
        };

        let notify = {
            let mut state = self.state.lock();
            state.live(characteristic.connection)?;
            if !acked || state.faults.write.contains(&channel) {
                return Err(TransportError::Link(format!(
                    "write to {} rejected by peripheral",
                    channel
                )));
            }
            let value = *bytes
                .first()
                .ok_or_else(|| TransportError::Link("empty write".to_string()))?;
            state.values.insert(channel, value);

            if state.config.notify_on_write {
                let payload = state.encode_value(value);
                state
                    .link
                    .as_ref()
                    .and_then(|l| l.subscribers.get(&channel).cloned())
                    .map(|cb| (cb, payload))
            } else {
                None
            }
        };

        if let Some((callback, payload)) = notify {
            callback(payload);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: &CharacteristicHandle,
        on_change: NotifyCallback,
    ) -> Result<SubscriptionHandle> {
        self.step().await;
        let mut state = self.state.lock();
        state.live(characteristic.connection)?;

        let channel = channel_for(&characteristic.uuid)?;
        if state.faults.subscribe.contains(&channel) {
            return Err(TransportError::Link(format!(
                "enabling notifications on {} failed",
                channel
            )));
        }
        if let Some(link) = state.link.as_mut() {
            link.subscribers.insert(channel, on_change);
        }
        Ok(SubscriptionHandle {
            connection: characteristic.connection,
            characteristic: characteristic.uuid,
        })
    }

    fn on_disconnected(&self, conn: &ConnectionHandle, callback: DisconnectCallback) {
        let orphaned = {
            let mut state = self.state.lock();
            match state.link.as_mut() {
                Some(link) if link.id == conn.id => {
                    link.on_disconnect = Some(callback);
                    None
                }
                _ => Some(callback),
            }
        };
        // Link is already gone; report it right away
        if let Some(callback) = orphaned {
            callback();
        }
    }

    async fn disconnect(&self, conn: &ConnectionHandle) -> Result<()> {
        self.step().await;
        let control = self.control();
        control.close_link(Some(conn.id));
        Ok(())
    }
}

/// Handle for steering a [`SimTransport`] from outside the session
#[derive(Clone)]
pub struct SimControl {
    state: Arc<Mutex<SimState>>,
}

impl SimControl {
    /// Push a notification carrying `value` for `channel`
    ///
    /// Updates the stored value. Returns false when nobody is subscribed.
    pub fn notify(&self, channel: Channel, value: u8) -> bool {
        let (callback, payload) = {
            let mut state = self.state.lock();
            state.values.insert(channel, value);
            let payload = state.encode_value(value);
            let callback = state
                .link
                .as_ref()
                .and_then(|l| l.subscribers.get(&channel).cloned());
            (callback, payload)
        };
        match callback {
            Some(cb) => {
                cb(payload);
                true
            }
            None => false,
        }
    }

    /// Push an arbitrary payload without touching the stored value
    pub fn notify_raw(&self, channel: Channel, payload: Vec<u8>) -> bool {
        let callback = self
            .state
            .lock()
            .link
            .as_ref()
            .and_then(|l| l.subscribers.get(&channel).cloned());
        match callback {
            Some(cb) => {
                cb(payload);
                true
            }
            None => false,
        }
    }

    /// Simulate a remote link drop. Returns false when not connected.
    pub fn drop_link(&self) -> bool {
        self.close_link(None)
    }

    fn close_link(&self, only: Option<u64>) -> bool {
        let (callback, held) = {
            let mut state = self.state.lock();
            let matches = match (&state.link, only) {
                (Some(link), Some(id)) => link.id == id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                return false;
            }
            let link = state.link.take();
            let held: Vec<_> = state
                .held_writes
                .drain()
                .flat_map(|(_, queue)| queue.into_iter())
                .collect();
            (link.and_then(|l| l.on_disconnect), held)
        };

        debug!("sim: link closed");
        for waiter in held {
            let _ = waiter.send(false);
        }
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    pub fn set_present(&self, present: bool) {
        self.state.lock().faults.absent = !present;
    }

    pub fn set_supported(&self, supported: bool) {
        self.state.lock().faults.not_supported = !supported;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().faults.connect = fail;
    }

    pub fn fail_service(&self, fail: bool) {
        self.state.lock().faults.service = fail;
    }

    pub fn fail_characteristic(&self, channel: Channel, fail: bool) {
        toggle(&mut self.state.lock().faults.characteristic, channel, fail);
    }

    pub fn fail_subscribe(&self, channel: Channel, fail: bool) {
        toggle(&mut self.state.lock().faults.subscribe, channel, fail);
    }

    pub fn fail_read(&self, channel: Channel, fail: bool) {
        toggle(&mut self.state.lock().faults.read, channel, fail);
    }

    pub fn fail_writes(&self, channel: Channel, fail: bool) {
        toggle(&mut self.state.lock().faults.write, channel, fail);
    }

    /// Park writes to `channel` until [`release_write`](Self::release_write)
    pub fn hold_writes(&self, channel: Channel, hold: bool) {
        toggle(&mut self.state.lock().held_channels, channel, hold);
    }

    /// Resolve the oldest parked write on `channel`
    pub fn release_write(&self, channel: Channel, ack: bool) -> bool {
        let waiter = self
            .state
            .lock()
            .held_writes
            .get_mut(&channel)
            .and_then(|q| q.pop_front());
        match waiter {
            Some(tx) => tx.send(ack).is_ok(),
            None => false,
        }
    }

    pub fn held_writes(&self, channel: Channel) -> usize {
        self.state
            .lock()
            .held_writes
            .get(&channel)
            .map_or(0, |q| q.len())
    }

    /// Change `channel` to `value` and notify it right after its next read
    /// has been answered with the previous value
    pub fn change_after_read(&self, channel: Channel, value: u8) {
        self.state.lock().after_read.insert(channel, value);
    }

    /// Park GATT connects until [`release_connect`](Self::release_connect)
    pub fn hold_connect(&self, hold: bool) {
        self.state.lock().hold_connect = hold;
    }

    pub fn release_connect(&self) {
        let waiters: Vec<_> = self.state.lock().connect_waiters.drain(..).collect();
        for tx in waiters {
            let _ = tx.send(());
        }
    }

    pub fn value(&self, channel: Channel) -> Option<u8> {
        self.state.lock().values.get(&channel).copied()
    }

    pub fn set_value(&self, channel: Channel, value: u8) {
        self.state.lock().values.insert(channel, value);
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().link.is_some()
    }

    pub fn scan_count(&self) -> usize {
        self.state.lock().counters.scans
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().counters.connects
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().counters.reads
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().counters.writes
    }
}

fn toggle(set: &mut HashSet<Channel>, channel: Channel, on: bool) {
    if on {
        set.insert(channel);
    } else {
        set.remove(&channel);
    }
}
