//! Bluetooth LE adapter backed by btleplug
//!
//! Uses the first adapter the platform reports. Characteristic handles are
//! resolved against the peripheral's cached GATT table, so
//! `discover_service` must run before `get_characteristic`.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{
    CharacteristicHandle, ConnectionHandle, DisconnectCallback, NotifyCallback, PeripheralHandle,
    Result, ServiceHandle, SubscriptionHandle, Transport,
};
use crate::channel::SERVICE_UUID;
use crate::error::TransportError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

type Subscribers = Arc<Mutex<HashMap<Uuid, NotifyCallback>>>;

struct Link {
    peripheral: Peripheral,
    characteristics: HashMap<Uuid, Characteristic>,
    subscribers: Subscribers,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct BtleState {
    next_connection_id: u64,
    /// Peripherals seen by the last scan, keyed by platform id
    found: HashMap<String, Peripheral>,
    links: HashMap<u64, Link>,
}

pub struct BtleTransport {
    adapter: Adapter,
    scan_timeout: Duration,
    state: Arc<Mutex<BtleState>>,
}

fn link_error(e: btleplug::Error) -> TransportError {
    TransportError::Link(e.to_string())
}

/// Scan failures are often transient on BlueZ, so they stay retryable
fn scan_error(e: btleplug::Error) -> TransportError {
    TransportError::Link(format!("scan failed: {}", e))
}

impl BtleTransport {
    /// Open the first Bluetooth adapter
    ///
    /// Fails with `NotSupported` when the platform has no usable radio.
    pub async fn new(scan_timeout: Duration) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::NotSupported(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::NotSupported(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::NotSupported("no Bluetooth adapter found".to_string()))?;

        if let Ok(info) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter {}", info);
        }

        Ok(Self {
            adapter,
            scan_timeout,
            state: Arc::new(Mutex::new(BtleState {
                next_connection_id: 1,
                ..BtleState::default()
            })),
        })
    }

    fn peripheral(&self, connection: u64) -> Result<Peripheral> {
        self.state
            .lock()
            .links
            .get(&connection)
            .map(|l| l.peripheral.clone())
            .ok_or_else(|| TransportError::Link("not connected".to_string()))
    }

    fn characteristic(&self, handle: &CharacteristicHandle) -> Result<(Peripheral, Characteristic)> {
        let state = self.state.lock();
        let link = state
            .links
            .get(&handle.connection)
            .ok_or_else(|| TransportError::Link("not connected".to_string()))?;
        let characteristic = link
            .characteristics
            .get(&handle.uuid)
            .cloned()
            .ok_or_else(|| TransportError::CharacteristicNotFound(handle.uuid.to_string()))?;
        Ok((link.peripheral.clone(), characteristic))
    }

    /// Poll the adapter until a peripheral advertising `name_filter` shows up
    async fn find_by_name(&self, name_filter: &str) -> Peripheral {
        loop {
            let peripherals = self.adapter.peripherals().await.unwrap_or_default();
            for p in peripherals {
                if let Ok(Some(props)) = p.properties().await {
                    if props.local_name.as_deref() == Some(name_filter) {
                        return p;
                    }
                }
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    }
}

/// Poll `is_connected` every `every` until it reports the link down
async fn poll_until_down<F, Fut>(every: Duration, mut is_connected: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if !is_connected().await {
            return;
        }
    }
}

#[async_trait]
impl Transport for BtleTransport {
    fn name(&self) -> &str {
        "btleplug"
    }

    async fn discover_peripheral(&self, name_filter: &str) -> Result<PeripheralHandle> {
        self.adapter
            .start_scan(ScanFilter {
                services: vec![SERVICE_UUID],
            })
            .await
            .map_err(scan_error)?;
        debug!("Scanning for '{}' ({:?})", name_filter, self.scan_timeout);

        let found = tokio::time::timeout(self.scan_timeout, self.find_by_name(name_filter))
            .await
            .ok();
        self.adapter.stop_scan().await.ok();

        let peripheral =
            found.ok_or_else(|| TransportError::NoDeviceFound(name_filter.to_string()))?;
        let id = peripheral.id().to_string();
        self.state.lock().found.insert(id.clone(), peripheral);

        Ok(PeripheralHandle {
            id,
            name: name_filter.to_string(),
        })
    }

    async fn connect(&self, handle: &PeripheralHandle) -> Result<ConnectionHandle> {
        let peripheral = self
            .state
            .lock()
            .found
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| TransportError::NoDeviceFound(handle.name.clone()))?;

        // BlueZ can block forever on Device1.Connect when the device is out of range
        tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect())
            .await
            .map_err(|_| TransportError::ConnectionFailed("connect timed out".to_string()))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let mut notifications = peripheral.notifications().await.map_err(link_error)?;
        let subscribers: Subscribers = Arc::default();
        let routes = Arc::clone(&subscribers);
        let pump = tokio::spawn(async move {
            while let Some(n) = notifications.next().await {
                trace!("Notification {} {:02X?}", n.uuid, n.value);
                let callback = routes.lock().get(&n.uuid).cloned();
                if let Some(callback) = callback {
                    callback(n.value);
                }
            }
        });

        let mut state = self.state.lock();
        let id = state.next_connection_id;
        state.next_connection_id += 1;
        state.links.insert(
            id,
            Link {
                peripheral,
                characteristics: HashMap::new(),
                subscribers,
                pump,
            },
        );
        info!("🔗 Connected to '{}' ({})", handle.name, handle.id);

        Ok(ConnectionHandle {
            id,
            peripheral: handle.clone(),
        })
    }

    async fn discover_service(
        &self,
        conn: &ConnectionHandle,
        service_id: Uuid,
    ) -> Result<ServiceHandle> {
        let peripheral = self.peripheral(conn.id)?;

        tokio::time::timeout(DISCOVERY_TIMEOUT, peripheral.discover_services())
            .await
            .map_err(|_| TransportError::Link("service discovery timed out".to_string()))?
            .map_err(link_error)?;

        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service_id)
            .ok_or_else(|| TransportError::ServiceNotFound(service_id.to_string()))?;

        if let Some(link) = self.state.lock().links.get_mut(&conn.id) {
            link.characteristics = service
                .characteristics
                .into_iter()
                .map(|c| (c.uuid, c))
                .collect();
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
        let state = self.state.lock();
        let link = state
            .links
            .get(&service.connection)
            .ok_or_else(|| TransportError::Link("not connected".to_string()))?;

        match link.characteristics.get(&wire_id) {
            Some(c) if c.service_uuid == service.uuid => Ok(CharacteristicHandle {
                connection: service.connection,
                service: service.uuid,
                uuid: wire_id,
            }),
            _ => Err(TransportError::CharacteristicNotFound(wire_id.to_string())),
        }
    }

    async fn read(&self, handle: &CharacteristicHandle) -> Result<Vec<u8>> {
        let (peripheral, characteristic) = self.characteristic(handle)?;
        peripheral.read(&characteristic).await.map_err(link_error)
    }

    async fn write(&self, handle: &CharacteristicHandle, bytes: &[u8]) -> Result<()> {
        let (peripheral, characteristic) = self.characteristic(handle)?;
        peripheral
            .write(&characteristic, bytes, WriteType::WithResponse)
            .await
            .map_err(link_error)
    }

    async fn subscribe(
        &self,
        handle: &CharacteristicHandle,
        on_change: NotifyCallback,
    ) -> Result<SubscriptionHandle> {
        let (peripheral, characteristic) = self.characteristic(handle)?;

        // Route before enabling so no early notification is lost
        let subscribers = self
            .state
            .lock()
            .links
            .get(&handle.connection)
            .map(|l| Arc::clone(&l.subscribers))
            .ok_or_else(|| TransportError::Link("not connected".to_string()))?;
        subscribers.lock().insert(handle.uuid, on_change);

        if let Err(e) = peripheral.subscribe(&characteristic).await {
            subscribers.lock().remove(&handle.uuid);
            return Err(link_error(e));
        }

        Ok(SubscriptionHandle {
            connection: handle.connection,
            characteristic: handle.uuid,
        })
    }

    fn on_disconnected(&self, conn: &ConnectionHandle, callback: DisconnectCallback) {
        let peripheral = match self.peripheral(conn.id) {
            Ok(p) => p,
            Err(_) => return callback(),
        };
        let adapter = self.adapter.clone();
        let state = Arc::clone(&self.state);
        let connection = conn.id;

        tokio::spawn(async move {
            // Subscribe before checking so a drop in between is not missed
            let events = adapter.events().await;
            if !peripheral.is_connected().await.unwrap_or(false) {
                debug!("Connection #{} already down", connection);
            } else {
                match events {
                    Ok(mut events) => {
                        let target = peripheral.id();
                        while let Some(event) = events.next().await {
                            if let CentralEvent::DeviceDisconnected(id) = event {
                                if id == target {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Could not watch adapter events, polling link instead: {}", e);
                        let peripheral = &peripheral;
                        poll_until_down(SCAN_POLL_INTERVAL, move || async move {
                            peripheral.is_connected().await.unwrap_or(false)
                        })
                        .await;
                    }
                }
            }

            if let Some(link) = state.lock().links.remove(&connection) {
                link.pump.abort();
            }
            callback();
        });
    }

    async fn disconnect(&self, conn: &ConnectionHandle) -> Result<()> {
        let peripheral = match self.peripheral(conn.id) {
            Ok(p) => p,
            // Already gone
            Err(_) => return Ok(()),
        };
        peripheral.disconnect().await.map_err(link_error)?;
        if let Some(link) = self.state.lock().links.remove(&conn.id) {
            link.pump.abort();
        }
        Ok(())
    }
}
