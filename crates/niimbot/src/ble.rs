//! BLE transport using btleplug.
//!
//! Scans for named peripherals, connects to one, resolves the write and
//! notify characteristics and forwards notifications to the correlator.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::transport::{Device, EVENT_CHANNEL_CAPACITY, GattProfile, Transport, TransportEvent};
use crate::{NiimbotError, Result};

/// Conservative ATT payload size (185 MTU - 3).
const CHUNK_SIZE: usize = 182;

/// Delay between BLE write chunks.
const CHUNK_WRITE_DELAY: Duration = Duration::from_millis(20);

struct Link {
    peripheral: Peripheral,
    write_char: Characteristic,
    notify_char: Characteristic,
}

/// btleplug-backed [`Transport`] bound to the first BLE adapter.
pub struct BleTransport {
    adapter: Adapter,
    link: Mutex<Option<Link>>,
    /// Peripheral connected but not yet resolved into a `Link`.
    connecting: Mutex<Option<Peripheral>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl BleTransport {
    /// Initialize the platform BLE adapter (first available).
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| NiimbotError::BleConnection(e.to_string()))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| NiimbotError::BleConnection(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| NiimbotError::BleConnection("No BLE adapter found".into()))?;

        Ok(Self {
            adapter,
            link: Mutex::new(None),
            connecting: Mutex::new(None),
            forwarder: Mutex::new(None),
        })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| NiimbotError::BleConnection(e.to_string()))?;
        peripherals
            .into_iter()
            .find(|p| p.id().to_string() == address)
            .ok_or_else(|| {
                NiimbotError::BleConnection(format!("peripheral {address} not found, scan first"))
            })
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connecting(&self) -> MutexGuard<'_, Option<Peripheral>> {
        self.connecting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forwarder(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.forwarder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connected_peripheral(&self) -> Result<(Peripheral, Characteristic, Characteristic)> {
        let link = self.link();
        let link = link.as_ref().ok_or(NiimbotError::NotConnected)?;
        Ok((
            link.peripheral.clone(),
            link.write_char.clone(),
            link.notify_char.clone(),
        ))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn scan(&self, window: Duration) -> Result<Vec<Device>> {
        tracing::info!(window_ms = window.as_millis() as u64, "Starting BLE scan");

        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| NiimbotError::BleScan(e.to_string()))?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| NiimbotError::BleScan(e.to_string()))?;

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        let mut found = Vec::new();
        let mut seen_ids = HashSet::new();

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => {
                    let id = match event {
                        Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => id,
                        Some(_) => continue,
                        None => break,
                    };
                    let id_str = id.to_string();
                    if seen_ids.contains(&id_str) {
                        continue;
                    }
                    let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                        continue;
                    };
                    let Ok(Some(props)) = peripheral.properties().await else {
                        continue;
                    };
                    // Printers always advertise a name; skip anonymous beacons.
                    let Some(name) = props.local_name.filter(|n| !n.is_empty()) else {
                        continue;
                    };
                    tracing::debug!(name = %name, id = %id_str, rssi = ?props.rssi, "Discovered device");
                    seen_ids.insert(id_str.clone());
                    found.push(Device {
                        address: id_str,
                        name,
                        rssi: props.rssi.unwrap_or(i16::MIN),
                    });
                }
            }
        }

        self.adapter
            .stop_scan()
            .await
            .map_err(|e| NiimbotError::BleScan(e.to_string()))?;

        tracing::info!(count = found.len(), "BLE scan complete");
        Ok(found)
    }

    async fn connect(&self, device: &Device, gatt: &GattProfile) -> Result<()> {
        tracing::info!(id = %device.address, name = %device.name, "Connecting to device");

        let peripheral = self.find_peripheral(&device.address).await?;
        peripheral
            .connect()
            .await
            .map_err(|e| NiimbotError::BleConnection(e.to_string()))?;
        // Owned from here on, so a cancelled connect can still be torn down.
        *self.connecting() = Some(peripheral.clone());

        if let Err(e) = peripheral.discover_services().await {
            self.connecting().take();
            let _ = peripheral.disconnect().await;
            return Err(NiimbotError::BleConnection(e.to_string()));
        }

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid && c.service_uuid == gatt.service)
                .or_else(|| characteristics.iter().find(|c| c.uuid == uuid))
                .cloned()
                .ok_or(NiimbotError::MissingCharacteristic(uuid))
        };
        let (write_char, notify_char) = match (find(gatt.write), find(gatt.notify)) {
            (Ok(w), Ok(n)) => (w, n),
            (Err(e), _) | (_, Err(e)) => {
                self.connecting().take();
                let _ = peripheral.disconnect().await;
                return Err(e);
            }
        };

        self.connecting().take();
        *self.link() = Some(Link {
            peripheral,
            write_char,
            notify_char,
        });
        tracing::info!(chunk_size = CHUNK_SIZE, "Connected and discovered characteristics");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.forwarder().take() {
            handle.abort();
        }
        let half_open = self.connecting().take();
        if let Some(peripheral) = half_open {
            tracing::info!("Dropping half-open BLE connection");
            if let Err(e) = peripheral.disconnect().await {
                tracing::warn!(error = %e, "BLE disconnect of half-open link failed");
            }
        }
        let Some(link) = self.link().take() else {
            return Ok(());
        };
        tracing::info!("Disconnecting BLE device");
        if let Err(e) = link.peripheral.disconnect().await {
            tracing::warn!(error = %e, "BLE disconnect failed, dropping link anyway");
        }
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let (peripheral, write_char, _) = self.connected_peripheral()?;

        let chunks: Vec<&[u8]> = data.chunks(CHUNK_SIZE).collect();
        if chunks.len() > 1 {
            tracing::debug!(
                chunk_count = chunks.len(),
                total_bytes = data.len(),
                "Writing frame in chunks"
            );
        }

        for (i, chunk) in chunks.iter().enumerate() {
            peripheral
                .write(&write_char, chunk, WriteType::WithoutResponse)
                .await
                .map_err(|e| {
                    NiimbotError::BleWrite(format!("chunk {}/{}: {}", i + 1, chunks.len(), e))
                })?;
            tokio::time::sleep(CHUNK_WRITE_DELAY).await;
        }

        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let (peripheral, _, notify_char) = self.connected_peripheral()?;

        peripheral
            .subscribe(&notify_char)
            .await
            .map_err(|e| NiimbotError::BleConnection(format!("subscribe failed: {e}")))?;
        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| NiimbotError::BleConnection(e.to_string()))?;
        let mut central = self
            .adapter
            .events()
            .await
            .map_err(|e| NiimbotError::BleConnection(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let peripheral_id = peripheral.id();
        let notify_uuid = notify_char.uuid;

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    n = notifications.next() => match n {
                        Some(n) if n.uuid == notify_uuid => TransportEvent::Notification(n.value),
                        Some(_) => continue,
                        None => TransportEvent::Disconnected,
                    },
                    e = central.next() => match e {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                            TransportEvent::Disconnected
                        }
                        Some(_) => continue,
                        None => TransportEvent::Disconnected,
                    },
                };
                let done = event == TransportEvent::Disconnected;
                if tx.send(event).await.is_err() || done {
                    break;
                }
            }
            tracing::debug!("Notification forwarder stopped");
        });

        if let Some(old) = self.forwarder().replace(handle) {
            old.abort();
        }
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.link().is_some()
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder().take() {
            handle.abort();
        }
    }
}
