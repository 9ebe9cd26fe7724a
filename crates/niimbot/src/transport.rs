//! Transport abstraction over the BLE link.
//!
//! A transport owns the radio connection and nothing else: it scans,
//! connects, writes raw frames and forwards raw notifications. Framing and
//! correlation live above it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::Result;

/// Capacity of the notification channel handed out by `subscribe`.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A printer seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// Platform identifier (MAC on Linux/Windows, UUID on macOS).
    pub address: String,
    pub name: String,
    pub rssi: i16,
}

impl Device {
    /// Case-insensitive prefix match of the advertised name.
    pub fn matches_model(&self, model: &str) -> bool {
        let model = model.trim();
        !model.is_empty()
            && self.name.len() >= model.len()
            && self.name.as_bytes()[..model.len()].eq_ignore_ascii_case(model.as_bytes())
    }
}

/// Pick the first scanned device whose name starts with `model`.
pub fn find_by_model(devices: Vec<Device>, model: &str) -> Option<Device> {
    devices.into_iter().find(|d| d.matches_model(model))
}

/// GATT endpoints used for one printer model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattProfile {
    pub service: Uuid,
    pub write: Uuid,
    pub notify: Uuid,
}

/// Something the link reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw bytes from the notify characteristic.
    Notification(Vec<u8>),
    /// The peripheral dropped the link.
    Disconnected,
}

/// BLE link primitives.
///
/// Events from `subscribe` may be produced on any task; the only ordering
/// guarantee is that a reply arrives after its command's `write` returned.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Scan for advertising peripherals for the given window.
    async fn scan(&self, window: Duration) -> Result<Vec<Device>>;

    /// Connect to a previously scanned device and resolve its endpoints.
    async fn connect(&self, device: &Device, gatt: &GattProfile) -> Result<()>;

    /// Drop the link. Must succeed when already disconnected.
    async fn disconnect(&self) -> Result<()>;

    /// Write one encoded frame to the command characteristic.
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Start notifications and return the event stream.
    async fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>>;

    fn is_connected(&self) -> bool;
}
