//! In-process printer simulation.
//!
//! `SimulatedPrinter` implements [`Transport`] without a radio: it advertises
//! a configurable set of devices, decodes every frame written to it and
//! answers like a printer would. Used for dry-run printing and tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::command::Command;
use crate::packet::Packet;
use crate::status::RfidInfo;
use crate::transport::{Device, EVENT_CHANNEL_CAPACITY, GattProfile, Transport, TransportEvent};
use crate::{NiimbotError, Result};

/// Heartbeat reply of a D110 with the lid closed, full battery and a tag read.
const DEFAULT_HEARTBEAT: [u8; 13] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 1];

#[derive(Default)]
struct SimState {
    devices: Vec<Device>,
    connected: Option<Device>,
    events: Option<mpsc::Sender<TransportEvent>>,
    frames: Vec<Packet>,
    silent: HashSet<u8>,
    stalled: HashSet<u8>,
    answer_budget: HashMap<u8, usize>,
    rfid: Option<Vec<u8>>,
    info: HashMap<u8, Vec<u8>>,
    busy_polls: u32,
    fail_writes: usize,
    fail_connects: usize,
    connect_delay: Duration,
}

/// A scriptable fake printer. Clones share state.
#[derive(Clone, Default)]
pub struct SimulatedPrinter {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A simulator advertising a single `<MODEL>_SIM` device.
    pub fn dry_run(model: &str) -> Self {
        Self::new().with_device(&format!("{}_SIM", model.to_ascii_uppercase()), "00:00:00:00:00:01")
    }

    /// Builder: advertise a device.
    pub fn with_device(self, name: &str, address: &str) -> Self {
        self.lock().devices.push(Device {
            address: address.to_string(),
            name: name.to_string(),
            rssi: -50,
        });
        self
    }

    /// Builder: report this tag for `GetRfid`. A tag that cannot be encoded
    /// leaves the roll untagged.
    pub fn with_rfid(self, tag: &RfidInfo) -> Self {
        let payload = match tag.to_payload() {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring simulated RFID tag");
                None
            }
        };
        self.lock().rfid = payload;
        self
    }

    /// Builder: raw `GetInfo` reply payload for a key.
    pub fn with_info(self, key: u8, payload: Vec<u8>) -> Self {
        self.lock().info.insert(key, payload);
        self
    }

    /// Builder: answer this many `EndPrint` polls with "still printing".
    pub fn with_busy_polls(self, polls: u32) -> Self {
        self.lock().busy_polls = polls;
        self
    }

    /// Builder: hold every connect attempt after the link is up, like slow
    /// service discovery.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.lock().connect_delay = delay;
        self
    }

    /// Never answer the given command id.
    pub fn silence(&self, command: u8) {
        self.lock().silent.insert(command);
    }

    /// Never complete writes of frames with this id, like a wedged radio.
    pub fn stall_writes(&self, command: u8) {
        self.lock().stalled.insert(command);
    }

    /// Answer the next `n` requests with this id, then go silent.
    pub fn silence_after(&self, command: u8, n: usize) {
        self.lock().answer_budget.insert(command, n);
    }

    /// Fail the next `n` writes with a BLE write error.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().fail_writes = n;
    }

    /// Fail the next `n` connect attempts with a BLE connection error.
    pub fn fail_next_connects(&self, n: usize) {
        self.lock().fail_connects = n;
    }

    /// Push raw bytes to the subscriber as if notified.
    pub fn inject(&self, bytes: Vec<u8>) {
        let state = self.lock();
        if let Some(tx) = &state.events {
            let _ = tx.try_send(TransportEvent::Notification(bytes));
        }
    }

    /// Simulate the peripheral dropping the link.
    pub fn drop_link(&self) {
        let mut state = self.lock();
        state.connected = None;
        if let Some(tx) = state.events.take() {
            let _ = tx.try_send(TransportEvent::Disconnected);
        }
    }

    /// Every decoded frame written so far.
    pub fn frames(&self) -> Vec<Packet> {
        self.lock().frames.clone()
    }

    /// Command ids written so far, in order.
    pub fn commands(&self) -> Vec<u8> {
        self.lock().frames.iter().map(|p| p.command).collect()
    }

    pub fn clear_frames(&self) {
        self.lock().frames.clear();
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimState {
    fn reply_for(&mut self, request: &Packet) -> Option<Packet> {
        if self.silent.contains(&request.command) {
            return None;
        }
        if let Some(left) = self.answer_budget.get_mut(&request.command) {
            if *left == 0 {
                return None;
            }
            *left -= 1;
        }
        let command = Command::from_id(request.command)?;
        let (id, payload) = match command {
            Command::PrintEmptyRow | Command::PrintBitmapRow => return None,
            Command::Heartbeat => (0xdd, DEFAULT_HEARTBEAT.to_vec()),
            Command::GetRfid => (0x1b, self.rfid.clone().unwrap_or_else(|| vec![0x00])),
            Command::GetInfo => {
                let key = request.payload.first().copied().unwrap_or(0);
                let payload = self.info.get(&key).cloned().unwrap_or_else(|| vec![0x00]);
                (0x40 + key, payload)
            }
            Command::EndPrint if self.busy_polls > 0 => {
                self.busy_polls -= 1;
                (0xf4, vec![0x00])
            }
            other => (other.reply_id()?, vec![0x01]),
        };
        Some(Packet {
            command: id,
            payload,
        })
    }
}

#[async_trait]
impl Transport for SimulatedPrinter {
    async fn scan(&self, _window: Duration) -> Result<Vec<Device>> {
        Ok(self.lock().devices.clone())
    }

    async fn connect(&self, device: &Device, _gatt: &GattProfile) -> Result<()> {
        let delay = {
            let mut state = self.lock();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(NiimbotError::BleConnection("simulated link failure".into()));
            }
            if !state.devices.iter().any(|d| d.address == device.address) {
                return Err(NiimbotError::BleConnection(format!(
                    "peripheral {} not found",
                    device.address
                )));
            }
            state.connected = Some(device.clone());
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.lock();
        state.connected = None;
        state.events = None;
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let stalled = {
            let mut state = self.lock();
            if state.connected.is_none() {
                return Err(NiimbotError::NotConnected);
            }
            if state.fail_writes > 0 {
                state.fail_writes -= 1;
                return Err(NiimbotError::BleWrite("simulated write failure".into()));
            }

            let Ok(request) = Packet::decode(data) else {
                return Ok(());
            };
            let stalled = state.stalled.contains(&request.command);
            let reply = if stalled {
                None
            } else {
                state.reply_for(&request)
            };
            state.frames.push(request);

            if let (Some(reply), Some(tx)) = (reply, &state.events) {
                let _ = tx.try_send(TransportEvent::Notification(reply.encode()));
            }
            stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let mut state = self.lock();
        if state.connected.is_none() {
            return Err(NiimbotError::NotConnected);
        }
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        state.events = Some(tx);
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.lock().connected.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NIIMBOT_SERVICE;

    const GATT: GattProfile = GattProfile {
        service: NIIMBOT_SERVICE,
        write: NIIMBOT_SERVICE,
        notify: NIIMBOT_SERVICE,
    };

    #[tokio::test]
    async fn answers_with_reply_ids() {
        let sim = SimulatedPrinter::dry_run("d110");
        let device = sim.scan(Duration::ZERO).await.unwrap().remove(0);
        assert_eq!(device.name, "D110_SIM");

        sim.connect(&device, &GATT).await.unwrap();
        let mut rx = sim.subscribe().await.unwrap();

        let request = Command::SetLabelDensity.packet(vec![3]).unwrap();
        sim.write(&request.encode()).await.unwrap();

        let Some(TransportEvent::Notification(bytes)) = rx.recv().await else {
            panic!("expected a notification");
        };
        let reply = Packet::decode(&bytes).unwrap();
        assert_eq!(reply.command, 0x31);
        assert_eq!(sim.commands(), vec![0x21]);
    }

    #[tokio::test]
    async fn rows_are_not_acknowledged() {
        let sim = SimulatedPrinter::dry_run("d110");
        let device = sim.scan(Duration::ZERO).await.unwrap().remove(0);
        sim.connect(&device, &GATT).await.unwrap();
        let mut rx = sim.subscribe().await.unwrap();

        let row = Command::PrintEmptyRow.packet(vec![0, 0, 4]).unwrap();
        sim.write(&row.encode()).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stalled_writes_never_complete() {
        let sim = SimulatedPrinter::dry_run("d110");
        let device = sim.scan(Duration::ZERO).await.unwrap().remove(0);
        sim.connect(&device, &GATT).await.unwrap();
        sim.stall_writes(0xdc);

        let heartbeat = Command::Heartbeat.packet(vec![0x01]).unwrap().encode();
        let write = tokio::time::timeout(Duration::from_millis(20), sim.write(&heartbeat)).await;
        assert!(write.is_err());
        assert_eq!(sim.commands(), vec![0xdc]);
    }

    #[tokio::test]
    async fn write_requires_connection() {
        let sim = SimulatedPrinter::new();
        assert!(matches!(
            sim.write(&[0x55]).await,
            Err(NiimbotError::NotConnected)
        ));
    }
}
