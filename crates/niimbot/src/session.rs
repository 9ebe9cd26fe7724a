//! Printer session: scan, connect, query and print over one link.
//!
//! A session owns its transport and correlator outright; independent
//! sessions share nothing. Operations from concurrent callers are queued
//! FIFO on an async mutex, so a heartbeat issued mid-job waits for the job
//! instead of failing. [`PrinterSession::disconnect`] bypasses the queue and
//! fails any in-flight exchange with a link error.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use crate::bitmap::encode_packets;
use crate::command::Command;
use crate::correlator::{Correlator, Phase};
use crate::events::{EventBus, PrinterEvent};
use crate::job::{CopyStrategy, PrintJob};
use crate::models::ModelProfile;
use crate::options::SessionConfig;
use crate::packet::Packet;
use crate::status::{HeartbeatInfo, InfoKey, InfoValue, RfidInfo};
use crate::transport::{Device, EVENT_CHANNEL_CAPACITY, Transport, TransportEvent, find_by_model};
use crate::{NiimbotError, Result};

/// Outcome of a successful print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintReport {
    pub copies: u16,
    pub strategy: CopyStrategy,
    pub elapsed: Duration,
}

pub struct PrinterSession<T: Transport> {
    correlator: Correlator<T>,
    config: SessionConfig,
    ops: tokio::sync::Mutex<()>,
    device: Mutex<Option<Device>>,
    events: EventBus,
}

impl<T: Transport> PrinterSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let correlator = Correlator::new(transport, config.retry);
        Self {
            correlator,
            config,
            ops: tokio::sync::Mutex::new(()),
            device: Mutex::new(None),
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PrinterEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.correlator.phase() != Phase::Closed
    }

    /// The connected printer, if the link is still up.
    pub fn device(&self) -> Option<Device> {
        if !self.is_connected() {
            return None;
        }
        self.device_slot().clone()
    }

    /// List advertising devices, strongest signal first.
    pub async fn scan(&self) -> Result<Vec<Device>> {
        let _op = self.ops.lock().await;
        let mut devices = self
            .correlator
            .transport()
            .scan(self.config.scan_timeout)
            .await?;
        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi).then_with(|| a.name.cmp(&b.name)));
        Ok(devices)
    }

    /// Scan for a printer whose name starts with `model`, connect to it and
    /// read the loaded roll's tag.
    ///
    /// Any existing link is closed first. The handshake and the tag query
    /// are best effort and never fail the connect.
    pub async fn connect(&self, model: &str) -> Result<Device> {
        let _op = self.ops.lock().await;
        if self.is_connected() {
            self.teardown().await;
        }

        match self.open_link(model).await {
            Ok(device) => {
                tracing::info!(name = %device.name, address = %device.address, "Printer connected");
                *self.device_slot() = Some(device.clone());
                self.events.emit(PrinterEvent::Connected(device.clone()));

                match self.query_rfid().await {
                    Ok(Some(tag)) => self.events.emit(PrinterEvent::RfidDetected(tag)),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "RFID query after connect failed"),
                }
                Ok(device)
            }
            Err(e) => {
                tracing::warn!(model, error = %e, "Printer connect failed");
                self.events.emit(PrinterEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn open_link(&self, model: &str) -> Result<Device> {
        let transport = self.correlator.transport();
        let devices = transport.scan(self.config.scan_timeout).await?;
        let device = find_by_model(devices, model)
            .ok_or_else(|| NiimbotError::PrinterNotFound(model.to_string()))?;
        let profile = ModelProfile::lookup(model);

        let connect = self
            .config
            .retry
            .run("connect", || transport.connect(&device, &profile.gatt));
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => {
                // The link may already be up with discovery still running.
                if let Err(e) = transport.disconnect().await {
                    tracing::warn!(error = %e, "Disconnect after connect timeout failed");
                }
                return Err(NiimbotError::ConnectionTimeout(self.config.connect_timeout));
            }
        }

        let raw = match transport.subscribe().await {
            Ok(raw) => raw,
            Err(e) => {
                let _ = transport.disconnect().await;
                return Err(e);
            }
        };
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(watch_link(raw, tx, self.events.clone()));
        self.correlator.attach(rx);

        if let Err(e) = self.exchange(Command::Connect, vec![0x01]).await {
            tracing::warn!(error = %e, "Connect handshake not acknowledged");
        }
        Ok(device)
    }

    /// Liveness probe.
    pub async fn heartbeat(&self) -> Result<HeartbeatInfo> {
        let _op = self.ops.lock().await;
        self.ensure_connected()?;
        let reply = self.exchange(Command::Heartbeat, vec![0x01]).await?;
        Ok(HeartbeatInfo::parse(&reply.payload))
    }

    /// Read the loaded roll's RFID tag. `None` when there is no tag or the
    /// printer does not answer.
    pub async fn get_rfid(&self) -> Result<Option<RfidInfo>> {
        let _op = self.ops.lock().await;
        self.ensure_connected()?;
        self.query_rfid().await
    }

    async fn query_rfid(&self) -> Result<Option<RfidInfo>> {
        match self.exchange(Command::GetRfid, vec![0x01]).await {
            Ok(reply) => Ok(RfidInfo::parse(&reply.payload).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Unreadable RFID reply");
                None
            })),
            Err(e @ (NiimbotError::Timeout { .. } | NiimbotError::Rejected { .. })) => {
                tracing::debug!(error = %e, "No RFID answer, treating as untagged roll");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_info(&self, key: InfoKey) -> Result<InfoValue> {
        let _op = self.ops.lock().await;
        self.ensure_connected()?;
        let reply = self
            .correlator
            .submit(
                Command::GetInfo.packet(vec![key.id()])?,
                key.reply_id(),
                self.config.command_timeout,
            )
            .await?;
        Ok(InfoValue::parse(key, &reply.payload))
    }

    /// Print `job`, emitting [`PrinterEvent::Progress`] as copies complete.
    ///
    /// The first hard error aborts the remaining copies and is returned as
    /// [`NiimbotError::Print`] carrying the number of copies already done.
    pub async fn print(&self, job: &PrintJob) -> Result<PrintReport> {
        let _op = self.ops.lock().await;
        self.ensure_connected()?;

        let started = Instant::now();
        let strategy = job.strategy();
        let total = job.quantity();
        let rows = encode_packets(job.bitmap());
        tracing::info!(
            width = job.bitmap().width(),
            height = job.bitmap().height(),
            density = job.density(),
            quantity = total,
            frames = rows.len(),
            ?strategy,
            "Starting print job"
        );

        let mut done = 0;
        let result = match strategy {
            CopyStrategy::PerCopy => {
                let mut result = Ok(());
                while done < total {
                    result = self.print_page(job, &rows, None).await;
                    if result.is_err() {
                        break;
                    }
                    done += 1;
                    tracing::info!(copy = done, total, "Copy printed");
                    self.events.emit(PrinterEvent::Progress {
                        copies_done: done,
                        total,
                    });
                }
                result
            }
            CopyStrategy::Streaming => {
                let result = self.print_page(job, &rows, Some(total)).await;
                if result.is_ok() {
                    done = total;
                    self.events.emit(PrinterEvent::Progress {
                        copies_done: total,
                        total,
                    });
                }
                result
            }
        };

        if let Err(source) = result {
            tracing::error!(copies_completed = done, total, error = %source, "Print job failed");
            self.events.emit(PrinterEvent::Error {
                message: source.to_string(),
            });
            return Err(NiimbotError::Print {
                copies_completed: done,
                total,
                source: Box::new(source),
            });
        }

        self.events.emit(PrinterEvent::PrintFinished { copies: total });
        Ok(PrintReport {
            copies: total,
            strategy,
            elapsed: started.elapsed(),
        })
    }

    /// One page sequence. `quantity` selects the streaming variant.
    async fn print_page(&self, job: &PrintJob, rows: &[Packet], quantity: Option<u16>) -> Result<()> {
        let width = job.bitmap().width().to_be_bytes();
        let height = job.bitmap().height().to_be_bytes();

        self.exchange(Command::SetLabelDensity, vec![job.density()]).await?;
        self.exchange(Command::SetLabelType, vec![0x01]).await?;

        let (start, dimension) = match quantity {
            None => (
                vec![0x01],
                vec![height[0], height[1], width[0], width[1]],
            ),
            Some(q) => {
                let q = q.to_be_bytes();
                (
                    vec![0x00, q[0], q[1], 0x00, 0x00, 0x00, 0x00],
                    vec![height[0], height[1], width[0], width[1], q[0], q[1]],
                )
            }
        };
        self.exchange(Command::StartPrint, start).await?;
        self.exchange(Command::StartPagePrint, vec![0x01]).await?;
        self.exchange(Command::SetDimension, dimension).await?;

        for row in rows {
            self.correlator.send(row, self.config.command_timeout).await?;
        }

        self.exchange(Command::EndPagePrint, vec![0x01]).await?;
        tokio::time::sleep(self.config.settle_delay).await;
        self.wait_for_end_print().await
    }

    /// Poll `EndPrint` until the printer reports the page done, bounded by
    /// the print watchdog.
    async fn wait_for_end_print(&self) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.config.print_timeout;
        let reply_id = Command::EndPrint.id() + 1;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NiimbotError::Timeout {
                    command: Command::EndPrint.id(),
                    elapsed: started.elapsed(),
                });
            }
            let reply = self
                .correlator
                .submit(
                    Command::EndPrint.packet(vec![0x01])?,
                    reply_id,
                    remaining.min(self.config.command_timeout),
                )
                .await?;
            if reply.payload.first().is_some_and(|&b| b != 0) {
                return Ok(());
            }
            tracing::trace!("Printer still busy");
            tokio::time::sleep(self.config.end_print_poll.min(remaining)).await;
        }
    }

    /// Close the link. Never fails; a pending exchange resolves with a link
    /// error.
    pub async fn disconnect(&self) {
        let was_connected = self.is_connected();
        self.teardown().await;
        if was_connected {
            self.events.emit(PrinterEvent::Disconnected);
        }
    }

    async fn teardown(&self) {
        self.correlator.close();
        if let Err(e) = self.correlator.transport().disconnect().await {
            tracing::warn!(error = %e, "Transport disconnect failed, clearing session anyway");
        }
        *self.device_slot() = None;
    }

    async fn exchange(&self, command: Command, payload: Vec<u8>) -> Result<Packet> {
        let reply = command.reply_id().ok_or_else(|| {
            NiimbotError::Protocol(format!("command 0x{:02x} has no reply", command.id()))
        })?;
        self.correlator
            .submit(command.packet(payload)?, reply, self.config.command_timeout)
            .await
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(NiimbotError::NotConnected)
        }
    }

    fn device_slot(&self) -> MutexGuard<'_, Option<Device>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forward transport events to the correlator, announcing link loss.
async fn watch_link(
    mut raw: mpsc::Receiver<TransportEvent>,
    tx: mpsc::Sender<TransportEvent>,
    events: EventBus,
) {
    while let Some(event) = raw.recv().await {
        let lost = event == TransportEvent::Disconnected;
        if lost {
            tracing::warn!("Printer link lost");
            events.emit(PrinterEvent::Disconnected);
        }
        if tx.send(event).await.is_err() || lost {
            break;
        }
    }
}
