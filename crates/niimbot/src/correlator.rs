//! Single-flight request/response correlation.
//!
//! The printer link carries one command at a time. Each exchange moves
//! `Idle -> Sent -> {Resolved, TimedOut, LinkError} -> Idle`:
//!
//! - `submit` fails fast with [`NiimbotError::Busy`] unless the slot is idle,
//!   then writes the frame and waits on a oneshot with a deadline.
//! - The pump task decodes every notification. Frames that fail framing or
//!   checksum are dropped; frames whose id is not the pending reply id are
//!   ignored. A match resolves the waiter and frees the slot.
//! - A transport disconnect (or [`Correlator::close`]) resolves the waiter
//!   with [`NiimbotError::LinkLost`] immediately, even while the write
//!   itself is still in progress.
//!
//! The deadline covers the write and the reply together, so a stalled
//! radio write cannot hang an exchange. Timeouts are not retried here;
//! callers decide.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::command::ERROR_REPLY;
use crate::packet::Packet;
use crate::retry::RetryPolicy;
use crate::transport::{Transport, TransportEvent};
use crate::{NiimbotError, Result};

type Reply = Result<Packet>;

/// Observable slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No link attached.
    Closed,
    Idle,
    /// Waiting for the reply to this command id.
    Sent(u8),
}

enum Slot {
    Closed,
    Idle,
    Sent {
        exchange: u64,
        command: u8,
        reply: u8,
        waiter: oneshot::Sender<Reply>,
    },
}

struct Shared {
    slot: Slot,
    next_exchange: u64,
}

impl Shared {
    /// Fail any pending waiter with a link error and close the slot.
    fn fail_pending(&mut self) {
        if let Slot::Sent {
            command, waiter, ..
        } = std::mem::replace(&mut self.slot, Slot::Closed)
        {
            tracing::warn!(command = %hex(command), "Link lost with command pending");
            let _ = waiter.send(Err(NiimbotError::LinkLost { command }));
        }
    }
}

/// Serializes commands over one transport and matches their replies.
pub struct Correlator<T: Transport> {
    transport: T,
    shared: Arc<Mutex<Shared>>,
    /// Signalled when the link goes away, to abort unacknowledged writes.
    link_closed: Arc<Notify>,
    pump: Mutex<Option<JoinHandle<()>>>,
    retry: RetryPolicy,
}

impl<T: Transport> Correlator<T> {
    pub fn new(transport: T, retry: RetryPolicy) -> Self {
        Self {
            transport,
            shared: Arc::new(Mutex::new(Shared {
                slot: Slot::Closed,
                next_exchange: 0,
            })),
            link_closed: Arc::new(Notify::new()),
            pump: Mutex::new(None),
            retry,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn phase(&self) -> Phase {
        match &lock(&self.shared).slot {
            Slot::Closed => Phase::Closed,
            Slot::Idle => Phase::Idle,
            Slot::Sent { command, .. } => Phase::Sent(*command),
        }
    }

    /// Start consuming transport events. Must run inside a tokio runtime.
    pub fn attach(&self, events: mpsc::Receiver<TransportEvent>) {
        {
            let mut shared = lock(&self.shared);
            shared.fail_pending();
            shared.slot = Slot::Idle;
        }
        let handle = tokio::spawn(pump(
            Arc::clone(&self.shared),
            Arc::clone(&self.link_closed),
            events,
        ));
        if let Some(old) = self.pump_slot().replace(handle) {
            old.abort();
        }
    }

    /// Detach from the link, failing any pending exchange with `LinkLost`.
    pub fn close(&self) {
        lock(&self.shared).fail_pending();
        self.link_closed.notify_waiters();
        if let Some(handle) = self.pump_slot().take() {
            handle.abort();
        }
    }

    /// Send `request` and wait up to `timeout` for a frame with id `reply`.
    pub async fn submit(&self, request: Packet, reply: u8, timeout: Duration) -> Result<Packet> {
        let command = request.command;
        let (tx, rx) = oneshot::channel();

        let exchange = {
            let mut shared = lock(&self.shared);
            match &shared.slot {
                Slot::Closed => return Err(NiimbotError::NotConnected),
                Slot::Sent { command: pending, .. } => {
                    return Err(NiimbotError::Busy { pending: *pending });
                }
                Slot::Idle => {}
            }
            shared.next_exchange += 1;
            let exchange = shared.next_exchange;
            shared.slot = Slot::Sent {
                exchange,
                command,
                reply,
                waiter: tx,
            };
            exchange
        };
        let _guard = ExchangeGuard {
            shared: &self.shared,
            exchange,
        };

        let started = Instant::now();
        match tokio::time::timeout(timeout, self.write_then_wait(&request, rx)).await {
            Ok(Ok(packet)) if packet.command == ERROR_REPLY => Err(NiimbotError::Rejected {
                command,
                code: packet.payload.first().copied().unwrap_or(0),
            }),
            Ok(result) => result,
            Err(_) => {
                let elapsed = started.elapsed();
                tracing::warn!(
                    command = %hex(command),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Command timed out"
                );
                Err(NiimbotError::Timeout { command, elapsed })
            }
        }
    }

    /// Write a frame that the printer does not acknowledge (row data).
    ///
    /// Still honours the single-flight rule: refused while a reply is pending.
    /// The write must finish within `timeout` and is abandoned with
    /// `LinkLost` if the link closes first.
    pub async fn send(&self, request: &Packet, timeout: Duration) -> Result<()> {
        let closed = self.link_closed.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();

        match self.phase() {
            Phase::Closed => return Err(NiimbotError::NotConnected),
            Phase::Sent(pending) => return Err(NiimbotError::Busy { pending }),
            Phase::Idle => {}
        }

        let command = request.command;
        let started = Instant::now();
        let write = async {
            tokio::select! {
                _ = &mut closed => Err(NiimbotError::LinkLost { command }),
                written = self.write_frame(request) => written,
            }
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed = started.elapsed();
                tracing::warn!(
                    command = %hex(command),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Write timed out"
                );
                Err(NiimbotError::Timeout { command, elapsed })
            }
        }
    }

    /// Write `request`, then wait for the slot's reply. The waiter is polled
    /// during the write too, so a link loss resolves a stalled write.
    async fn write_then_wait(
        &self,
        request: &Packet,
        mut rx: oneshot::Receiver<Reply>,
    ) -> Result<Packet> {
        let command = request.command;
        tokio::select! {
            reply = &mut rx => return reply.unwrap_or(Err(NiimbotError::LinkLost { command })),
            written = self.write_frame(request) => written?,
        }
        rx.await.unwrap_or(Err(NiimbotError::LinkLost { command }))
    }

    async fn write_frame(&self, request: &Packet) -> Result<()> {
        let frame = request.encode();
        tracing::debug!(command = %hex(request.command), len = frame.len(), "BLE write");
        self.retry
            .run("write", || self.transport.write(&frame))
            .await
    }

    fn pump_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Transport> Drop for Correlator<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.pump_slot().take() {
            handle.abort();
        }
    }
}

/// Returns the slot to idle if its exchange ends without a reply
/// (timeout, write failure, or the caller dropping the future).
struct ExchangeGuard<'a> {
    shared: &'a Mutex<Shared>,
    exchange: u64,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        let mut shared = lock(self.shared);
        if matches!(shared.slot, Slot::Sent { exchange, .. } if exchange == self.exchange) {
            shared.slot = Slot::Idle;
        }
    }
}

async fn pump(
    shared: Arc<Mutex<Shared>>,
    link_closed: Arc<Notify>,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Notification(bytes) => {
                let packet = match Packet::decode(&bytes) {
                    Ok(packet) => packet,
                    Err(err) => {
                        tracing::debug!(len = bytes.len(), error = %err, "Dropping malformed notification");
                        continue;
                    }
                };
                tracing::debug!(
                    command = %hex(packet.command),
                    len = packet.payload.len(),
                    "BLE notify"
                );
                resolve(&shared, packet);
            }
            TransportEvent::Disconnected => {
                tracing::info!("Transport reported disconnect");
                break;
            }
        }
    }
    lock(&shared).fail_pending();
    link_closed.notify_waiters();
}

fn resolve(shared: &Mutex<Shared>, packet: Packet) {
    let mut shared = lock(shared);
    let matches = matches!(
        &shared.slot,
        Slot::Sent { reply, .. } if packet.command == *reply || packet.command == ERROR_REPLY
    );
    if !matches {
        tracing::debug!(command = %hex(packet.command), "Ignoring unsolicited notification");
        return;
    }
    if let Slot::Sent { waiter, .. } = std::mem::replace(&mut shared.slot, Slot::Idle) {
        let _ = waiter.send(Ok(packet));
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn hex(id: u8) -> String {
    format!("0x{id:02x}")
}

#[cfg(test)]
mod tests;
