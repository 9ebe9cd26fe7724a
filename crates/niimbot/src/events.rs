//! Session events broadcast to front ends.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::status::RfidInfo;
use crate::transport::Device;

/// Capacity of the event broadcast channel. Slow subscribers lag, never block.
pub const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrinterEvent {
    Connected(Device),
    Disconnected,
    RfidDetected(RfidInfo),
    /// One copy (or, in streaming mode, the whole job) finished printing.
    Progress { copies_done: u16, total: u16 },
    PrintFinished { copies: u16 },
    Error { message: String },
}

/// Fan-out of [`PrinterEvent`]s. Sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PrinterEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn emit(&self, event: PrinterEvent) {
        tracing::trace!(?event, "Emitting printer event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
