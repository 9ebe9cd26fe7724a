//! Niimbot label printer client over Bluetooth Low Energy.
//!
//! Provides the packet codec, a single-flight request/response correlator,
//! the 1bpp bitmap row encoder, and the [`PrinterSession`] façade used by
//! front ends to connect, query and print.

pub mod ble;
pub mod bitmap;
pub mod command;
pub mod correlator;
pub mod events;
pub mod job;
pub mod models;
pub mod options;
pub mod packet;
mod retry;
pub mod session;
pub mod sim;
pub mod status;
pub mod transport;

use std::time::Duration;

// Re-exports for convenience
pub use ble::BleTransport;
pub use bitmap::Bitmap;
pub use command::Command;
pub use events::PrinterEvent;
pub use job::{CopyStrategy, PrintJob};
pub use models::ModelProfile;
pub use options::SessionConfig;
pub use packet::{FrameError, Packet};
pub use retry::RetryPolicy;
pub use session::{PrintReport, PrinterSession};
pub use sim::SimulatedPrinter;
pub use status::{HeartbeatInfo, InfoKey, InfoValue, RfidInfo};
pub use transport::{Device, GattProfile, Transport, TransportEvent};

/// Errors that can occur during printer operations.
#[derive(Debug, thiserror::Error)]
pub enum NiimbotError {
    #[error("No device matching '{0}' found during BLE scan")]
    PrinterNotFound(String),

    #[error("Missing GATT characteristic {0} on connected device")]
    MissingCharacteristic(uuid::Uuid),

    #[error("BLE connection error: {0}")]
    BleConnection(String),

    #[error("BLE write error: {0}")]
    BleWrite(String),

    #[error("BLE scan error: {0}")]
    BleScan(String),

    #[error("Not connected to any device")]
    NotConnected,

    #[error("Connection timed out after {}ms", .0.as_millis())]
    ConnectionTimeout(Duration),

    #[error("Busy: command 0x{pending:02x} is still awaiting its reply")]
    Busy { pending: u8 },

    #[error("Malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Command 0x{command:02x} timed out after {}ms", elapsed.as_millis())]
    Timeout { command: u8, elapsed: Duration },

    #[error("Link lost while command 0x{command:02x} was pending")]
    LinkLost { command: u8 },

    #[error("Printer rejected command 0x{command:02x} (error code 0x{code:02x})")]
    Rejected { command: u8, code: u8 },

    #[error("Print failed after {copies_completed}/{total} copies: {source}")]
    Print {
        copies_completed: u16,
        total: u16,
        #[source]
        source: Box<NiimbotError>,
    },

    #[error("Invalid bitmap: {0}")]
    InvalidBitmap(String),

    #[error("Invalid print parameter: {0}")]
    InvalidParameter(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl NiimbotError {
    /// Whether the error means the link itself is gone.
    pub fn is_link_error(&self) -> bool {
        matches!(self, Self::LinkLost { .. } | Self::NotConnected)
    }
}

/// Result type alias for niimbot operations.
pub type Result<T> = std::result::Result<T, NiimbotError>;
