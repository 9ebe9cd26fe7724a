//! Niimbot cloud label catalogue client.
//!
//! Resolves the barcode printed on a label roll (as read from its RFID tag)
//! to the roll's name and physical size.

pub mod client;
pub mod models;

pub use client::CloudClient;
pub use models::CloudLabelInfo;

/// Unified error type for the label-cloud crate.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cloud API error (status {status}): {message}")]
    ApiError { status: u16, message: String },
}
