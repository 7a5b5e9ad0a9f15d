//! Error handling for subnetwatch
//!
//! Probe-level failures never show up here: the prober folds them into an
//! unreachable outcome. What remains are request, session, configuration and
//! persistence errors.

use thiserror::Error;

/// Main error type for scanning and client operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid range prefix: {0}")]
    InvalidPrefix(String),

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Session fault: {0}")]
    SessionFault(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown range: {0}")]
    UnknownRange(String),

    #[error("Range already configured: {0}")]
    DuplicateRange(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanError {
    /// Whether the error came from the subscriber going away rather than a fault.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ScanError::ChannelClosed)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ScanError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ScanError::ChannelClosed
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(e: toml::de::Error) -> Self {
        ScanError::Config(e.to_string())
    }
}
