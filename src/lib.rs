//! Subnetwatch - live reachability sweeps of /24 IPv4 ranges
//!
//! A server probes every host of a range in fixed-size concurrent batches and
//! streams progress over a WebSocket; a client keeps the latest grid per range.

pub mod client;
pub mod config;
pub mod error;
pub mod network;
pub mod output;
pub mod protocol;
pub mod scanner;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use client::{ClientState, StateStore, Watcher};
pub use config::{ClientConfig, ConfigFile, ServerConfig};
pub use error::ScanError;
pub use network::{PingProber, ProbeOutcome, Prober, RangePrefix};
pub use protocol::{ClientMessage, ScanEvent};
pub use scanner::RangeScanner;
pub use session::{ScanRequest, ScanSession, SessionOutcome, SessionRegistry};

pub type Result<T> = std::result::Result<T, ScanError>;
