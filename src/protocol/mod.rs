//! Wire protocol: JSON messages exchanged over the scan WebSocket
//!
//! Every message is a JSON object tagged by a `type` field.
//!
//! ```text
//! caller -> server   {"type":"scan","ranges":[{"prefix":"10.0.0"}]}
//! server -> caller   {"type":"progress","prefix":"10.0.0","percent":20,"results":[...]}
//!                    {"type":"complete","prefix":"10.0.0","results":[...],"timestamp":"..."}
//!                    {"type":"error","message":"..."}
//! ```

use crate::error::ScanError;
use crate::network::RangePrefix;
use crate::scanner::HostResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages sent by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Scan { ranges: Vec<RangeSpec> },
}

/// One requested range. The prefix stays a raw string until the request
/// boundary validates it, so a bad prefix can be reported by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub prefix: String,
}

impl RangeSpec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

/// Events streamed from the server to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScanEvent {
    Progress {
        prefix: RangePrefix,
        percent: u8,
        results: Vec<HostResult>,
    },
    Complete {
        prefix: RangePrefix,
        results: Vec<HostResult>,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl ScanEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ScanEvent::Error {
            message: message.into(),
        }
    }

    /// Prefix the event refers to, if any.
    pub fn prefix(&self) -> Option<RangePrefix> {
        match self {
            ScanEvent::Progress { prefix, .. } | ScanEvent::Complete { prefix, .. } => Some(*prefix),
            ScanEvent::Error { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScanEvent::Progress { .. } => "progress",
            ScanEvent::Complete { .. } => "complete",
            ScanEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, ScanError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ScanError> {
        serde_json::from_str(text).map_err(|e| ScanError::Protocol(e.to_string()))
    }
}

impl ClientMessage {
    pub fn scan<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientMessage::Scan {
            ranges: prefixes.into_iter().map(RangeSpec::new).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, ScanError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ScanError> {
        serde_json::from_str(text).map_err(|e| ScanError::Protocol(e.to_string()))
    }
}
