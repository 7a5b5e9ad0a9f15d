//! Scan sessions: sequential scanning of the ranges named in one request
//!
//! A session owns its accumulating result buffer and talks to its caller
//! only through an [`EventSink`]. It stops as soon as the connection's
//! cancellation token fires.

pub mod registry;

use crate::error::ScanError;
use crate::network::{RangePrefix, HOSTS_PER_RANGE};
use crate::protocol::{ClientMessage, RangeSpec, ScanEvent};
use crate::scanner::{HostResult, RangeScanner};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use registry::{ConnectionContext, ScanGuard, SessionRegistry};

/// Validated, ordered list of ranges to scan in one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub prefixes: Vec<RangePrefix>,
}

impl ScanRequest {
    pub fn new(prefixes: Vec<RangePrefix>) -> Self {
        Self { prefixes }
    }

    /// Validate raw range specs. The first malformed prefix rejects the whole request.
    pub fn from_specs(specs: &[RangeSpec]) -> Result<Self, ScanError> {
        if specs.is_empty() {
            return Err(ScanError::Protocol("scan request names no ranges".to_string()));
        }
        let prefixes = specs
            .iter()
            .map(|spec| spec.prefix.parse::<RangePrefix>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { prefixes })
    }
}

impl TryFrom<ClientMessage> for ScanRequest {
    type Error = ScanError;

    fn try_from(message: ClientMessage) -> Result<Self, Self::Error> {
        match message {
            ClientMessage::Scan { ranges } => Self::from_specs(&ranges),
        }
    }
}

/// Receiver of a session's events.
///
/// `emit` suspends until the subscriber accepts delivery and fails once the
/// subscriber is gone.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ScanEvent) -> Result<(), ScanError>;
}

#[async_trait]
impl EventSink for mpsc::Sender<ScanEvent> {
    async fn emit(&self, event: ScanEvent) -> Result<(), ScanError> {
        self.send(event).await.map_err(ScanError::from)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every requested range produced its completion event.
    Completed { ranges: usize },
    /// The connection went away; nothing further was emitted.
    Cancelled,
    /// An error event was emitted and the remaining ranges were skipped.
    Failed(String),
}

enum Interrupt {
    Cancelled,
    Failed(ScanError),
}

impl From<ScanError> for Interrupt {
    fn from(e: ScanError) -> Self {
        Interrupt::Failed(e)
    }
}

/// Drives a [`RangeScanner`] across the ranges of a [`ScanRequest`].
#[derive(Clone)]
pub struct ScanSession {
    scanner: RangeScanner,
}

impl ScanSession {
    pub fn new(scanner: RangeScanner) -> Self {
        Self { scanner }
    }

    /// Scan every requested range in order, streaming events to `sink`.
    pub async fn run<S>(&self, request: &ScanRequest, sink: &S, cancel: &CancellationToken) -> SessionOutcome
    where
        S: EventSink + ?Sized,
    {
        for prefix in &request.prefixes {
            match self.scan_range(*prefix, sink, cancel).await {
                Ok(()) => info!("Range {} complete", prefix),
                Err(Interrupt::Cancelled) => {
                    info!("Scan of {} cancelled", prefix);
                    return SessionOutcome::Cancelled;
                }
                Err(Interrupt::Failed(e)) => {
                    if e.is_disconnect() {
                        info!("Subscriber for {} went away mid-scan", prefix);
                    } else {
                        warn!("Scan of {} failed: {}", prefix, e);
                    }
                    let message = format!("scan of {} failed: {}", prefix, e);
                    if let Err(emit_err) = sink.emit(ScanEvent::error(message.clone())).await {
                        debug!("Could not deliver error event: {}", emit_err);
                    }
                    return SessionOutcome::Failed(message);
                }
            }
        }

        SessionOutcome::Completed {
            ranges: request.prefixes.len(),
        }
    }

    async fn scan_range<S>(&self, prefix: RangePrefix, sink: &S, cancel: &CancellationToken) -> Result<(), Interrupt>
    where
        S: EventSink + ?Sized,
    {
        let batches = self.scanner.scan_range(prefix);
        tokio::pin!(batches);

        let mut accumulated: Vec<HostResult> = Vec::with_capacity(HOSTS_PER_RANGE);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                next = batches.next() => next,
            };
            let Some(batch) = next else { break };

            accumulated.extend_from_slice(&batch.results);
            let event = ScanEvent::Progress {
                prefix,
                percent: batch.percent,
                results: batch.results,
            };
            deliver(sink, event, cancel).await?;
        }

        accumulated.sort_by_key(|host| host.index);
        if accumulated.len() != HOSTS_PER_RANGE {
            return Err(Interrupt::Failed(ScanError::SessionFault(format!(
                "expected {} results for {}, collected {}",
                HOSTS_PER_RANGE,
                prefix,
                accumulated.len()
            ))));
        }

        let event = ScanEvent::Complete {
            prefix,
            results: accumulated,
            timestamp: Utc::now(),
        };
        deliver(sink, event, cancel).await
    }
}

async fn deliver<S>(sink: &S, event: ScanEvent, cancel: &CancellationToken) -> Result<(), Interrupt>
where
    S: EventSink + ?Sized,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        sent = sink.emit(event) => sent.map_err(Interrupt::from),
    }
}
