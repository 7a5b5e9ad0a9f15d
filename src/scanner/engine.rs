//! Batch scheduler: probes a range one batch at a time

use crate::network::{Prober, RangePrefix};
use crate::scanner::{create_batches, BatchResult, HostResult, ScanBatch, DEFAULT_BATCH_SIZE};
use futures::future::join_all;
use futures::stream::{self, Stream, StreamExt};
use log::debug;
use std::sync::Arc;
use std::time::Instant;

/// Drives a [`Prober`] over the 255 hosts of a range.
///
/// At most `batch_size` probes are outstanding at any time. Batches run in
/// increasing address order; probes inside a batch complete in any order.
#[derive(Clone)]
pub struct RangeScanner {
    prober: Arc<dyn Prober>,
    batch_size: usize,
}

impl RangeScanner {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self {
            prober,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Lazily scan `prefix`, yielding one [`BatchResult`] per batch.
    ///
    /// Nothing is probed until the stream is polled. Dropping the stream
    /// drops the in-flight batch and its probes with it.
    pub fn scan_range(&self, prefix: RangePrefix) -> impl Stream<Item = BatchResult> + Send + 'static {
        let prober = Arc::clone(&self.prober);
        stream::iter(create_batches(prefix, self.batch_size))
            .then(move |batch| probe_batch(Arc::clone(&prober), batch))
    }
}

/// Probe every address of a batch concurrently and wait for all of them.
async fn probe_batch(prober: Arc<dyn Prober>, batch: ScanBatch) -> BatchResult {
    let started = Instant::now();

    let probes = batch.targets().map(|(index, target)| {
        let prober = Arc::clone(&prober);
        async move { HostResult::new(index, prober.probe(target).await) }
    });
    let results = join_all(probes).await;

    debug!(
        "{} batch {} (.{}-.{}) done in {:?}: {}/{} reachable",
        batch.prefix,
        batch.batch_id,
        batch.start,
        batch.end,
        started.elapsed(),
        results.iter().filter(|r| r.reachable).count(),
        results.len()
    );

    BatchResult {
        batch_id: batch.batch_id,
        end: batch.end,
        percent: batch.percent(),
        results,
    }
}
