//! Scanner module containing the batch scheduler

pub mod engine;

use crate::network::{ProbeOutcome, RangePrefix, HOSTS_PER_RANGE};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

pub use engine::RangeScanner;

/// Default number of concurrently probed addresses.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Reachability record for one host slot.
///
/// `index` is the slot (0..=254), i.e. last octet minus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostResult {
    pub index: u8,
    pub reachable: bool,
    pub latency_ms: u32,
}

impl HostResult {
    pub fn new(index: u8, outcome: ProbeOutcome) -> Self {
        // Latency only means something for a reachable host.
        let latency_ms = if outcome.reachable { outcome.latency_ms } else { 0 };
        Self {
            index,
            reachable: outcome.reachable,
            latency_ms,
        }
    }
}

/// A consecutive run of last octets probed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBatch {
    pub prefix: RangePrefix,
    pub batch_id: usize,
    /// First last-octet in the batch (1-based).
    pub start: u8,
    /// Last last-octet in the batch, inclusive.
    pub end: u8,
}

impl ScanBatch {
    pub fn size(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Targets paired with their slot index.
    pub fn targets(&self) -> impl Iterator<Item = (u8, Ipv4Addr)> + '_ {
        (self.start..=self.end).filter_map(move |octet| {
            let index = octet - 1;
            self.prefix.host(index as usize).map(|addr| (index, addr))
        })
    }

    pub fn percent(&self) -> u8 {
        percent_complete(self.end as usize)
    }
}

/// Results of one completed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub batch_id: usize,
    pub end: u8,
    pub percent: u8,
    pub results: Vec<HostResult>,
}

/// Percentage of a range covered once `end` (a last octet) has been probed.
///
/// Rounds half up, so `end == 255` is always exactly 100.
pub fn percent_complete(end: usize) -> u8 {
    let end = end.min(HOSTS_PER_RANGE);
    ((100 * end + HOSTS_PER_RANGE / 2) / HOSTS_PER_RANGE) as u8
}

/// Split the 255 host octets of `prefix` into batches of `batch_size`.
///
/// The final batch may be smaller. A zero batch size is treated as one.
pub fn create_batches(prefix: RangePrefix, batch_size: usize) -> Vec<ScanBatch> {
    let batch_size = batch_size.max(1);
    let octets: Vec<u8> = (1..=HOSTS_PER_RANGE as u8).collect();
    octets
        .chunks(batch_size)
        .enumerate()
        .map(|(batch_id, chunk)| ScanBatch {
            prefix,
            batch_id,
            start: chunk[0],
            end: chunk[chunk.len() - 1],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_batches() {
        let batches = create_batches(RangePrefix::new(10, 0, 0), DEFAULT_BATCH_SIZE);
        let ends: Vec<u8> = batches.iter().map(|b| b.end).collect();
        assert_eq!(ends, vec![50, 100, 150, 200, 250, 255]);
        let percents: Vec<u8> = batches.iter().map(|b| b.percent()).collect();
        assert_eq!(percents, vec![20, 39, 59, 78, 98, 100]);
        assert_eq!(batches.last().unwrap().size(), 5);
    }

    #[test]
    fn test_batch_targets() {
        let batches = create_batches(RangePrefix::new(192, 168, 7), 100);
        let targets: Vec<_> = batches[1].targets().collect();
        assert_eq!(targets.len(), 100);
        assert_eq!(targets[0], (100, Ipv4Addr::new(192, 168, 7, 101)));
        assert_eq!(targets[99], (199, Ipv4Addr::new(192, 168, 7, 200)));
    }

    #[test]
    fn test_oversized_and_zero_batch() {
        let one = create_batches(RangePrefix::new(10, 0, 0), 1000);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].size(), HOSTS_PER_RANGE);

        let singles = create_batches(RangePrefix::new(10, 0, 0), 0);
        assert_eq!(singles.len(), HOSTS_PER_RANGE);
    }

    #[test]
    fn test_unreachable_clears_latency() {
        let host = HostResult::new(
            3,
            ProbeOutcome {
                reachable: false,
                latency_ms: 12,
            },
        );
        assert_eq!(host.latency_ms, 0);
    }

    #[test]
    fn test_host_result_wire_format() {
        let host = HostResult::new(4, ProbeOutcome::reachable(7));
        let json = serde_json::to_value(host).unwrap();
        assert_eq!(json, serde_json::json!({"index": 4, "reachable": true, "latencyMs": 7}));
    }
}
