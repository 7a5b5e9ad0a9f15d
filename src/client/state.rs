//! Client-side range list and host grids
//!
//! The client is the only owner of ranges. Grids change only by merging
//! events received from the server.

use crate::error::ScanError;
use crate::network::{RangePrefix, HOSTS_PER_RANGE};
use crate::protocol::ScanEvent;
use crate::scanner::HostResult;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Last known state of one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSlot {
    pub reachable: bool,
    pub latency_ms: u32,
}

impl HostSlot {
    pub fn reachable(latency_ms: u32) -> Self {
        Self {
            reachable: true,
            latency_ms,
        }
    }

    pub fn unreachable() -> Self {
        Self::default()
    }
}

impl From<&HostResult> for HostSlot {
    fn from(result: &HostResult) -> Self {
        if result.reachable {
            Self::reachable(result.latency_ms)
        } else {
            Self::unreachable()
        }
    }
}

/// When a range was last scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "at", rename_all = "lowercase")]
pub enum LastScan {
    #[default]
    Never,
    Scanning,
    At(DateTime<Utc>),
}

/// A configured /24 range and its grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub id: Uuid,
    pub prefix: RangePrefix,
    pub hosts: Vec<HostSlot>,
    pub last_scan: LastScan,
    /// Timestamp of the last completed scan, restored when a scan errors out.
    #[serde(default)]
    pub last_completed: Option<DateTime<Utc>>,
}

impl Range {
    pub fn new(prefix: RangePrefix) -> Self {
        Self {
            id: Uuid::new_v4(),
            prefix,
            hosts: vec![HostSlot::unreachable(); HOSTS_PER_RANGE],
            last_scan: LastScan::Never,
            last_completed: None,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.last_scan == LastScan::Scanning
    }

    pub fn reachable_count(&self) -> usize {
        self.hosts.iter().filter(|slot| slot.reachable).count()
    }

    /// Force the grid to exactly 255 slots, repairing hand-edited state files.
    pub(crate) fn normalize(&mut self) {
        self.hosts.resize(HOSTS_PER_RANGE, HostSlot::unreachable());
        for slot in &mut self.hosts {
            if !slot.reachable {
                slot.latency_ms = 0;
            }
        }
    }

    fn merge(&mut self, results: &[HostResult]) {
        for result in results {
            match self.hosts.get_mut(result.index as usize) {
                Some(slot) => *slot = HostSlot::from(result),
                None => debug!("{}: ignoring out-of-range index {}", self.prefix, result.index),
            }
        }
    }

    fn settle(&mut self) {
        self.last_scan = match self.last_completed {
            Some(at) => LastScan::At(at),
            None => LastScan::Never,
        };
    }
}

/// The caller-visible list of ranges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    ranges: Vec<Range>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn prefixes(&self) -> Vec<RangePrefix> {
        self.ranges.iter().map(|range| range.prefix).collect()
    }

    pub fn get(&self, prefix: RangePrefix) -> Option<&Range> {
        self.ranges.iter().find(|range| range.prefix == prefix)
    }

    pub fn add_range(&mut self, prefix: RangePrefix) -> crate::Result<&Range> {
        if self.get(prefix).is_some() {
            return Err(ScanError::DuplicateRange(prefix.to_string()));
        }
        self.ranges.push(Range::new(prefix));
        let index = self.ranges.len() - 1;
        Ok(&self.ranges[index])
    }

    pub fn remove_range(&mut self, prefix: RangePrefix) -> crate::Result<Range> {
        let position = self
            .ranges
            .iter()
            .position(|range| range.prefix == prefix)
            .ok_or_else(|| ScanError::UnknownRange(prefix.to_string()))?;
        Ok(self.ranges.remove(position))
    }

    /// Merge one server event. Returns whether anything changed.
    pub fn apply(&mut self, event: &ScanEvent) -> bool {
        match event {
            ScanEvent::Progress { prefix, results, .. } => match self.range_mut(*prefix) {
                Some(range) => {
                    range.merge(results);
                    range.last_scan = LastScan::Scanning;
                    true
                }
                None => {
                    debug!("Discarding progress for removed range {}", prefix);
                    false
                }
            },
            ScanEvent::Complete {
                prefix,
                results,
                timestamp,
            } => match self.range_mut(*prefix) {
                Some(range) => {
                    range.hosts = vec![HostSlot::unreachable(); HOSTS_PER_RANGE];
                    range.merge(results);
                    range.last_scan = LastScan::At(*timestamp);
                    range.last_completed = Some(*timestamp);
                    true
                }
                None => {
                    debug!("Discarding completion for removed range {}", prefix);
                    false
                }
            },
            ScanEvent::Error { .. } => {
                let mut changed = false;
                for range in self.ranges.iter_mut().filter(|range| range.is_scanning()) {
                    range.settle();
                    changed = true;
                }
                changed
            }
        }
    }

    /// Clear any `Scanning` marker, e.g. after the connection dropped mid-scan.
    pub fn settle_all(&mut self) -> bool {
        self.apply(&ScanEvent::error("connection lost"))
    }

    pub(crate) fn normalize(&mut self) {
        for range in &mut self.ranges {
            range.normalize();
        }
    }

    fn range_mut(&mut self, prefix: RangePrefix) -> Option<&mut Range> {
        self.ranges.iter_mut().find(|range| range.prefix == prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix() -> RangePrefix {
        RangePrefix::new(10, 0, 0)
    }

    fn full_results(reachable: bool) -> Vec<HostResult> {
        (0..HOSTS_PER_RANGE as u8)
            .map(|index| HostResult {
                index,
                reachable,
                latency_ms: if reachable { 5 } else { 0 },
            })
            .collect()
    }

    #[test]
    fn test_add_and_remove() {
        let mut state = ClientState::new();
        let range = state.add_range(prefix()).unwrap();
        assert_eq!(range.hosts.len(), HOSTS_PER_RANGE);
        assert_eq!(range.last_scan, LastScan::Never);
        assert!(matches!(state.add_range(prefix()), Err(ScanError::DuplicateRange(_))));

        state.remove_range(prefix()).unwrap();
        assert!(matches!(state.remove_range(prefix()), Err(ScanError::UnknownRange(_))));
    }

    #[test]
    fn test_progress_merges_and_marks_scanning() {
        let mut state = ClientState::new();
        state.add_range(prefix()).unwrap();

        let changed = state.apply(&ScanEvent::Progress {
            prefix: prefix(),
            percent: 20,
            results: vec![
                HostResult { index: 0, reachable: true, latency_ms: 2 },
                HostResult { index: 1, reachable: false, latency_ms: 0 },
            ],
        });

        assert!(changed);
        let range = state.get(prefix()).unwrap();
        assert!(range.is_scanning());
        assert_eq!(range.hosts[0], HostSlot::reachable(2));
        assert_eq!(range.hosts[1], HostSlot::unreachable());
        assert_eq!(range.reachable_count(), 1);
    }

    #[test]
    fn test_complete_replaces_grid() {
        let mut state = ClientState::new();
        state.add_range(prefix()).unwrap();
        state.apply(&ScanEvent::Complete {
            prefix: prefix(),
            results: full_results(true),
            timestamp: Utc::now(),
        });
        assert_eq!(state.get(prefix()).unwrap().reachable_count(), HOSTS_PER_RANGE);

        let timestamp = Utc::now();
        state.apply(&ScanEvent::Complete {
            prefix: prefix(),
            results: full_results(false),
            timestamp,
        });
        let range = state.get(prefix()).unwrap();
        assert_eq!(range.reachable_count(), 0);
        assert_eq!(range.last_scan, LastScan::At(timestamp));
    }

    #[test]
    fn test_error_clears_scanning_but_keeps_grid() {
        let mut state = ClientState::new();
        state.add_range(prefix()).unwrap();
        let completed_at = Utc::now();
        state.apply(&ScanEvent::Complete {
            prefix: prefix(),
            results: full_results(true),
            timestamp: completed_at,
        });
        state.apply(&ScanEvent::Progress {
            prefix: prefix(),
            percent: 20,
            results: vec![HostResult { index: 7, reachable: false, latency_ms: 0 }],
        });

        assert!(state.apply(&ScanEvent::error("subscriber gone")));
        let range = state.get(prefix()).unwrap();
        assert_eq!(range.last_scan, LastScan::At(completed_at));
        assert_eq!(range.reachable_count(), HOSTS_PER_RANGE - 1);
        assert!(!state.apply(&ScanEvent::error("again")));
    }

    #[test]
    fn test_events_for_removed_range_are_discarded() {
        let mut state = ClientState::new();
        state.add_range(prefix()).unwrap();
        let before = state.clone();

        let other = RangePrefix::new(10, 9, 9);
        assert!(!state.apply(&ScanEvent::Progress { prefix: other, percent: 20, results: vec![] }));
        assert!(!state.apply(&ScanEvent::Complete {
            prefix: other,
            results: full_results(true),
            timestamp: Utc::now(),
        }));
        assert_eq!(state, before);
    }

    #[test]
    fn test_out_of_range_index_ignored() {
        let mut state = ClientState::new();
        state.add_range(prefix()).unwrap();
        state.apply(&ScanEvent::Progress {
            prefix: prefix(),
            percent: 100,
            results: vec![HostResult { index: 255, reachable: true, latency_ms: 1 }],
        });
        assert_eq!(state.get(prefix()).unwrap().hosts.len(), HOSTS_PER_RANGE);
        assert_eq!(state.get(prefix()).unwrap().reachable_count(), 0);
    }
}
