//! Network module: range prefixes and reachability probing

pub mod ping;
pub mod prefix;

pub use ping::{PingProber, ProbeOutcome, Prober};
pub use prefix::{RangePrefix, HOSTS_PER_RANGE};
