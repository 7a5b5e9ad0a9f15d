//! Single-address reachability probes backed by the system `ping`

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Matches `time=12.3 ms`, `time=4ms` and `time<1ms`.
static RTT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("valid RTT regex"));

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub latency_ms: u32,
}

impl ProbeOutcome {
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

/// Issues one reachability probe against one address.
///
/// Implementations must not fail: every failure path resolves to
/// [`ProbeOutcome::unreachable`].
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: Ipv4Addr) -> ProbeOutcome;
}

/// Prober that runs the platform `ping` binary once per address.
#[derive(Debug, Clone)]
pub struct PingProber {
    timeout: Duration,
}

impl PingProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build_command(&self, target: Ipv4Addr) -> Command {
        let mut command = Command::new("ping");

        #[cfg(target_os = "windows")]
        command.args(["-n", "1", "-w", &self.timeout.as_millis().to_string()]);

        #[cfg(target_os = "macos")]
        command.args(["-c", "1", "-W", &self.timeout.as_millis().to_string()]);

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        command.args(["-c", "1", "-W", &self.timeout_secs().to_string()]);

        command
            .arg(target.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }

    /// Linux `ping -W` takes whole seconds.
    #[allow(dead_code)]
    fn timeout_secs(&self) -> u64 {
        let millis = self.timeout.as_millis() as u64;
        ((millis + 999) / 1000).max(1)
    }
}

impl Default for PingProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, target: Ipv4Addr) -> ProbeOutcome {
        // The process enforces its own deadline; this guard catches a hung binary.
        let guard = self.timeout + Duration::from_secs(1);
        let output = match timeout(guard, self.build_command(target).output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!("ping {} failed to run: {}", target, e);
                return ProbeOutcome::unreachable();
            }
            Err(_) => {
                debug!("ping {} exceeded {:?}", target, guard);
                return ProbeOutcome::unreachable();
            }
        };

        if !output.status.success() {
            return ProbeOutcome::unreachable();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_rtt_ms(&stdout) {
            Some(ms) => ProbeOutcome::reachable(ms),
            None => {
                debug!("ping {} succeeded without a parseable round-trip time", target);
                ProbeOutcome::unreachable()
            }
        }
    }
}

/// Extracts the round-trip time from `ping` output, rounded to whole milliseconds.
pub fn parse_rtt_ms(output: &str) -> Option<u32> {
    let captures = RTT_PATTERN.captures(output)?;
    let ms: f64 = captures.get(1)?.as_str().parse().ok()?;
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    Some(ms.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_linux_output() {
        let out = "PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.\n\
                   64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=0.512 ms\n";
        assert_eq!(parse_rtt_ms(out), Some(1));

        let out = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=14.49 ms";
        assert_eq!(parse_rtt_ms(out), Some(14));
    }

    #[test]
    fn test_parse_windows_output() {
        assert_eq!(parse_rtt_ms("Reply from 10.0.0.1: bytes=32 time=3ms TTL=64"), Some(3));
        assert_eq!(parse_rtt_ms("Reply from 10.0.0.1: bytes=32 time<1ms TTL=64"), Some(1));
    }

    #[test]
    fn test_parse_without_rtt() {
        assert_eq!(parse_rtt_ms("Request timeout for icmp_seq 0"), None);
        assert_eq!(parse_rtt_ms(""), None);
    }

    #[test]
    fn test_unreachable_has_zero_latency() {
        let outcome = ProbeOutcome::unreachable();
        assert!(!outcome.reachable);
        assert_eq!(outcome.latency_ms, 0);
    }

    #[test]
    fn test_timeout_secs_rounds_up() {
        assert_eq!(PingProber::new(Duration::from_millis(1000)).timeout_secs(), 1);
        assert_eq!(PingProber::new(Duration::from_millis(1500)).timeout_secs(), 2);
        assert_eq!(PingProber::new(Duration::from_millis(10)).timeout_secs(), 1);
    }
}
