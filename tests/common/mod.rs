//! Fake probers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use subnetwatch::network::{ProbeOutcome, Prober};

/// Even last octets answer with latency equal to the octet.
pub struct EvenHostsUp;

#[async_trait]
impl Prober for EvenHostsUp {
    async fn probe(&self, target: Ipv4Addr) -> ProbeOutcome {
        let last = target.octets()[3];
        if last % 2 == 0 {
            ProbeOutcome::reachable(last as u32)
        } else {
            ProbeOutcome::unreachable()
        }
    }
}

/// Every probe fails.
pub struct AllDown;

#[async_trait]
impl Prober for AllDown {
    async fn probe(&self, _target: Ipv4Addr) -> ProbeOutcome {
        ProbeOutcome::unreachable()
    }
}

/// Counts started probes; each takes `delay` before answering up.
pub struct CountingProber {
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
    delay: Duration,
}

impl CountingProber {
    pub fn new(delay: Duration) -> Self {
        Self {
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for CountingProber {
    async fn probe(&self, _target: Ipv4Addr) -> ProbeOutcome {
        self.started.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        ProbeOutcome::reachable(1)
    }
}
