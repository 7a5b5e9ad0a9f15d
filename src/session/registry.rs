//! Per-connection bookkeeping
//!
//! Each connection gets its own [`ConnectionContext`] carrying a cancellation
//! token and an in-flight flag. Contexts never share scan state; the registry
//! only counts them and can cancel them all on shutdown.

use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Default)]
struct RegistryInner {
    shutdown: CancellationToken,
    connections: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    active_scans: AtomicUsize,
}

/// Server-wide registry of live connections.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Dropping the context deregisters it and
    /// cancels anything still running on its behalf.
    pub fn connect(&self) -> ConnectionContext {
        let id = Uuid::new_v4();
        if let Ok(mut connections) = self.inner.connections.lock() {
            connections.insert(id, Utc::now());
        }
        debug!("Connection {} registered", id);

        ConnectionContext {
            id,
            token: self.inner.shutdown.child_token(),
            in_flight: Arc::new(AtomicBool::new(false)),
            registry: Arc::clone(&self.inner),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.inner.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn active_scans(&self) -> usize {
        self.inner.active_scans.load(Ordering::SeqCst)
    }

    /// Cancel every connection's in-flight work.
    pub fn shutdown(&self) {
        info!("Cancelling {} active connection(s)", self.active_connections());
        self.inner.shutdown.cancel();
    }
}

/// One caller's connection.
#[derive(Debug)]
pub struct ConnectionContext {
    id: Uuid,
    token: CancellationToken,
    in_flight: Arc<AtomicBool>,
    registry: Arc<RegistryInner>,
}

impl ConnectionContext {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token cancelled when the connection closes or the server shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Claim the connection for a scan.
    ///
    /// Returns `None` while another scan on this connection is still running;
    /// callers reject the new request.
    pub fn try_begin_scan(&self) -> Option<ScanGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.registry.active_scans.fetch_add(1, Ordering::SeqCst);
        Some(ScanGuard {
            in_flight: Arc::clone(&self.in_flight),
            registry: Arc::clone(&self.registry),
        })
    }

    /// Stop all work started on behalf of this connection.
    pub fn close(&self) {
        self.token.cancel();
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        self.token.cancel();
        if let Ok(mut connections) = self.registry.connections.lock() {
            connections.remove(&self.id);
        }
        debug!("Connection {} deregistered", self.id);
    }
}

/// Held by a running scan; releases the connection when dropped.
#[derive(Debug)]
pub struct ScanGuard {
    in_flight: Arc<AtomicBool>,
    registry: Arc<RegistryInner>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
        self.registry.active_scans.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_scan_rejected_until_first_ends() {
        let registry = SessionRegistry::new();
        let conn = registry.connect();

        let guard = conn.try_begin_scan().expect("first scan claims the connection");
        assert!(conn.is_scanning());
        assert!(conn.try_begin_scan().is_none());
        assert_eq!(registry.active_scans(), 1);

        drop(guard);
        assert!(!conn.is_scanning());
        assert_eq!(registry.active_scans(), 0);
        assert!(conn.try_begin_scan().is_some());
    }

    #[test]
    fn test_connections_are_independent() {
        let registry = SessionRegistry::new();
        let a = registry.connect();
        let b = registry.connect();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.active_connections(), 2);

        let _guard_a = a.try_begin_scan().unwrap();
        assert!(b.try_begin_scan().is_some());

        a.close();
        assert!(a.cancellation_token().is_cancelled());
        assert!(!b.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_drop_deregisters_and_cancels() {
        let registry = SessionRegistry::new();
        let conn = registry.connect();
        let token = conn.cancellation_token();
        drop(conn);
        assert!(token.is_cancelled());
        assert_eq!(registry.active_connections(), 0);
    }

    #[test]
    fn test_shutdown_cancels_every_connection() {
        let registry = SessionRegistry::new();
        let a = registry.connect();
        let b = registry.connect();
        registry.shutdown();
        assert!(a.cancellation_token().is_cancelled());
        assert!(b.cancellation_token().is_cancelled());
    }
}
