//! Scan server: WebSocket endpoint and health check
//!
//! ```text
//! GET /ws       WebSocket, JSON scan protocol
//! GET /health   liveness plus connection and scan counts
//! ```

use crate::config::ServerConfig;
use crate::error::ScanError;
use crate::network::{PingProber, Prober};
use crate::protocol::{ClientMessage, ScanEvent};
use crate::scanner::RangeScanner;
use crate::session::{ConnectionContext, ScanRequest, ScanSession, SessionRegistry};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    registry: SessionRegistry,
    session: ScanSession,
    event_buffer: usize,
}

impl AppState {
    pub fn new(prober: Arc<dyn Prober>, config: &ServerConfig) -> Self {
        let scanner = RangeScanner::new(prober).with_batch_size(config.batch_size);
        Self {
            registry: SessionRegistry::new(),
            session: ScanSession::new(scanner),
            event_buffer: config.event_buffer.max(1),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInfo {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub active_connections: usize,
    pub active_scans: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handle_upgrade))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Bind `config.listen_addr()` and serve with real `ping` probes until
/// `shutdown` fires.
pub async fn serve(config: &ServerConfig, shutdown: CancellationToken) -> crate::Result<()> {
    config.validate()?;
    let prober: Arc<dyn Prober> = Arc::new(PingProber::new(config.probe_timeout()));
    let state = AppState::new(prober, config);

    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!(
        "Listening on {} (batch size {}, probe timeout {:?})",
        listener.local_addr()?,
        config.batch_size,
        config.probe_timeout()
    );
    serve_on(listener, state, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve_on(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> crate::Result<()> {
    let registry = state.registry.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            registry.shutdown();
        })
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthInfo> {
    Json(HealthInfo {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        active_connections: state.registry.active_connections(),
        active_scans: state.registry.active_scans(),
    })
}

async fn handle_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let ctx = state.registry.connect();
    let token = ctx.cancellation_token();
    info!("Connection {} opened", ctx.id());

    let (mut outbound, mut inbound) = socket.split();
    let (events, mut queued) = mpsc::channel::<ScanEvent>(state.event_buffer);

    let writer_token = token.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = queued.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Dropping unencodable {} event: {}", event.kind(), e);
                    continue;
                }
            };
            if let Err(e) = outbound.send(Message::Text(text)).await {
                debug!("Socket write failed: {}", e);
                break;
            }
        }
        // a dead socket stops the scans feeding it
        writer_token.cancel();
        let _ = outbound.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = inbound.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                handle_text(&text, &ctx, &state.session, &events).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("Connection {} read error: {}", ctx.id(), e);
                break;
            }
        }
    }

    ctx.close();
    drop(events);
    let _ = writer.await;
    info!("Connection {} closed", ctx.id());
}

/// Handle one inbound text frame.
///
/// Rejections are answered with an error event on the same connection.
/// Returns the handle of the scan task when one was started.
pub async fn handle_text(
    text: &str,
    ctx: &ConnectionContext,
    session: &ScanSession,
    events: &mpsc::Sender<ScanEvent>,
) -> Option<JoinHandle<()>> {
    let message = match ClientMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            let reason = match e {
                ScanError::Protocol(reason) => reason,
                other => other.to_string(),
            };
            reject(ctx, events, format!("invalid message: {}", reason)).await;
            return None;
        }
    };

    let request = match ScanRequest::try_from(message) {
        Ok(request) => request,
        Err(e) => {
            reject(ctx, events, e.to_string()).await;
            return None;
        }
    };

    let Some(guard) = ctx.try_begin_scan() else {
        reject(ctx, events, "a scan is already in progress on this connection").await;
        return None;
    };

    info!(
        "Connection {} scanning {} range(s): {}",
        ctx.id(),
        request.prefixes.len(),
        request.prefixes.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    );

    let session = session.clone();
    let sink = events.clone();
    let cancel = ctx.cancellation_token();
    let id = ctx.id();
    Some(tokio::spawn(async move {
        let _guard = guard;
        let outcome = session.run(&request, &sink, &cancel).await;
        debug!("Connection {} session ended: {:?}", id, outcome);
    }))
}

async fn reject(ctx: &ConnectionContext, events: &mpsc::Sender<ScanEvent>, message: impl Into<String>) {
    let message = message.into();
    warn!("Connection {} request rejected: {}", ctx.id(), message);
    if events.send(ScanEvent::error(message)).await.is_err() {
        debug!("Connection {} gone before the rejection was delivered", ctx.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ProbeOutcome;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    struct SlowUp;

    #[async_trait]
    impl Prober for SlowUp {
        async fn probe(&self, _target: Ipv4Addr) -> ProbeOutcome {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ProbeOutcome::reachable(1)
        }
    }

    fn state() -> AppState {
        AppState::new(Arc::new(SlowUp), &ServerConfig::default())
    }

    #[tokio::test]
    async fn test_invalid_message_keeps_connection_usable() {
        let state = state();
        let ctx = state.registry.connect();
        let (tx, mut rx) = mpsc::channel(8);

        assert!(handle_text("{not json", &ctx, &state.session, &tx).await.is_none());
        match rx.recv().await.unwrap() {
            ScanEvent::Error { message } => assert!(message.starts_with("invalid message: ")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!ctx.is_scanning());
    }

    #[tokio::test]
    async fn test_malformed_prefix_rejected_before_probing() {
        let state = state();
        let ctx = state.registry.connect();
        let (tx, mut rx) = mpsc::channel(8);

        let text = r#"{"type":"scan","ranges":[{"prefix":"10.0.0"},{"prefix":"10.0.300"}]}"#;
        assert!(handle_text(text, &ctx, &state.session, &tx).await.is_none());
        assert_eq!(
            rx.recv().await.unwrap(),
            ScanEvent::error("Invalid range prefix: 10.0.300")
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_scan_on_same_connection_rejected() {
        let state = state();
        let ctx = state.registry.connect();
        let (tx, mut rx) = mpsc::channel(64);
        let scan = r#"{"type":"scan","ranges":[{"prefix":"10.0.0"}]}"#;

        let running = handle_text(scan, &ctx, &state.session, &tx).await.expect("first scan starts");
        assert_eq!(state.registry.active_scans(), 1);
        assert!(handle_text(scan, &ctx, &state.session, &tx).await.is_none());

        let mut saw_rejection = false;
        let mut completions = 0;
        while completions == 0 {
            match rx.recv().await.unwrap() {
                ScanEvent::Error { message } => {
                    assert_eq!(message, "a scan is already in progress on this connection");
                    saw_rejection = true;
                }
                ScanEvent::Complete { results, .. } => {
                    assert_eq!(results.len(), 255);
                    completions += 1;
                }
                ScanEvent::Progress { .. } => {}
            }
        }
        assert!(saw_rejection);

        running.await.unwrap();
        assert_eq!(state.registry.active_scans(), 0);
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let state = state();
        let _a = state.registry.connect();
        let _b = state.registry.connect();

        let Json(health) = handle_health(State(state.clone())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.active_connections, 2);
        assert_eq!(health.active_scans, 0);

        let value = serde_json::to_value(&health).unwrap();
        assert!(value.get("activeConnections").is_some());
        assert!(value.get("timestamp").is_some());
    }
}
