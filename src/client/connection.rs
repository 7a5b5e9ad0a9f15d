//! Client connection handling: reconnection state machine and the watch loop

use crate::client::state::ClientState;
use crate::client::store::StateStore;
use crate::error::ScanError;
use crate::network::RangePrefix;
use crate::protocol::{ClientMessage, ScanEvent};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Delay between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay after every failure.
    Fixed(Duration),
    /// Doubles after each consecutive failure, capped at `max`.
    Backoff { base: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_secs(3))
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Backoff { base, max } => {
                let factor = 2u32.saturating_pow(failures.min(16));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Tracks the connection state and how long to wait before retrying.
///
/// Retries are unbounded.
#[derive(Debug, Clone)]
pub struct Reconnector {
    state: ConnectionState,
    policy: ReconnectPolicy,
    failures: u32,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            failures: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn begin_connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!("begin_connect from {:?}", self.state);
        }
        self.state = ConnectionState::Connecting;
    }

    pub fn connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.failures = 0;
    }

    /// A connection attempt failed; returns the delay before the next one.
    pub fn failed(&mut self) -> Duration {
        let delay = self.policy.delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.state = ConnectionState::Disconnected;
        delay
    }

    /// An established connection dropped; returns the delay before reconnecting.
    pub fn disconnected(&mut self) -> Duration {
        self.state = ConnectionState::Disconnected;
        self.policy.delay(0)
    }

    /// Back to `Disconnected` without counting a failure.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

/// Settings for [`Watcher::run`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub server_url: String,
    /// Rescan period after a sweep finishes; `None` stops after one sweep.
    pub rescan_interval: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

enum ConnectionEnd {
    Finished,
    Shutdown,
}

/// Keeps the persisted client state in sync with a scan server.
pub struct Watcher {
    store: StateStore,
    options: WatchOptions,
    reconnector: Reconnector,
}

impl Watcher {
    pub fn new(store: StateStore, options: WatchOptions) -> Self {
        let reconnector = Reconnector::new(options.reconnect);
        Self {
            store,
            options,
            reconnector,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.reconnector.state()
    }

    /// Connect, sweep every configured range and merge the streamed events.
    ///
    /// `render` runs after every change. Returns once a single sweep finished
    /// (no rescan interval) or `shutdown` fires.
    pub async fn run<R>(&mut self, mut render: R, shutdown: &CancellationToken) -> crate::Result<()>
    where
        R: FnMut(&ClientState, ConnectionState),
    {
        let result = self.watch(&mut render, shutdown).await;
        self.reconnector.reset();
        result
    }

    async fn watch<R>(&mut self, render: &mut R, shutdown: &CancellationToken) -> crate::Result<()>
    where
        R: FnMut(&ClientState, ConnectionState),
    {
        render(&self.store.load()?, self.reconnector.state());

        loop {
            self.reconnector.begin_connect();
            render(&self.store.load()?, self.reconnector.state());
            info!("Connecting to {}", self.options.server_url);

            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                attempt = connect_async(self.options.server_url.as_str()) => attempt,
            };

            let delay = match attempt {
                Ok((socket, _response)) => {
                    self.reconnector.connected();
                    info!("Connected to {}", self.options.server_url);
                    render(&self.store.load()?, self.reconnector.state());

                    let result = self.drive(socket, render, shutdown).await;
                    self.settle(render)?;
                    match result {
                        Ok(ConnectionEnd::Finished) | Ok(ConnectionEnd::Shutdown) => return Ok(()),
                        Err(e @ ScanError::Persistence(_)) | Err(e @ ScanError::Io(_)) => return Err(e),
                        Err(e) => warn!("Connection lost: {}", e),
                    }
                    self.reconnector.disconnected()
                }
                Err(e) => {
                    let delay = self.reconnector.failed();
                    warn!(
                        "Connection to {} failed ({}), attempt {}",
                        self.options.server_url,
                        e,
                        self.reconnector.failures()
                    );
                    delay
                }
            };

            render(&self.store.load()?, self.reconnector.state());
            info!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn drive<R>(&mut self, socket: Socket, render: &mut R, shutdown: &CancellationToken) -> crate::Result<ConnectionEnd>
    where
        R: FnMut(&ClientState, ConnectionState),
    {
        let (mut write, mut read) = socket.split();

        loop {
            let prefixes = self.store.load()?.prefixes();
            match prefixes.last().copied() {
                Some(last) => {
                    let request = ClientMessage::scan(prefixes.iter().map(RangePrefix::to_string));
                    write.send(Message::Text(request.to_json()?)).await.map_err(transport)?;
                    info!("Requested scan of {} range(s)", prefixes.len());

                    loop {
                        let frame = tokio::select! {
                            _ = shutdown.cancelled() => {
                                let _ = write.send(Message::Close(None)).await;
                                return Ok(ConnectionEnd::Shutdown);
                            }
                            frame = read.next() => frame,
                        };
                        let Some(event) = decode(frame)? else { continue };
                        let done = match &event {
                            ScanEvent::Error { message } => {
                                warn!("Server reported: {}", message);
                                true
                            }
                            ScanEvent::Complete { prefix, .. } => *prefix == last,
                            ScanEvent::Progress { .. } => false,
                        };
                        self.merge(&event, render)?;
                        if done {
                            break;
                        }
                    }
                }
                None => warn!("No ranges configured; add one with `subnetwatch ranges add <prefix>`"),
            }

            let Some(interval) = self.options.rescan_interval else {
                let _ = write.send(Message::Close(None)).await;
                return Ok(ConnectionEnd::Finished);
            };

            let rescan = tokio::time::sleep(interval);
            tokio::pin!(rescan);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(ConnectionEnd::Shutdown);
                    }
                    _ = &mut rescan => break,
                    frame = read.next() => {
                        if let Some(event) = decode(frame)? {
                            debug!("Unexpected {} event between sweeps", event.kind());
                            self.merge(&event, render)?;
                        }
                    }
                }
            }
        }
    }

    /// Reload, merge, save. Reloading first lets `ranges add/remove` from
    /// another process take effect mid-sweep.
    fn merge<R>(&self, event: &ScanEvent, render: &mut R) -> crate::Result<()>
    where
        R: FnMut(&ClientState, ConnectionState),
    {
        let mut state = self.store.load()?;
        if state.apply(event) {
            self.store.save(&state)?;
            render(&state, self.reconnector.state());
        }
        Ok(())
    }

    fn settle<R>(&self, render: &mut R) -> crate::Result<()>
    where
        R: FnMut(&ClientState, ConnectionState),
    {
        let mut state = self.store.load()?;
        if state.settle_all() {
            self.store.save(&state)?;
            render(&state, self.reconnector.state());
        }
        Ok(())
    }
}

fn transport(e: tokio_tungstenite::tungstenite::Error) -> ScanError {
    ScanError::Transport(e.to_string())
}

/// Turn a received frame into an event. `Ok(None)` for frames to skip.
fn decode(
    frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> crate::Result<Option<ScanEvent>> {
    match frame {
        None => Err(ScanError::Transport("server closed the connection".to_string())),
        Some(Err(e)) => Err(transport(e)),
        Some(Ok(Message::Text(text))) => match ScanEvent::from_json(&text) {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                warn!("Ignoring unreadable message: {}", e);
                Ok(None)
            }
        },
        Some(Ok(Message::Close(_))) => Err(ScanError::Transport("server closed the connection".to_string())),
        Some(Ok(_)) => Ok(None),
    }
}
