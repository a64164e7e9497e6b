//! One persistent websocket per client session with bounded automatic
//! reconnect, request/reply correlation and a single event subscription.

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use chrono::{TimeDelta, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::{ClientError, ClientResult};
use crate::protocol::{ClientMessage, Request, ServerFrame, ServerMessage};

const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:7420/ws";
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings.
///
/// ```
/// use pokequiz::client::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::new("ws://localhost:7420/ws")
///     .with_max_reconnect_attempts(3)
///     .with_request_timeout(Duration::from_secs(2));
/// assert_eq!(config.max_reconnect_attempts, 3);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: String,
    /// Consecutive failed attempts before the connection is declared failed
    pub max_reconnect_attempts: u32,
    /// Base delay between attempts; grows linearly with the attempt number
    pub reconnect_backoff: Duration,
    pub request_timeout: Duration,
    /// Buffered events before the subscriber is considered lagging.
    /// Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
}

impl ConnectionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }

    /// Endpoint from `POKEQUIZ_ENDPOINT`, everything else default
    pub fn from_env() -> Self {
        Self::new(std::env::var("POKEQUIZ_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()))
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted
    Failed,
    Stopped,
}

/// What the subscriber receives
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A broadcast or unsolicited server message
    Event(ServerMessage),
    /// Transport dropped; pending requests have failed and queued sends
    /// were discarded
    Disconnected,
    /// Transport is back; the server knows nothing about this socket yet
    Reconnected,
    /// Events were dropped because the subscriber fell behind
    Lagged,
}

/// The single event stream of a connection. Dropping it releases the slot.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Inbound>,
}

impl Subscription {
    /// Next inbound item, or `None` once the connection has failed or stopped
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }
}

struct Inner {
    config: ConnectionConfig,
    status: watch::Sender<ConnectionStatus>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ServerMessage>>>,
    subscriber: Mutex<Option<mpsc::Sender<Inbound>>>,
    lagged: AtomicBool,
    next_id: AtomicU64,
    /// Server clock minus local clock in ms, from the last `Welcome`
    clock_offset_ms: AtomicI64,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

/// Handle to the shared connection. Clones share one socket; pass it to
/// every component that talks to the server.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                status,
                outgoing: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                subscriber: Mutex::new(None),
                lagged: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                clock_offset_ms: AtomicI64::new(0),
                task: Mutex::new(None),
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// How far the server's clock is ahead of ours, as of the last greeting
    pub fn clock_offset(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.inner.clock_offset_ms.load(Ordering::Relaxed))
    }

    /// Start the connection if it is not running and wait until it is up.
    /// Calling this on a live connection returns immediately.
    pub async fn ensure_connection(&self) -> ClientResult<()> {
        {
            let mut task = self.inner.task.lock().await;
            if task.as_ref().map_or(true, |t| t.is_finished()) {
                self.inner.shutdown.send_replace(false);
                self.inner.status.send_replace(ConnectionStatus::Connecting);
                *task = Some(tokio::spawn(drive(self.inner.clone())));
            }
        }

        let mut status = self.inner.status.subscribe();
        let settled = status
            .wait_for(|s| {
                matches!(
                    s,
                    ConnectionStatus::Connected | ConnectionStatus::Failed | ConnectionStatus::Stopped
                )
            })
            .await
            .map(|s| *s)
            .map_err(|_| ClientError::Transport("connection dropped".to_string()))?;
        match settled {
            ConnectionStatus::Connected => Ok(()),
            other => Err(ClientError::Transport(format!(
                "could not connect to {} ({:?})",
                self.inner.config.endpoint, other
            ))),
        }
    }

    /// Hand out the event stream. Only one subscription may be live at a
    /// time; a second call fails until the first is dropped.
    pub async fn subscribe(&self) -> ClientResult<Subscription> {
        let mut slot = self.inner.subscriber.lock().await;
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(ClientError::AlreadySubscribed);
        }
        let (tx, rx) = mpsc::channel(self.inner.config.event_channel_capacity.max(1));
        *slot = Some(tx);
        self.inner.lagged.store(false, Ordering::Release);
        Ok(Subscription { rx })
    }

    /// Send a request and wait for its correlated reply. An `Error` reply is
    /// returned as [`ClientError::Rejected`]. Never retried: the caller
    /// decides how to recover.
    pub async fn invoke(&self, msg: ClientMessage) -> ClientResult<ServerMessage> {
        if self.status() != ConnectionStatus::Connected {
            return Err(ClientError::Transport(format!(
                "cannot send {}: not connected",
                msg.kind()
            )));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = msg.kind();
        let json = serde_json::to_string(&Request { id: Some(id), msg })?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);
        let queued = match self.inner.outgoing.lock().await.as_ref() {
            Some(out) => out.send(json).is_ok(),
            None => false,
        };
        if !queued {
            self.inner.pending.lock().await.remove(&id);
            return Err(ClientError::Transport(format!("cannot send {}: not connected", kind)));
        }

        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ServerMessage::Error { code, msg })) => Err(ClientError::Rejected { code, msg }),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::Transport(format!(
                "connection lost before {} was answered",
                kind
            ))),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    /// Close the connection. Only the owner of the session's end of life
    /// should call this.
    pub async fn stop(&self) {
        tracing::debug!("Stopping connection to {}", self.inner.config.endpoint);
        self.inner.shutdown.send_replace(true);

        let task = self.inner.task.lock().await.take();
        if let Some(mut task) = task {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!("Connection task did not exit in time; aborting");
                task.abort();
            }
        }
        self.inner.teardown().await;
        self.inner.subscriber.lock().await.take();
        self.inner.status.send_replace(ConnectionStatus::Stopped);
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.config.endpoint)
            .field("status", &self.status())
            .finish()
    }
}

impl Inner {
    /// Fail pending requests and drop anything not yet written
    async fn teardown(&self) {
        self.outgoing.lock().await.take();
        let dropped = self.pending.lock().await.drain().count();
        if dropped > 0 {
            tracing::debug!("Failed {} pending request(s)", dropped);
        }
    }

    async fn deliver(&self, inbound: Inbound) {
        let Some(tx) = self.subscriber.lock().await.clone() else {
            return;
        };
        if self.lagged.load(Ordering::Acquire) && tx.try_send(Inbound::Lagged).is_ok() {
            self.lagged.store(false, Ordering::Release);
        }
        match tx.try_send(inbound) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Subscriber is not keeping up; dropping event");
                self.lagged.store(true, Ordering::Release);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn dispatch(&self, text: &str) {
        let frame = match serde_json::from_str::<ServerFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Failed to parse server message: {}", e);
                return;
            }
        };
        if let Some(id) = frame.reply_to {
            if let Some(tx) = self.pending.lock().await.remove(&id) {
                let _ = tx.send(frame.msg);
                return;
            }
            tracing::debug!("Reply {} arrived after its request gave up", id);
            return;
        }
        if let ServerMessage::Welcome { server_now, .. } = &frame.msg {
            let offset = (*server_now - Utc::now()).num_milliseconds();
            self.clock_offset_ms.store(offset, Ordering::Relaxed);
        }
        self.deliver(Inbound::Event(frame.msg)).await;
    }
}

/// Background loop: connect, pump the socket, reconnect with backoff until
/// attempts run out or the manager is stopped
async fn drive(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut attempt = 0u32;
    let mut was_connected = false;

    loop {
        if *shutdown.borrow() {
            break;
        }
        match connect_async(inner.config.endpoint.as_str()).await {
            Ok((socket, _)) => {
                tracing::info!("Connected to {}", inner.config.endpoint);
                attempt = 0;
                let (tx, rx) = mpsc::unbounded_channel();
                *inner.outgoing.lock().await = Some(tx);
                inner.status.send_replace(ConnectionStatus::Connected);
                if was_connected {
                    inner.deliver(Inbound::Reconnected).await;
                }
                was_connected = true;

                let stopped = pump(&inner, socket, rx, &mut shutdown).await;
                inner.teardown().await;
                if stopped {
                    break;
                }
                inner.deliver(Inbound::Disconnected).await;
            }
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", inner.config.endpoint, e);
            }
        }

        attempt += 1;
        if attempt > inner.config.max_reconnect_attempts {
            tracing::error!(
                "Giving up on {} after {} attempt(s)",
                inner.config.endpoint,
                attempt
            );
            inner.status.send_replace(ConnectionStatus::Failed);
            inner.subscriber.lock().await.take();
            return;
        }
        inner
            .status
            .send_replace(ConnectionStatus::Reconnecting { attempt });
        let backoff = inner.config.reconnect_backoff * attempt;
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => {}
        }
    }

    inner.status.send_replace(ConnectionStatus::Stopped);
    inner.subscriber.lock().await.take();
}

/// Multiplex one live socket. Returns `true` when stopped on request.
async fn pump(
    inner: &Inner,
    socket: Socket,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            out = outgoing.recv() => {
                let Some(json) = out else {
                    return false;
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    tracing::error!("Failed to send message: {}", e);
                    return false;
                }
            }

            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => inner.dispatch(&text).await,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Server closed connection");
                        return false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket read error: {}", e);
                        return false;
                    }
                }
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = write.send(Message::Close(None)).await;
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = ConnectionConfig::new("ws://example/ws")
            .with_reconnect_backoff(Duration::from_millis(10))
            .with_event_channel_capacity(0);
        assert_eq!(config.endpoint, "ws://example/ws");
        assert_eq!(config.reconnect_backoff, Duration::from_millis(10));
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[tokio::test]
    async fn test_welcome_sets_clock_offset() {
        let manager = ConnectionManager::new(ConnectionConfig::default());
        assert_eq!(manager.clock_offset(), TimeDelta::zero());

        let frame = ServerFrame {
            reply_to: None,
            msg: ServerMessage::Welcome {
                protocol: crate::protocol::PROTOCOL_VERSION.to_string(),
                server_now: Utc::now() + TimeDelta::seconds(5),
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        manager.inner.dispatch(&json).await;

        let offset = manager.clock_offset();
        assert!(offset > TimeDelta::seconds(4), "{:?}", offset);
        assert!(offset <= TimeDelta::seconds(5), "{:?}", offset);
    }

    #[tokio::test]
    async fn test_invoke_requires_connection() {
        let manager = ConnectionManager::new(ConnectionConfig::default());
        let result = manager
            .invoke(ClientMessage::GetRoomInfo {
                room_code: "AB12".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(
            result.unwrap_err().code(),
            Some(crate::error::ErrorCode::TransportError)
        );
    }

    #[tokio::test]
    async fn test_single_subscription() {
        let manager = ConnectionManager::new(ConnectionConfig::default());
        let first = manager.subscribe().await.unwrap();
        assert!(matches!(
            manager.subscribe().await,
            Err(ClientError::AlreadySubscribed)
        ));

        drop(first);
        assert!(manager.subscribe().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_after_bounded_retries() {
        // Nothing listens on the discard port
        let config = ConnectionConfig::new("ws://127.0.0.1:9/ws")
            .with_max_reconnect_attempts(2)
            .with_reconnect_backoff(Duration::from_millis(5));
        let manager = ConnectionManager::new(config);
        let result = manager.ensure_connection().await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(manager.status(), ConnectionStatus::Failed);
    }
}
