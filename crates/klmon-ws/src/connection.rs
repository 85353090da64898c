//! WebSocket connection manager.
//!
//! Owns the single combined-stream connection: handshake with timeout, a
//! supervisor task running the read loop, fixed-delay reconnection, and the
//! outbound queue used by subscribe/unsubscribe requests. Subscriptions are
//! not restored here; a `ConnectionEvent::Connected { reconnect: true }` is
//! published so the owner of the active stream set can replay it.

use crate::error::{WsError, WsResult};
use crate::message::{InboundMessage, SubscribeRequest};
use crate::rate_limiter::RateLimiter;
use crate::router::StreamRouter;
use crate::ws_write_handle::WsWriteHandle;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use klmon_core::StreamId;
use klmon_telemetry::Metrics;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Combined-stream URL.
    pub url: String,
    /// Handshake must complete within this.
    pub handshake_timeout_ms: u64,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay_ms: u64,
    /// Reconnect if no frame arrives within this (0 = disabled).
    pub idle_timeout_ms: u64,
    /// Outbound control messages allowed per second.
    pub max_messages_per_sec: u32,
    /// Outbound queue depth.
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            handshake_timeout_ms: 10_000,
            reconnect_delay_ms: 3_000,
            idle_timeout_ms: 60_000,
            max_messages_per_sec: 10,
            outbound_buffer: 64,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Lifecycle notification published by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection is up and accepting writes.
    Connected { reconnect: bool },
    /// The connection died; reconnection follows unless closed.
    Disconnected { reason: String },
}

/// Halves of one live connection plus its outbound queue.
struct Session {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    outbound_rx: mpsc::Receiver<Message>,
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    writer: WsWriteHandle,
    router: Arc<StreamRouter>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    next_request_id: AtomicU64,
    reconnect_count: AtomicU32,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new(
        config: ConnectionConfig,
        router: Arc<StreamRouter>,
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::per_second(config.max_messages_per_sec));
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: WsWriteHandle::new(rate_limiter),
            router,
            event_tx,
            next_request_id: AtomicU64::new(1),
            reconnect_count: AtomicU32::new(0),
            shutdown_token: CancellationToken::new(),
            supervisor: Mutex::new(None),
        }
    }

    /// Get a write handle for sending messages.
    pub fn write_handle(&self) -> WsWriteHandle {
        self.writer.clone()
    }

    pub fn router(&self) -> &Arc<StreamRouter> {
        &self.router
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.writer.is_connected()
    }

    /// Successful reconnections since the first connect.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Check if close has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and start supervising the connection.
    ///
    /// Returns once the handshake succeeded and writes are accepted. The
    /// read loop and any later reconnection run on a background task. A
    /// failed first handshake is returned to the caller; no retry happens.
    pub async fn connect(self: &Arc<Self>) -> WsResult<()> {
        if self.is_shutdown() {
            return Err(WsError::Closed);
        }
        if self.supervisor.lock().is_some() {
            debug!("Already connected, ignoring connect");
            return Ok(());
        }

        let ws = self.open().await?;
        let session = self.attach(ws);

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.supervise(session).await });
        *self.supervisor.lock() = Some(handle);

        self.emit(ConnectionEvent::Connected { reconnect: false }).await;
        Ok(())
    }

    /// Send a SUBSCRIBE for `streams`. Returns the request id.
    pub async fn send_subscribe(&self, streams: Vec<StreamId>) -> WsResult<u64> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.send_request(SubscribeRequest::subscribe(streams, id))
            .await?;
        Ok(id)
    }

    /// Send an UNSUBSCRIBE for `streams`. Returns the request id.
    pub async fn unsubscribe(&self, streams: Vec<StreamId>) -> WsResult<u64> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.send_request(SubscribeRequest::unsubscribe(streams, id))
            .await?;
        Ok(id)
    }

    async fn send_request(&self, request: SubscribeRequest) -> WsResult<()> {
        if self.is_shutdown() {
            return Err(WsError::Closed);
        }
        let text = serde_json::to_string(&request)?;
        debug!(
            id = request.id,
            method = %request.method,
            streams = request.params.len(),
            "Sending control request"
        );
        self.writer.send_text(text, request.kind()).await
    }

    /// Stop the transport.
    ///
    /// Idempotent. Cancels reconnection, waits for the read loop to exit,
    /// then closes every subscriber channel.
    pub async fn close(&self) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        info!("ConnectionManager close requested");
        self.shutdown_token.cancel();

        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Supervisor task ended abnormally");
            }
        }

        self.writer.clear();
        let closed = self.router.close_all();
        *self.state.write() = ConnectionState::Closed;
        Metrics::ws_disconnected();
        info!(subscribers_closed = closed, "Transport closed");
    }

    /// Handshake with timeout.
    async fn open(&self) -> WsResult<WsStream> {
        *self.state.write() = ConnectionState::Connecting;
        info!(url = %self.config.url, "Connecting to WebSocket");

        let timeout = Duration::from_millis(self.config.handshake_timeout_ms);
        // TCP_NODELAY for lower latency
        let connect = connect_async_tls_with_config(&self.config.url, None, true, None);

        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => {
                *self.state.write() = ConnectionState::Disconnected;
                Err(WsError::ConnectionFailed(e.to_string()))
            }
            Err(_) => {
                *self.state.write() = ConnectionState::Disconnected;
                Err(WsError::HandshakeTimeout(self.config.handshake_timeout_ms))
            }
        }
    }

    /// Split a fresh connection and install its outbound queue.
    fn attach(&self, ws: WsStream) -> Session {
        let (sink, stream) = ws.split();
        let (tx, outbound_rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        self.writer.install(tx);
        *self.state.write() = ConnectionState::Connected;
        Metrics::ws_connected();
        info!("WebSocket connected");
        Session {
            sink,
            stream,
            outbound_rx,
        }
    }

    /// Run read loops until close, reconnecting after each failure.
    async fn supervise(self: Arc<Self>, mut session: Session) {
        loop {
            let Some(reason) = self.read_loop(&mut session).await else {
                break;
            };

            self.writer.clear();
            Metrics::ws_disconnected();
            warn!(reason = %reason, "WebSocket connection lost");
            self.emit(ConnectionEvent::Disconnected {
                reason: reason.to_string(),
            })
            .await;

            match self.reconnect(&reason).await {
                Some(ws) => {
                    session = self.attach(ws);
                    self.reconnect_count.fetch_add(1, Ordering::Relaxed);
                    self.emit(ConnectionEvent::Connected { reconnect: true })
                        .await;
                }
                None => break,
            }
        }

        self.writer.clear();
        debug!("Connection supervisor exited");
    }

    /// Retry the handshake with a fixed delay until success or close.
    async fn reconnect(&self, reason: &WsError) -> Option<WsStream> {
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        let label = reconnect_reason(reason);
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                return None;
            }
            *self.state.write() = ConnectionState::Reconnecting;
            attempt += 1;
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            // Wait for delay OR shutdown signal
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    return None;
                }
            }

            Metrics::ws_reconnect(label);
            match self.open().await {
                Ok(ws) => {
                    info!(attempt, "Reconnected");
                    return Some(ws);
                }
                Err(e) => {
                    error!(attempt, error = %e, "Reconnection attempt failed");
                }
            }
        }
    }

    /// Drive one connection. Returns `None` on close, otherwise why the
    /// connection must be considered dead.
    async fn read_loop(&self, session: &mut Session) -> Option<WsError> {
        let idle_limit = (self.config.idle_timeout_ms > 0)
            .then(|| Duration::from_millis(self.config.idle_timeout_ms));
        let idle = tokio::time::sleep(idle_limit.unwrap_or(Duration::from_secs(86_400)));
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in read loop");
                    let close = session.sink.send(Message::Close(None));
                    if tokio::time::timeout(Duration::from_secs(1), close).await.is_err() {
                        warn!("Timed out sending Close frame");
                    }
                    return None;
                }

                msg = session.stream.next() => {
                    if let Some(limit) = idle_limit {
                        idle.as_mut().reset(tokio::time::Instant::now() + limit);
                    }
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text_message(&text),
                        Some(Ok(Message::Ping(data))) => {
                            trace!("Received ping, sending pong");
                            if let Err(e) = session.sink.send(Message::Pong(data)).await {
                                return Some(e.into());
                            }
                            Metrics::ws_msg_sent("pong");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Some(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket read error");
                            return Some(e.into());
                        }
                        None => {
                            return Some(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            });
                        }
                    }
                }

                Some(outbound) = session.outbound_rx.recv() => {
                    if let Err(e) = session.sink.send(outbound).await {
                        error!(error = %e, "WebSocket write error");
                        return Some(e.into());
                    }
                }

                () = &mut idle, if idle_limit.is_some() => {
                    warn!(idle_timeout_ms = self.config.idle_timeout_ms, "No frames received");
                    return Some(WsError::IdleTimeout(self.config.idle_timeout_ms));
                }
            }
        }
    }

    fn handle_text_message(&self, text: &str) {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(InboundMessage::Envelope(envelope)) => {
                self.router
                    .dispatch(envelope.stream.as_str(), envelope.data);
            }
            Ok(InboundMessage::Response { result, id }) => {
                debug!(id, ?result, "Subscription acknowledged");
            }
            Ok(InboundMessage::Error { error, id }) => {
                warn!(?id, %error, "Exchange rejected request");
            }
            Err(e) => {
                Metrics::ws_decode_error();
                warn!(error = %e, len = text.len(), "Discarding undecodable frame");
            }
        }
    }

    async fn emit(&self, event: ConnectionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Connection event receiver dropped");
        }
    }
}

/// Metric label for a disconnect cause.
fn reconnect_reason(error: &WsError) -> &'static str {
    match error {
        WsError::IdleTimeout(_) => "idle_timeout",
        WsError::ConnectionClosed { .. } => "closed",
        WsError::Tungstenite(_) => "read_error",
        _ => "other",
    }
}
