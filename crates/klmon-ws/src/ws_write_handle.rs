//! WebSocket write handle for sending control messages.
//!
//! The live connection's outbound queue sits in a slot guarded by a
//! read-write lock. Senders take the read lock so concurrent writers never
//! serialize on each other; the supervisor takes the write lock only to
//! install or clear the queue when a connection comes up or goes down.

use crate::error::{WsError, WsResult};
use crate::rate_limiter::RateLimiter;
use klmon_telemetry::Metrics;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Write handle for sending messages to the current connection.
///
/// Cloneable and reconnect-safe: a handle obtained before a reconnect
/// writes to the new connection afterwards.
#[derive(Clone)]
pub struct WsWriteHandle {
    slot: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    rate_limiter: Arc<RateLimiter>,
}

impl WsWriteHandle {
    /// Create a detached write handle.
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            rate_limiter,
        }
    }

    /// Send a text frame.
    ///
    /// Waits for outbound rate-limit capacity, then queues the frame on the
    /// live connection. `kind` labels the send in metrics.
    ///
    /// # Errors
    ///
    /// - `WsError::NotConnected`: no live connection
    /// - `WsError::SendFailed`: the connection went away while queuing
    pub async fn send_text(&self, text: String, kind: &str) -> WsResult<()> {
        if !self.is_connected() {
            return Err(WsError::NotConnected);
        }

        self.rate_limiter.acquire().await;

        let tx = self.slot.read().clone().ok_or(WsError::NotConnected)?;
        tx.send(Message::Text(text))
            .await
            .map_err(|_| WsError::SendFailed("connection dropped".to_string()))?;

        Metrics::ws_msg_sent(kind);
        debug!(kind, "Outbound message queued");
        Ok(())
    }

    /// Check if a live connection is attached.
    pub fn is_connected(&self) -> bool {
        self.slot.read().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Attach the outbound queue of a new connection.
    pub(crate) fn install(&self, tx: mpsc::Sender<Message>) {
        *self.slot.write() = Some(tx);
    }

    /// Detach the current connection.
    pub(crate) fn clear(&self) {
        *self.slot.write() = None;
    }
}
