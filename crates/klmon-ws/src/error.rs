//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake timed out after {0}ms")]
    HandshakeTimeout(u64),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("No frame received for {0}ms")]
    IdleTimeout(u64),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Transport closed")]
    Closed,

    #[error("Message parse error: {0}")]
    Parse(String),

    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(usize),

    #[error("Subscription batch {index} failed: {source}")]
    BatchFailed {
        index: usize,
        #[source]
        source: Box<WsError>,
    },

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WsResult<T> = Result<T, WsError>;
