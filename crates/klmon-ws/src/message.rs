//! Combined-stream message types.

use klmon_core::StreamId;
use serde::{Deserialize, Serialize};

// ============================================================================
// Outgoing
// ============================================================================

/// Subscription control request.
///
/// `{"method":"SUBSCRIBE","params":["btcusdt@kline_3m"],"id":1}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub method: String,
    pub params: Vec<StreamId>,
    pub id: u64,
}

impl SubscribeRequest {
    pub fn subscribe(params: Vec<StreamId>, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE".to_string(),
            params,
            id,
        }
    }

    pub fn unsubscribe(params: Vec<StreamId>, id: u64) -> Self {
        Self {
            method: "UNSUBSCRIBE".to_string(),
            params,
            id,
        }
    }

    /// Metric label for this request.
    pub fn kind(&self) -> &'static str {
        if self.method == "UNSUBSCRIBE" {
            "unsubscribe"
        } else {
            "subscribe"
        }
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// Data frame of the combined stream.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    pub stream: StreamId,
    pub data: serde_json::Value,
}

/// Any text frame received on the combined stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    /// `{"stream": "...", "data": {...}}`
    Envelope(StreamEnvelope),
    /// `{"error": {"code": 2, "msg": "..."}, "id": 1}`
    Error {
        error: serde_json::Value,
        #[serde(default)]
        id: Option<u64>,
    },
    /// `{"result": null, "id": 1}`
    Response {
        #[serde(default)]
        result: Option<serde_json::Value>,
        id: u64,
    },
}
