//! Combined-stream WebSocket transport for the kline monitor.
//!
//! Provides:
//! - A single supervised connection with fixed-delay reconnection
//! - Rate-limited SUBSCRIBE/UNSUBSCRIBE through a reconnect-safe write handle
//! - Paced subscription batches
//! - Per-stream fan-out with drop-on-full backpressure
//! - A registry of the streams that should be live, for resubscription

pub mod batcher;
pub mod connection;
pub mod error;
pub mod message;
pub mod rate_limiter;
pub mod router;
pub mod subscription;
pub mod ws_write_handle;

pub use batcher::{partition, BatcherConfig, SubscriptionBatcher, SubscriptionSink};
pub use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState};
pub use error::{WsError, WsResult};
pub use message::{InboundMessage, StreamEnvelope, SubscribeRequest};
pub use router::{DispatchOutcome, StreamRouter};
pub use subscription::ActiveStreams;
pub use ws_write_handle::WsWriteHandle;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
