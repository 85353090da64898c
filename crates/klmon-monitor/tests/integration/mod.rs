//! Shared helpers for klmon-monitor integration tests.
//!
//! - A mock combined-stream WebSocket server
//! - Kline frame builders

pub mod common;
