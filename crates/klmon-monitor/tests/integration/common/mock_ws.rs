//! Mock combined-stream WebSocket server for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections
//! - Acknowledge SUBSCRIBE/UNSUBSCRIBE requests
//! - Record received messages
//! - Push frames to every connected client
//! - Drop every connection without a close handshake

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum Command {
    Push(String),
    Drop,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    commands: broadcast::Sender<Command>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockWsServer {
    /// Start a new mock WebSocket server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (commands, _) = broadcast::channel(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let commands_clone = commands.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let messages = messages_clone.clone();
                        let connections = connections_clone.clone();
                        let commands = commands_clone.subscribe();
                        tokio::spawn(handle_connection(stream, messages, connections, commands));
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = commands_clone.send(Command::Drop);
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            commands,
            messages,
            connections,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of completed handshakes.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Get all received messages.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Received control requests with the given method.
    pub async fn requests(&self, method: &str) -> Vec<Value> {
        self.received_messages()
            .await
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .filter(|value| value["method"] == method)
            .collect()
    }

    /// How many SUBSCRIBE requests named `stream`.
    pub async fn subscribe_count(&self, stream: &str) -> usize {
        self.requests("SUBSCRIBE")
            .await
            .iter()
            .filter(|request| {
                request["params"]
                    .as_array()
                    .is_some_and(|params| params.iter().any(|p| p == stream))
            })
            .count()
    }

    /// Send a text frame to every connected client.
    pub fn push(&self, text: String) {
        let _ = self.commands.send(Command::Push(text));
    }

    /// Drop every connection without a close frame.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    mut commands: broadcast::Receiver<Command>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    messages.lock().await.push_back(text.clone());

                    // Acknowledge control requests
                    if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                        if parsed.get("method").is_some() {
                            let response = json!({"result": null, "id": parsed["id"]});
                            let _ = write.send(Message::Text(response.to_string())).await;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            cmd = commands.recv() => match cmd {
                Ok(Command::Push(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Drop) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => {}
            },
        }
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Combined-stream kline frame for a one-minute candle.
pub fn kline_frame(symbol: &str, open_time: i64, close: f64) -> String {
    json!({
        "stream": format!("{}@kline_1m", symbol.to_lowercase()),
        "data": {
            "e": "kline",
            "E": open_time + 1_000,
            "s": symbol,
            "k": {
                "t": open_time,
                "T": open_time + 59_999,
                "s": symbol,
                "i": "1m",
                "o": "100.0",
                "c": close.to_string(),
                "h": (close.max(100.0) + 1.0).to_string(),
                "l": "99.0",
                "v": "10.0",
                "n": 42,
                "x": false,
                "q": "1000.0",
                "V": "5.0",
                "Q": "500.0",
                "B": "0"
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
