use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Bookkeeping for a single WebSocket connection.
struct WsConnection {
    sender: WsSender,
    /// Cancels every tool call still running for this connection.
    cancel: CancellationToken,
    connected_at: Instant,
}

/// What a freshly registered connection needs to run.
pub struct WsRegistration {
    pub sender: WsSender,
    pub receiver: mpsc::UnboundedReceiver<Message>,
    pub cancel: CancellationToken,
}

/// Tracks active WebSocket connections and their in-flight work.
///
/// Each connection's cancel token is a child of the server shutdown
/// token, so shutting down the server cancels every in-flight poll.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
    shutdown: CancellationToken,
}

impl WsManager {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Register a new connection.
    pub async fn add(&self, conn_id: String) -> WsRegistration {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.shutdown.child_token();
        let conn = WsConnection {
            sender: tx.clone(),
            cancel: cancel.clone(),
            connected_at: Instant::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        WsRegistration {
            sender: tx,
            receiver: rx,
            cancel,
        }
    }

    /// Remove a connection and cancel its in-flight tool calls.
    ///
    /// Returns how long the connection was open.
    pub async fn remove(&self, conn_id: &str) -> Option<Duration> {
        let conn = self.connections.write().await.remove(conn_id)?;
        conn.cancel.cancel();
        Some(conn.connected_at.elapsed())
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Cancel all in-flight work, send a Close frame to every connection,
    /// then clear the map.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            conn.cancel.cancel();
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }
}
