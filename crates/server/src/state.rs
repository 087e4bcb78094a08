use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Tool dispatcher shared by every transport.
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<ServerConfig>,
    /// WebSocket connection registry.
    pub ws_manager: Arc<WsManager>,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, config: ServerConfig) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            dispatcher,
            config: Arc::new(config),
            ws_manager: Arc::new(WsManager::new(shutdown.clone())),
            shutdown,
        }
    }
}
