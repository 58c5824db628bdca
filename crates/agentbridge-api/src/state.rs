//! Application state shared by every HTTP and WebSocket handler.

use std::sync::Arc;
use std::time::Instant;

use agentbridge_core::HubHandle;
use agentbridge_types::config::BridgeConfig;
use tokio_util::sync::CancellationToken;

/// Cloned into each handler by axum.
///
/// Holds only the message-passing handle to the hub loop; no control-plane
/// state is reachable from here.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub config: Arc<BridgeConfig>,
    pub started_at: Instant,
    /// Cancelled when the server begins shutting down; open WebSocket
    /// connections close on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(hub: HubHandle, config: BridgeConfig, shutdown: CancellationToken) -> Self {
        Self {
            hub,
            config: Arc::new(config),
            started_at: Instant::now(),
            shutdown,
        }
    }
}
