//! Downstream Relay Server
//!
//! WebSocket endpoint that downstream clients connect to. Each connection
//! identifies itself with `init`, then adds and removes symbols with
//! `subscribe` / `unsubscribe` and receives `price-update` messages.
//!
//! # Endpoints
//!
//! - `GET /` - WebSocket upgrade
//! - `GET /ws` - WebSocket upgrade (alias)

mod connection;
pub mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, ws::WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::WatchlistStore;
use crate::application::services::RelayContext;
use crate::infrastructure::config::SessionSettings;

pub use protocol::{
    ClientCommand, ClientMessage, PriceData, ProtocolError, ServerMessage, parse_client_message,
};

// =============================================================================
// Server State
// =============================================================================

/// Shared state for downstream connections.
pub struct RelayServerState {
    relay: Arc<RelayContext>,
    store: Arc<dyn WatchlistStore>,
    sessions: SessionSettings,
}

impl RelayServerState {
    /// Create new server state.
    #[must_use]
    pub fn new(
        relay: Arc<RelayContext>,
        store: Arc<dyn WatchlistStore>,
        sessions: SessionSettings,
    ) -> Self {
        Self {
            relay,
            store,
            sessions,
        }
    }

    /// The relay context connections operate on.
    #[must_use]
    pub fn relay(&self) -> Arc<RelayContext> {
        Arc::clone(&self.relay)
    }
}

#[derive(Clone)]
struct AppState {
    server: Arc<RelayServerState>,
    shutdown: CancellationToken,
}

// =============================================================================
// Relay Server
// =============================================================================

/// Downstream WebSocket server.
pub struct RelayServer {
    port: u16,
    state: Arc<RelayServerState>,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a new relay server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<RelayServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router without binding.
    #[must_use]
    pub fn router(&self) -> Router {
        let app_state = AppState {
            server: Arc::clone(&self.state),
            shutdown: self.cancel.clone(),
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .with_state(app_state)
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError` if binding fails or the server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), RelayServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError` if the server fails while running.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RelayServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| RelayServerError::ServerFailed(e.to_string()))?;
        tracing::info!(addr = %local_addr, "Relay server listening");

        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| RelayServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Relay server stopped");
        Ok(())
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, app.server, app.shutdown))
}

// =============================================================================
// Errors
// =============================================================================

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
