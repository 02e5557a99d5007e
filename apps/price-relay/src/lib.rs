#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Price Relay - Real-Time Tick Fan-Out
//!
//! A WebSocket relay that maintains a single connection to Finnhub's trade
//! feed and fans price ticks out to many downstream sessions, each with its
//! own changing set of symbols.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core relay types and registries
//!   - `market`: Symbols and ticks
//!   - `subscription`: Per-symbol consumer sets
//!   - `session`: Per-connection symbol sets
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream control, symbol demand, watchlist store
//!   - `services`: Relay context and session sinks
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `finnhub`: Upstream WebSocket client
//!   - `server`: Downstream WebSocket server
//!   - `dispatch`: Upstream event consumer
//!   - `persistence`: Watchlist stores
//!   - `config`: Configuration loading
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                                    ┌──────────────┐
//!                  ┌── subscribe ───►│ RelayContext │◄── init/subscribe ── Client 1..N
//!                  │                 └──────┬───────┘
//! Finnhub WS ◄─────┤                        │ dispatch
//!                  │                 ┌──────┴───────┐
//!                  └──── ticks ─────►│  Dispatcher  │──► session queues ──► Client 1..N
//!                                    └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core relay types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Symbol, SymbolError, Tick};
pub use domain::session::{SessionError, SessionEvent, SessionRegistry};
pub use domain::subscription::{
    ConsumerId, SubscriptionChange, SubscriptionStats, SymbolSubscriptionRegistry,
};

// Application
pub use application::ports::{StoreError, SymbolDemand, UpstreamControl, WatchlistStore};
pub use application::services::{
    Delivery, DispatchReport, RelayContext, RelayError, RelayStats, SessionSink,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FinnhubCredentials, RelayConfig, ServerSettings, SessionSettings,
    UpstreamSettings,
};

// Upstream feed
pub use infrastructure::finnhub::{
    FeedCommand, FeedConnectionState, FeedEvent, FeedHandle, FeedState, FinnhubClient,
    FinnhubClientConfig, ReconnectConfig,
};

// Downstream server
pub use infrastructure::server::{RelayServer, RelayServerError, RelayServerState};

// Dispatcher
pub use infrastructure::dispatch::{DispatchTotals, run_dispatcher};

// Watchlist stores
pub use infrastructure::persistence::{InMemoryWatchlistStore, JsonFileWatchlistStore};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
