//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Finnhub WebSocket client adapter.
pub mod finnhub;

/// Downstream WebSocket relay server.
pub mod server;

/// Upstream event consumer and tick fan-out.
pub mod dispatch;

/// Watchlist store adapters.
pub mod persistence;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
