//! Price Relay Binary
//!
//! Starts the tick relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FINNHUB_API_KEY`: Finnhub API token
//!
//! ## Optional
//! - `FINNHUB_WS_URL`: Upstream URL (default: wss://ws.finnhub.io)
//! - `RELAY_WS_PORT`: Downstream WebSocket port (default: 3002)
//! - `RELAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `RELAY_RECONNECT_DELAY_MS`: Reconnect delay (default: 5000)
//! - `RELAY_RECONNECT_DELAY_MAX_MS`: Reconnect delay cap (default: 5000)
//! - `RELAY_RECONNECT_MULTIPLIER`: Backoff multiplier (default: 1.0, fixed delay)
//! - `RELAY_OUTBOUND_CAPACITY`: Per-session queue size (default: 256)
//! - `RELAY_MAX_CONSECUTIVE_DROPS`: Drops before disconnect (default: 64)
//! - `RELAY_TICK_CHANNEL_CAPACITY`: Upstream event queue size (default: 4096)
//! - `RELAY_WATCHLIST_FILE`: JSON file of saved symbols per session
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-relay)
//! - `RUST_LOG`: Log filter (default: `price_relay=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_relay::application::ports::{SymbolDemand, WatchlistStore};
use price_relay::infrastructure::telemetry;
use price_relay::{
    FeedHandle, FinnhubClient, FinnhubClientConfig, HealthServer, HealthServerState,
    InMemoryWatchlistStore, JsonFileWatchlistStore, RelayConfig, RelayContext, RelayServer,
    RelayServerState, init_metrics, run_dispatcher,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting price relay");

    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Relay state, wired to the upstream through a non-blocking command channel
    let (feed_handle, feed_commands) = FeedHandle::channel();
    let relay = Arc::new(RelayContext::new(Arc::new(feed_handle)));

    // Upstream feed client
    let (event_tx, event_rx) = mpsc::channel(config.upstream.tick_channel_capacity);
    let finnhub_client = Arc::new(FinnhubClient::new(
        FinnhubClientConfig::from_settings(&config.upstream, config.credentials.clone()),
        Arc::clone(&relay) as Arc<dyn SymbolDemand>,
        feed_commands,
        event_tx,
        shutdown_token.clone(),
    ));
    let feed_state = finnhub_client.state();

    // Saved symbols
    let store: Arc<dyn WatchlistStore> = match &config.watchlist_file {
        Some(path) => Arc::new(JsonFileWatchlistStore::new(path.clone())),
        None => Arc::new(InMemoryWatchlistStore::new()),
    };

    // Servers
    let relay_server = RelayServer::new(
        config.server.ws_port,
        Arc::new(RelayServerState::new(
            Arc::clone(&relay),
            store,
            config.sessions.clone(),
        )),
        shutdown_token.clone(),
    );
    let health_server = HealthServer::new(
        config.server.health_port,
        Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&feed_state),
            Arc::clone(&relay),
        )),
        shutdown_token.clone(),
    );

    // Spawn dispatcher
    let dispatcher = tokio::spawn(run_dispatcher(event_rx, Arc::clone(&relay)));

    // Spawn upstream connection. The task owns the client from here on, so
    // the dispatcher's channel closes once the task exits.
    let feed_task = finnhub_client.connect();
    drop(finnhub_client);

    // Spawn health server
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn relay server
    let relay_shutdown = shutdown_token.clone();
    let relay_task = tokio::spawn(async move {
        if let Err(e) = relay_server.run().await {
            tracing::error!(error = %e, "Relay server error");
            relay_shutdown.cancel();
        }
    });

    tracing::info!("Price relay ready");

    await_shutdown(shutdown_token).await;

    let drain = async {
        if let Some(feed_task) = feed_task {
            let _ = feed_task.await;
        }
        let _ = relay_task.await;
        let _ = health_task.await;
        if let Ok(totals) = dispatcher.await {
            tracing::debug!(
                ticks = totals.ticks,
                delivered = totals.delivered,
                dropped = totals.dropped,
                "Dispatcher drained"
            );
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    tracing::info!("Price relay stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        upstream_url = %config.upstream.url,
        watchlist_file = ?config.watchlist_file,
        "Configuration loaded"
    );
    tracing::debug!(
        reconnect_delay_ms = config.upstream.reconnect_delay_initial.as_millis(),
        reconnect_delay_max_ms = config.upstream.reconnect_delay_max.as_millis(),
        reconnect_multiplier = config.upstream.reconnect_delay_multiplier,
        outbound_capacity = config.sessions.outbound_capacity,
        max_consecutive_drops = config.sessions.max_consecutive_drops,
        "Relay tuning"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or for a fatal server
/// error that already cancelled the token.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Shutdown requested internally");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
