//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: Counts of ticks received upstream, delivered and dropped
//! - **Upstream**: Subscription commands, reconnects, malformed frames
//! - **Sessions**: Active sessions and active symbols
//! - **Latency**: Fan-out duration per tick batch
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_relay_ticks_received_total",
        "Total ticks received from the upstream feed"
    );
    describe_counter!(
        "price_relay_ticks_delivered_total",
        "Total ticks queued for downstream sessions"
    );
    describe_counter!(
        "price_relay_ticks_dropped_total",
        "Total ticks dropped because a session queue was full"
    );
    describe_counter!(
        "price_relay_overflow_disconnects_total",
        "Total sessions disconnected for falling behind"
    );
    describe_counter!(
        "price_relay_malformed_messages_total",
        "Total malformed messages dropped by source"
    );
    describe_counter!(
        "price_relay_upstream_commands_total",
        "Total subscription commands sent upstream by kind"
    );
    describe_counter!(
        "price_relay_reconnects_total",
        "Total upstream reconnection attempts"
    );

    describe_gauge!(
        "price_relay_upstream_connected",
        "Whether the upstream feed is connected (1) or not (0)"
    );
    describe_gauge!(
        "price_relay_active_sessions",
        "Number of initialized downstream sessions"
    );
    describe_gauge!(
        "price_relay_active_symbols",
        "Number of symbols with at least one subscriber"
    );

    describe_histogram!(
        "price_relay_dispatch_seconds",
        "Time to fan one tick batch out to sessions"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for malformed message sources.
#[derive(Debug, Clone, Copy)]
pub enum MessageSource {
    /// Upstream feed frame or trade entry.
    Upstream,
    /// Downstream client control message.
    Downstream,
}

impl MessageSource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
        }
    }
}

/// Metric labels for upstream subscription commands.
#[derive(Debug, Clone, Copy)]
pub enum CommandKind {
    /// Subscribe frame.
    Subscribe,
    /// Unsubscribe frame.
    Unsubscribe,
}

impl CommandKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Record ticks received from the upstream feed.
pub fn record_ticks_received(count: u64) {
    counter!("price_relay_ticks_received_total").increment(count);
}

/// Record ticks queued for sessions.
pub fn record_ticks_delivered(count: u64) {
    counter!("price_relay_ticks_delivered_total").increment(count);
}

/// Record ticks dropped for slow sessions.
pub fn record_ticks_dropped(count: u64) {
    counter!("price_relay_ticks_dropped_total").increment(count);
}

/// Record sessions disconnected for overflow.
pub fn record_overflow_disconnects(count: u64) {
    counter!("price_relay_overflow_disconnects_total").increment(count);
}

/// Record malformed messages.
pub fn record_malformed(source: MessageSource, count: u64) {
    counter!(
        "price_relay_malformed_messages_total",
        "source" => source.as_str()
    )
    .increment(count);
}

/// Record a subscription command sent upstream.
pub fn record_upstream_command(kind: CommandKind) {
    counter!(
        "price_relay_upstream_commands_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("price_relay_reconnects_total").increment(1);
}

/// Update the upstream connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("price_relay_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the active session count.
pub fn set_active_sessions(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("price_relay_active_sessions").set(count as f64);
}

/// Update the active symbol count.
pub fn set_active_symbols(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("price_relay_active_symbols").set(count as f64);
}

/// Record fan-out duration for one tick batch.
pub fn record_dispatch_duration(duration: Duration) {
    histogram!("price_relay_dispatch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
