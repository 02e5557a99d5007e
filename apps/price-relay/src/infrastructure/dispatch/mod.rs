//! Tick Dispatcher
//!
//! The single consumer of upstream feed events. Lifecycle events are
//! logged; tick batches are fanned out through the relay context, which
//! never blocks on a slow session.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::application::services::{DispatchReport, RelayContext};
use crate::infrastructure::finnhub::FeedEvent;
use crate::infrastructure::metrics;

/// Running totals over the dispatcher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchTotals {
    /// Ticks taken off the feed channel.
    pub ticks: u64,
    /// Ticks queued for sessions.
    pub delivered: u64,
    /// Ticks dropped for full session queues.
    pub dropped: u64,
}

impl DispatchTotals {
    fn add(&mut self, report: DispatchReport) {
        self.delivered += report.delivered as u64;
        self.dropped += report.dropped as u64;
    }
}

/// Consume feed events until the channel closes.
///
/// Returns the totals accumulated along the way.
pub async fn run_dispatcher(
    mut rx: mpsc::Receiver<FeedEvent>,
    relay: Arc<RelayContext>,
) -> DispatchTotals {
    let mut totals = DispatchTotals::default();

    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Connected => {
                tracing::info!("Upstream feed connected");
            }
            FeedEvent::Disconnected => {
                tracing::warn!("Upstream feed disconnected");
            }
            FeedEvent::Reconnecting { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Upstream feed reconnecting"
                );
            }
            FeedEvent::Ticks(ticks) => {
                let started = Instant::now();
                let mut batch = DispatchReport::default();

                for tick in &ticks {
                    let report = relay.dispatch(tick);
                    batch.delivered += report.delivered;
                    batch.dropped += report.dropped;
                    batch.disconnected += report.disconnected;
                }

                totals.ticks += ticks.len() as u64;
                totals.add(batch);

                metrics::record_dispatch_duration(started.elapsed());
                metrics::record_ticks_delivered(batch.delivered as u64);
                if batch.dropped > 0 {
                    metrics::record_ticks_dropped(batch.dropped as u64);
                    tracing::debug!(dropped = batch.dropped, "Ticks dropped for slow sessions");
                }
                if batch.disconnected > 0 {
                    metrics::record_overflow_disconnects(batch.disconnected as u64);
                }
            }
            FeedEvent::Error(msg) => {
                tracing::error!(error = %msg, "Upstream feed error");
            }
        }
    }

    tracing::info!(
        ticks = totals.ticks,
        delivered = totals.delivered,
        dropped = totals.dropped,
        "Dispatcher stopped"
    );
    totals
}
