//! Session Sink
//!
//! The consumer handle registered for a downstream connection. Wraps the
//! sending half of the connection's bounded outbound queue and enforces the
//! overflow policy: a full queue drops the event, and too many consecutive
//! drops disconnect the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::domain::session::SessionEvent;
use crate::domain::subscription::ConsumerId;

/// Outcome of a single non-blocking delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Event was queued for the connection.
    Queued,
    /// Queue was full; event dropped for this consumer only.
    Dropped,
    /// Queue was full and the drop limit was reached; the connection has
    /// been told to disconnect.
    Overflowed,
    /// Connection is gone; nothing was queued.
    Closed,
}

/// Cloneable handle to one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct SessionSink {
    connection: ConsumerId,
    tx: mpsc::Sender<SessionEvent>,
    consecutive_drops: Arc<AtomicU32>,
    max_consecutive_drops: u32,
    disconnect: CancellationToken,
}

impl SessionSink {
    /// Create a sink for `connection`.
    ///
    /// `max_consecutive_drops` of zero disables overflow disconnects.
    #[must_use]
    pub fn new(
        connection: ConsumerId,
        tx: mpsc::Sender<SessionEvent>,
        max_consecutive_drops: u32,
        disconnect: CancellationToken,
    ) -> Self {
        Self {
            connection,
            tx,
            consecutive_drops: Arc::new(AtomicU32::new(0)),
            max_consecutive_drops,
            disconnect,
        }
    }

    /// Connection this sink delivers to.
    #[must_use]
    pub const fn connection(&self) -> ConsumerId {
        self.connection
    }

    /// Queue an event without waiting.
    pub fn deliver(&self, event: SessionEvent) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.consecutive_drops.store(0, Ordering::Relaxed);
                Delivery::Queued
            }
            Err(TrySendError::Full(_)) => {
                let drops = self.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
                if self.max_consecutive_drops > 0 && drops >= self.max_consecutive_drops {
                    if !self.disconnect.is_cancelled() {
                        tracing::warn!(
                            connection = self.connection,
                            drops,
                            "Outbound queue overflow, disconnecting"
                        );
                        self.disconnect.cancel();
                    }
                    Delivery::Overflowed
                } else {
                    Delivery::Dropped
                }
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Current run of consecutive drops.
    #[must_use]
    pub fn consecutive_drops(&self) -> u32 {
        self.consecutive_drops.load(Ordering::Relaxed)
    }
}
