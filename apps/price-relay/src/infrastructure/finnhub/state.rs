//! Feed State
//!
//! Shared, lock-light view of the upstream connection for health checks
//! and status reporting.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Upstream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedConnectionState {
    /// No transport; waiting for the next attempt.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open and subscriptions replayed.
    Connected,
}

impl FeedConnectionState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Point-in-time copy of [`FeedState`].
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    /// Connection state.
    pub state: FeedConnectionState,
    /// Last successful connect.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last transport error.
    pub last_error: Option<String>,
    /// Symbols currently subscribed at the remote.
    pub remote_subscriptions: usize,
    /// Attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Ticks received since startup.
    pub ticks_received: u64,
}

/// Mutable upstream status shared between the feed task and readers.
#[derive(Debug, Default)]
pub struct FeedState {
    state: parking_lot::RwLock<FeedConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
    remote_subscriptions: AtomicUsize,
    reconnect_attempts: AtomicU32,
    ticks_received: AtomicU64,
}

impl FeedState {
    /// Create a disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: FeedConnectionState) {
        *self.state.write() = state;
        if state == FeedConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
    }

    /// Mark the connection lost with an error.
    pub fn set_error(&self, message: String) {
        *self.state.write() = FeedConnectionState::Disconnected;
        *self.last_error.write() = Some(message);
        self.remote_subscriptions.store(0, Ordering::Relaxed);
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to the received tick counter.
    pub fn add_ticks(&self, count: u64) {
        self.ticks_received.fetch_add(count, Ordering::Relaxed);
    }

    /// Update the remote subscription count.
    pub fn set_remote_subscriptions(&self, count: usize) {
        self.remote_subscriptions.store(count, Ordering::Relaxed);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn get_state(&self) -> FeedConnectionState {
        *self.state.read()
    }

    /// Whether the feed is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.get_state() == FeedConnectionState::Connected
    }

    /// Snapshot every field.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            state: *self.state.read(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            remote_subscriptions: self.remote_subscriptions.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
        }
    }
}
