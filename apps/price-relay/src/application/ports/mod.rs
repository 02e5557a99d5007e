//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `UpstreamControl`: Opens and closes remote symbol subscriptions
//! - `WatchlistStore`: Loads a session's saved symbols
//!
//! ## Driver Ports (Inbound)
//!
//! - `SymbolDemand`: Lets the upstream feed ask which symbols to replay

use async_trait::async_trait;

use crate::domain::market::Symbol;

// =============================================================================
// Upstream Control
// =============================================================================

/// Remote subscription control for the upstream feed.
///
/// Called while the relay holds its state lock, so implementations must
/// never block or await.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamControl: Send + Sync {
    /// Open a remote subscription for `symbol` if one is not open.
    fn ensure_subscribed(&self, symbol: &Symbol);

    /// Close the remote subscription for `symbol` if one is open.
    fn ensure_unsubscribed(&self, symbol: &Symbol);
}

/// Source of the symbols currently demanded downstream.
///
/// The upstream feed replays this set on every successful connect.
#[cfg_attr(test, mockall::automock)]
pub trait SymbolDemand: Send + Sync {
    /// Snapshot of every symbol with at least one consumer.
    fn demanded_symbols(&self) -> Vec<Symbol>;
}

// =============================================================================
// Watchlist Store
// =============================================================================

/// Read side of saved-symbol persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatchlistStore: Send + Sync {
    /// Saved symbols for a session, in saved order.
    ///
    /// Entries are returned raw; the relay normalizes them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store cannot be read.
    async fn saved_symbols(&self, session_id: &str) -> Result<Vec<String>, StoreError>;
}

/// Errors from a [`WatchlistStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backing storage could not be read.
    #[error("watchlist storage unavailable: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data is not in the expected shape.
    #[error("watchlist data is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}
