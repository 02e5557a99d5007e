//! Domain Layer - Core relay types and state.
//!
//! This layer contains the market data types and the two registries that
//! make up the relay's subscription state. Nothing here performs I/O or
//! synchronization; the application layer owns locking.

/// Market data types (symbols, ticks).
pub mod market;

/// Per-session subscription tracking.
pub mod session;

/// Per-symbol consumer tracking.
pub mod subscription;
