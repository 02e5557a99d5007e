//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the relay context and the port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (upstream feed, persistence).
pub mod ports;

/// Application services for session and subscription management.
pub mod services;
