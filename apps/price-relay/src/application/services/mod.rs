//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `RelayContext`: Owns session and symbol state, forwards transitions
//!   upstream, and fans ticks out to sessions
//! - `SessionSink`: Per-connection consumer handle with overflow policy

mod relay;
mod sink;

pub use relay::{DispatchReport, RelayContext, RelayError, RelayStats};
pub use sink::{Delivery, SessionSink};
