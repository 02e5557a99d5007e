//! Finnhub WebSocket Adapter
//!
//! Implements the upstream trade feed client:
//!
//! - **Client**: Connection lifecycle, subscription replay, command dedup
//! - **Codec**: Lenient JSON decoding of trade batches
//! - **Reconnect**: Fixed or exponential backoff schedule

pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod state;

pub use client::{
    FeedCommand, FeedError, FeedEvent, FeedHandle, FinnhubClient, FinnhubClientConfig,
};
pub use codec::{CodecError, FinnhubCodec};
pub use messages::{ControlFrame, ControlKind, FinnhubMessage, TradeEntry};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::{FeedConnectionState, FeedState, FeedStatus};
