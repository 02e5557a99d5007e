//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_FINNHUB_WS_URL, FinnhubCredentials, RelayConfig, ServerSettings,
    SessionSettings, UpstreamSettings,
};
