//! Relay Configuration Settings
//!
//! Configuration types for the price relay, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Default Finnhub trade stream endpoint.
pub const DEFAULT_FINNHUB_WS_URL: &str = "wss://ws.finnhub.io";

/// Finnhub API credentials.
#[derive(Clone)]
pub struct FinnhubCredentials {
    api_key: String,
}

impl FinnhubCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for FinnhubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinnhubCredentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Upstream feed connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Finnhub WebSocket URL, without the token.
    pub url: String,
    /// Delay before the first reconnection attempt.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier (1.0 keeps the delay fixed).
    pub reconnect_delay_multiplier: f64,
    /// Capacity of the upstream-to-dispatcher event channel.
    pub tick_channel_capacity: usize,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_FINNHUB_WS_URL.to_string(),
            reconnect_delay_initial: Duration::from_millis(5000),
            reconnect_delay_max: Duration::from_millis(5000),
            reconnect_delay_multiplier: 1.0,
            tick_channel_capacity: 4096,
        }
    }
}

/// Downstream session settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Consecutive drops before a connection is closed (0 = never).
    pub max_consecutive_drops: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            max_consecutive_drops: 64,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Downstream WebSocket port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 3002,
            health_port: 8082,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// API credentials.
    pub credentials: FinnhubCredentials,
    /// Upstream feed settings.
    pub upstream: UpstreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Downstream session settings.
    pub sessions: SessionSettings,
    /// JSON watchlist file; in-memory store when unset.
    pub watchlist_file: Option<PathBuf>,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `FINNHUB_API_KEY` is missing or empty.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("FINNHUB_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("FINNHUB_API_KEY".to_string()))?;

        if api_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("FINNHUB_API_KEY".to_string()));
        }

        let upstream_defaults = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            url: lookup("FINNHUB_WS_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(upstream_defaults.url),
            reconnect_delay_initial: parse_duration_millis(
                lookup("RELAY_RECONNECT_DELAY_MS"),
                upstream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_millis(
                lookup("RELAY_RECONNECT_DELAY_MAX_MS"),
                upstream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                lookup("RELAY_RECONNECT_MULTIPLIER"),
                upstream_defaults.reconnect_delay_multiplier,
            ),
            tick_channel_capacity: parse_nonzero(
                lookup("RELAY_TICK_CHANNEL_CAPACITY"),
                upstream_defaults.tick_channel_capacity,
            ),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            ws_port: parse_or(lookup("RELAY_WS_PORT"), server_defaults.ws_port),
            health_port: parse_or(lookup("RELAY_HEALTH_PORT"), server_defaults.health_port),
        };

        let session_defaults = SessionSettings::default();
        let sessions = SessionSettings {
            outbound_capacity: parse_nonzero(
                lookup("RELAY_OUTBOUND_CAPACITY"),
                session_defaults.outbound_capacity,
            ),
            max_consecutive_drops: parse_or(
                lookup("RELAY_MAX_CONSECUTIVE_DROPS"),
                session_defaults.max_consecutive_drops,
            ),
        };

        let watchlist_file = lookup("RELAY_WATCHLIST_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            credentials: FinnhubCredentials::new(api_key),
            upstream,
            server,
            sessions,
            watchlist_file,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_nonzero(value: Option<String>, default: usize) -> usize {
    match parse_or(value, default) {
        0 => default,
        n => n,
    }
}

fn parse_duration_millis(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_source(|key| env.get(key).cloned())
    }

    #[test]
    fn api_key_is_required() {
        assert!(matches!(
            config_from(&[]),
            Err(ConfigError::MissingEnvVar(key)) if key == "FINNHUB_API_KEY"
        ));
        assert!(matches!(
            config_from(&[("FINNHUB_API_KEY", "  ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = config_from(&[("FINNHUB_API_KEY", "abc")]).unwrap();

        assert_eq!(config.credentials.api_key(), "abc");
        assert_eq!(config.upstream.url, DEFAULT_FINNHUB_WS_URL);
        assert_eq!(config.upstream.reconnect_delay_initial, Duration::from_secs(5));
        assert_eq!(config.upstream.reconnect_delay_max, Duration::from_secs(5));
        assert!((config.upstream.reconnect_delay_multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.upstream.tick_channel_capacity, 4096);
        assert_eq!(config.server.ws_port, 3002);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.sessions.outbound_capacity, 256);
        assert_eq!(config.sessions.max_consecutive_drops, 64);
        assert!(config.watchlist_file.is_none());
    }

    #[test]
    fn overrides_apply() {
        let config = config_from(&[
            ("FINNHUB_API_KEY", "abc"),
            ("FINNHUB_WS_URL", "ws://127.0.0.1:9000"),
            ("RELAY_WS_PORT", "4000"),
            ("RELAY_RECONNECT_DELAY_MS", "250"),
            ("RELAY_RECONNECT_DELAY_MAX_MS", "8000"),
            ("RELAY_RECONNECT_MULTIPLIER", "2.0"),
            ("RELAY_OUTBOUND_CAPACITY", "32"),
            ("RELAY_MAX_CONSECUTIVE_DROPS", "0"),
            ("RELAY_WATCHLIST_FILE", "/tmp/watchlists.json"),
        ])
        .unwrap();

        assert_eq!(config.upstream.url, "ws://127.0.0.1:9000");
        assert_eq!(config.server.ws_port, 4000);
        assert_eq!(config.upstream.reconnect_delay_initial, Duration::from_millis(250));
        assert_eq!(config.upstream.reconnect_delay_max, Duration::from_secs(8));
        assert_eq!(config.sessions.outbound_capacity, 32);
        assert_eq!(config.sessions.max_consecutive_drops, 0);
        assert_eq!(
            config.watchlist_file,
            Some(PathBuf::from("/tmp/watchlists.json"))
        );
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("FINNHUB_API_KEY", "abc"),
            ("RELAY_WS_PORT", "not-a-port"),
            ("RELAY_OUTBOUND_CAPACITY", "0"),
            ("RELAY_RECONNECT_DELAY_MS", "-5"),
        ])
        .unwrap();

        assert_eq!(config.server.ws_port, 3002);
        assert_eq!(config.sessions.outbound_capacity, 256);
        assert_eq!(config.upstream.reconnect_delay_initial, Duration::from_secs(5));
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = FinnhubCredentials::new("key123".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(debug.contains("[REDACTED]"));
    }
}
