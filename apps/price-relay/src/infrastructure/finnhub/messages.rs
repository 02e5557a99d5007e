//! Finnhub WebSocket Message Types
//!
//! Wire shapes for the Finnhub trade stream.
//!
//! # Inbound
//!
//! ```json
//! {"type":"trade","data":[{"s":"AAPL","p":172.5,"v":100,"t":1700000000000,"c":["1"]}]}
//! {"type":"ping"}
//! {"type":"error","msg":"Invalid symbol"}
//! ```
//!
//! # Outbound
//!
//! ```json
//! {"type":"subscribe","symbol":"AAPL"}
//! {"type":"unsubscribe","symbol":"AAPL"}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::market::{Symbol, SymbolError, Tick};

// =============================================================================
// Inbound Messages
// =============================================================================

/// A single entry in a trade batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeEntry {
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Last price.
    #[serde(rename = "p")]
    pub price: f64,
    /// Volume. Some venues omit it.
    #[serde(rename = "v", default)]
    pub volume: f64,
    /// Trade time in epoch milliseconds.
    #[serde(rename = "t")]
    pub timestamp: i64,
    /// Trade conditions.
    #[serde(rename = "c", default)]
    pub conditions: Option<Vec<String>>,
}

impl TradeEntry {
    /// Convert into the internal tick representation.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError`] if the symbol is blank.
    pub fn into_tick(self) -> Result<Tick, SymbolError> {
        let symbol = Symbol::parse(&self.symbol)?;
        Ok(Tick::new(symbol, self.price, self.volume, self.timestamp))
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FinnhubMessage {
    /// Trade batch.
    Trades {
        /// Ticks decoded from well-formed entries.
        ticks: Vec<Tick>,
        /// Entries that were dropped as malformed.
        malformed: usize,
    },
    /// Keep-alive from the server.
    Ping,
    /// Server-reported error.
    Error(String),
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// Subscription command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// Start receiving trades for a symbol.
    Subscribe,
    /// Stop receiving trades for a symbol.
    Unsubscribe,
}

impl ControlKind {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Outbound subscription frame.
#[derive(Debug, Clone, Serialize)]
pub struct ControlFrame<'a> {
    /// Command kind.
    #[serde(rename = "type")]
    pub kind: ControlKind,
    /// Target symbol.
    pub symbol: &'a str,
}

impl<'a> ControlFrame<'a> {
    /// Build a subscribe frame.
    #[must_use]
    pub fn subscribe(symbol: &'a Symbol) -> Self {
        Self {
            kind: ControlKind::Subscribe,
            symbol: symbol.as_str(),
        }
    }

    /// Build an unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(symbol: &'a Symbol) -> Self {
        Self {
            kind: ControlKind::Unsubscribe,
            symbol: symbol.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_entry_full() {
        let json = r#"{"s":"aapl","p":172.5,"v":100,"t":1700000000000,"c":["1","12"]}"#;
        let entry: TradeEntry = serde_json::from_str(json).unwrap();

        assert_eq!(entry.conditions.as_deref(), Some(&["1".to_string(), "12".to_string()][..]));

        let tick = entry.into_tick().unwrap();
        assert_eq!(tick.symbol.as_str(), "AAPL");
        assert!((tick.price - 172.5).abs() < f64::EPSILON);
        assert!((tick.volume - 100.0).abs() < f64::EPSILON);
        assert_eq!(tick.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn trade_entry_without_volume() {
        let entry: TradeEntry =
            serde_json::from_str(r#"{"s":"BINANCE:BTCUSDT","p":43000.1,"t":1}"#).unwrap();
        assert!(entry.volume.abs() < f64::EPSILON);
        assert!(entry.conditions.is_none());
    }

    #[test]
    fn control_frame_wire_format() {
        let symbol = Symbol::parse("msft").unwrap();

        assert_eq!(
            serde_json::to_string(&ControlFrame::subscribe(&symbol)).unwrap(),
            r#"{"type":"subscribe","symbol":"MSFT"}"#
        );
        assert_eq!(
            serde_json::to_string(&ControlFrame::unsubscribe(&symbol)).unwrap(),
            r#"{"type":"unsubscribe","symbol":"MSFT"}"#
        );
    }
}
