//! Market Data Types
//!
//! Canonical internal representation of the values flowing through the
//! relay: normalized ticker symbols and trade ticks.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol
// =============================================================================

/// A ticker symbol, trimmed and uppercased.
///
/// Acts as the join key between the subscription registry, the upstream
/// feed, and downstream sessions.
///
/// # Example
///
/// ```rust
/// use price_relay::domain::market::Symbol;
///
/// let symbol = Symbol::parse(" aapl ").unwrap();
/// assert_eq!(symbol.as_str(), "AAPL");
/// assert!(Symbol::parse("   ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a raw symbol string.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError::Empty`] if the input is blank after trimming.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    /// Borrow the normalized symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Symbol parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// The symbol was empty or whitespace.
    #[error("symbol cannot be empty")]
    Empty,
}

// =============================================================================
// Tick
// =============================================================================

/// One trade observation for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Traded symbol.
    pub symbol: Symbol,
    /// Last traded price.
    pub price: f64,
    /// Traded volume.
    pub volume: f64,
    /// Trade time in epoch milliseconds.
    pub timestamp: i64,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub const fn new(symbol: Symbol, price: f64, volume: f64, timestamp: i64) -> Self {
        Self {
            symbol,
            price,
            volume,
            timestamp,
        }
    }
}
