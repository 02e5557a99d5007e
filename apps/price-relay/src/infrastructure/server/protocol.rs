//! Downstream Control Protocol
//!
//! JSON messages exchanged with downstream clients.
//!
//! # Client → Relay
//!
//! ```json
//! {"type":"init","sessionId":"abc"}
//! {"type":"subscribe","symbol":"AAPL"}
//! {"type":"unsubscribe","symbol":"AAPL"}
//! ```
//!
//! # Relay → Client
//!
//! ```json
//! {"type":"init-complete","symbols":["AAPL"]}
//! {"type":"price-update","data":{"symbol":"AAPL","price":172.5,"volume":100.0,"timestamp":1700000000000}}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::market::{Symbol, SymbolError, Tick};
use crate::domain::session::SessionEvent;

// =============================================================================
// Client Messages
// =============================================================================

/// Raw client message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Identify the session.
    Init {
        /// Client-supplied session identifier.
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Add a symbol.
    Subscribe {
        /// Raw symbol.
        symbol: String,
    },
    /// Remove a symbol.
    Unsubscribe {
        /// Raw symbol.
        symbol: String,
    },
}

/// Validated client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Identify the session and load its saved symbols.
    Init {
        /// Client-supplied session identifier.
        session_id: String,
    },
    /// Add a symbol.
    Subscribe(Symbol),
    /// Remove a symbol.
    Unsubscribe(Symbol),
}

impl TryFrom<ClientMessage> for ClientCommand {
    type Error = ProtocolError;

    fn try_from(message: ClientMessage) -> Result<Self, Self::Error> {
        match message {
            ClientMessage::Init { session_id } => {
                let session_id = session_id.trim();
                if session_id.is_empty() {
                    return Err(ProtocolError::MissingSessionId);
                }
                Ok(Self::Init {
                    session_id: session_id.to_string(),
                })
            }
            ClientMessage::Subscribe { symbol } => Ok(Self::Subscribe(Symbol::parse(&symbol)?)),
            ClientMessage::Unsubscribe { symbol } => {
                Ok(Self::Unsubscribe(Symbol::parse(&symbol)?))
            }
        }
    }
}

/// Parse and validate a client text frame.
///
/// # Errors
///
/// Returns [`ProtocolError`] for unparseable JSON, unknown types, missing
/// fields, a blank session id, or a blank symbol.
pub fn parse_client_message(text: &str) -> Result<ClientCommand, ProtocolError> {
    let message: ClientMessage = serde_json::from_str(text)?;
    message.try_into()
}

// =============================================================================
// Server Messages
// =============================================================================

/// Message pushed to a downstream client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Initial subscriptions are active.
    InitComplete {
        /// Effective subscribed set.
        symbols: Vec<Symbol>,
    },
    /// A trade for a subscribed symbol.
    PriceUpdate {
        /// Trade payload.
        data: PriceData,
    },
}

/// Payload of a `price-update` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceData {
    /// Symbol.
    pub symbol: Symbol,
    /// Last price.
    pub price: f64,
    /// Volume.
    pub volume: f64,
    /// Trade time in epoch milliseconds.
    pub timestamp: i64,
}

impl From<Tick> for PriceData {
    fn from(tick: Tick) -> Self {
        Self {
            symbol: tick.symbol,
            price: tick.price,
            volume: tick.volume,
            timestamp: tick.timestamp,
        }
    }
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::InitComplete { symbols } => Self::InitComplete { symbols },
            SessionEvent::PriceUpdate(tick) => Self::PriceUpdate { data: tick.into() },
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Malformed client message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, unknown type, or missing field.
    #[error("invalid control message: {0}")]
    Json(#[from] serde_json::Error),

    /// `init` without a usable session id.
    #[error("init requires a sessionId")]
    MissingSessionId,

    /// Blank symbol.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),
}
