//! Stream Codec
//!
//! JSON decoding for Finnhub frames. Frames are inspected as raw values
//! first so that one bad entry in a trade batch costs only that entry.

use super::messages::{ControlFrame, FinnhubMessage, TradeEntry};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame has no `type` field.
    #[error("missing message type")]
    MissingType,

    /// Unknown message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the Finnhub trade stream.
#[derive(Debug, Default, Clone)]
pub struct FinnhubCodec;

impl FinnhubCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// Malformed entries inside a trade batch are counted and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, has no type, has an
    /// unknown type, or a trade frame carries no `data` array.
    pub fn decode(&self, text: &str) -> Result<FinnhubMessage, CodecError> {
        let mut value: serde_json::Value = serde_json::from_str(text)?;

        let msg_type = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(CodecError::MissingType)?;

        match msg_type {
            "trade" => {
                let Some(serde_json::Value::Array(entries)) =
                    value.get_mut("data").map(serde_json::Value::take)
                else {
                    return Err(CodecError::InvalidFormat(
                        "trade frame without data array".to_string(),
                    ));
                };
                Ok(Self::decode_trades(entries))
            }
            "ping" => Ok(FinnhubMessage::Ping),
            "error" => {
                let msg = value
                    .get("msg")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unspecified error")
                    .to_string();
                Ok(FinnhubMessage::Error(msg))
            }
            other => Err(CodecError::UnknownMessageType(other.to_string())),
        }
    }

    fn decode_trades(entries: Vec<serde_json::Value>) -> FinnhubMessage {
        let mut ticks = Vec::with_capacity(entries.len());
        let mut malformed = 0;

        for entry in entries {
            let tick = serde_json::from_value::<TradeEntry>(entry)
                .map_err(|e| e.to_string())
                .and_then(|trade| trade.into_tick().map_err(|e| e.to_string()));

            match tick {
                Ok(tick) => ticks.push(tick),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed trade entry");
                    malformed += 1;
                }
            }
        }

        FinnhubMessage::Trades { ticks, malformed }
    }

    /// Encode a subscription frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, frame: &ControlFrame<'_>) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }
}
