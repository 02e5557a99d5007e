//! Downstream Connection Task
//!
//! One reader loop per WebSocket connection runs the session state machine
//! (`Unidentified → Active → Closed`); a companion writer task drains the
//! session's bounded queue into the socket. Every exit path of the reader
//! destroys the session.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::RelayServerState;
use super::protocol::{ClientCommand, ServerMessage, parse_client_message};
use crate::application::services::{RelayContext, SessionSink};
use crate::domain::session::SessionEvent;
use crate::domain::subscription::ConsumerId;
use crate::infrastructure::metrics::{self, MessageSource};

/// Time allowed for the writer to flush a close frame.
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Session phase as seen by the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unidentified,
    Active,
}

/// Generate a connection id from a random UUID.
fn next_connection_id() -> ConsumerId {
    uuid::Uuid::new_v4().as_u64_pair().0
}

/// Serve one downstream connection until it closes.
pub(super) async fn handle_socket(
    socket: WebSocket,
    state: Arc<RelayServerState>,
    shutdown: CancellationToken,
) {
    let connection = next_connection_id();
    let cancel = shutdown.child_token();
    let (tx, rx) = mpsc::channel::<SessionEvent>(state.sessions.outbound_capacity);
    let sink = SessionSink::new(
        connection,
        tx,
        state.sessions.max_consecutive_drops,
        cancel.clone(),
    );

    if !state.relay.create_session(sink) {
        tracing::error!(connection, "Connection id collision, closing");
        return;
    }
    tracing::info!(connection, "Downstream connection opened");

    let (ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(write_loop(connection, ws_sender, rx, cancel.clone()));

    let mut phase = Phase::Unidentified;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(connection, "Connection cancelled");
                break;
            }
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        phase = handle_text_message(&state, connection, phase, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(connection, "Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary frames are ignored; pings are answered by axum
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
    let released = state.relay.destroy_session(connection).unwrap_or_default();
    update_gauges(&state.relay);

    if tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, writer).await.is_err() {
        tracing::debug!(connection, "Writer did not finish in time");
    }

    tracing::info!(
        connection,
        released = released.len(),
        "Downstream connection closed"
    );
}

/// Drain the session queue into the socket.
async fn write_loop<S>(
    connection: ConsumerId,
    mut ws_sender: S,
    mut rx: mpsc::Receiver<SessionEvent>,
    cancel: CancellationToken,
) where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                let message = ServerMessage::from(event);
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(connection, error = %e, "Failed to serialize message");
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                    tracing::debug!(connection, error = %e, "WebSocket send failed");
                    cancel.cancel();
                    return;
                }
            }
        }
    }

    if let Err(e) = ws_sender.send(Message::Close(None)).await {
        tracing::trace!(connection, error = %e, "Close frame not sent");
    }
}

/// Apply one client text frame and return the next phase.
async fn handle_text_message(
    state: &RelayServerState,
    connection: ConsumerId,
    phase: Phase,
    text: &str,
) -> Phase {
    let command = match parse_client_message(text) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(connection, error = %e, "Ignoring malformed control message");
            metrics::record_malformed(MessageSource::Downstream, 1);
            return phase;
        }
    };

    match (phase, command) {
        (Phase::Unidentified, ClientCommand::Init { session_id }) => {
            let saved = match state.store.saved_symbols(&session_id).await {
                Ok(saved) => saved,
                Err(e) => {
                    tracing::warn!(
                        connection,
                        session_id = %session_id,
                        error = %e,
                        "Failed to load saved symbols, starting empty"
                    );
                    Vec::new()
                }
            };

            match state
                .relay
                .load_initial_symbols(connection, session_id, saved)
            {
                Ok(_) => {
                    update_gauges(&state.relay);
                    Phase::Active
                }
                Err(e) => {
                    tracing::warn!(connection, error = %e, "Init rejected");
                    phase
                }
            }
        }
        (Phase::Unidentified, command) => {
            tracing::debug!(connection, ?command, "Ignoring command before init");
            phase
        }
        (Phase::Active, ClientCommand::Init { .. }) => {
            tracing::debug!(connection, "Ignoring repeated init");
            phase
        }
        (Phase::Active, ClientCommand::Subscribe(symbol)) => {
            match state.relay.subscribe_session(connection, &symbol) {
                Ok(true) => tracing::debug!(connection, symbol = %symbol, "Subscribed"),
                Ok(false) => tracing::trace!(connection, symbol = %symbol, "Already subscribed"),
                Err(e) => tracing::warn!(connection, error = %e, "Subscribe rejected"),
            }
            update_gauges(&state.relay);
            phase
        }
        (Phase::Active, ClientCommand::Unsubscribe(symbol)) => {
            match state.relay.unsubscribe_session(connection, &symbol) {
                Ok(true) => tracing::debug!(connection, symbol = %symbol, "Unsubscribed"),
                Ok(false) => tracing::trace!(connection, symbol = %symbol, "Not subscribed"),
                Err(e) => tracing::warn!(connection, error = %e, "Unsubscribe rejected"),
            }
            update_gauges(&state.relay);
            phase
        }
    }
}

fn update_gauges(relay: &RelayContext) {
    let stats = relay.stats();
    metrics::set_active_sessions(stats.active_sessions);
    metrics::set_active_symbols(stats.symbols);
}
