//! Finnhub WebSocket Client
//!
//! Maintains the single upstream connection to Finnhub's trade stream and
//! multiplexes every downstream symbol subscription onto it.
//!
//! # Stream URL
//!
//! `wss://ws.finnhub.io?token=<api key>`
//!
//! # Lifecycle
//!
//! The connection task cycles `Connecting → Connected → Disconnected`.
//! On every successful connect it replays the symbols demanded by the relay,
//! so downstream sessions never resubscribe after an upstream drop.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, FinnhubCodec};
use super::messages::{ControlFrame, FinnhubMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::state::{FeedConnectionState, FeedState};
use crate::application::ports::{SymbolDemand, UpstreamControl};
use crate::domain::market::{Symbol, Tick};
use crate::infrastructure::config::{FinnhubCredentials, UpstreamSettings};
use crate::infrastructure::metrics::{self, CommandKind, MessageSource};

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Outbound frame could not be written.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Commands and Events
// =============================================================================

/// Remote subscription change requested by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Open a remote subscription.
    Subscribe(Symbol),
    /// Close a remote subscription.
    Unsubscribe(Symbol),
}

/// Events emitted by the feed task.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Connected and demand replayed.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Waiting before the next attempt.
    Reconnecting {
        /// Attempt number since the last successful connect.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Well-formed ticks from one trade frame.
    Ticks(Vec<Tick>),
    /// Server-reported error.
    Error(String),
}

/// Non-blocking [`UpstreamControl`] adapter in front of the feed task.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    tx: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedHandle {
    /// Create a handle and the receiver the feed task consumes.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FeedCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, command: FeedCommand) {
        if let Err(e) = self.tx.send(command) {
            tracing::debug!(command = ?e.0, "Feed task gone, command discarded");
        }
    }
}

impl UpstreamControl for FeedHandle {
    fn ensure_subscribed(&self, symbol: &Symbol) {
        self.send(FeedCommand::Subscribe(symbol.clone()));
    }

    fn ensure_unsubscribed(&self, symbol: &Symbol) {
        self.send(FeedCommand::Unsubscribe(symbol.clone()));
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the Finnhub client.
#[derive(Clone)]
pub struct FinnhubClientConfig {
    /// WebSocket URL, without the token.
    pub url: String,
    /// API credentials.
    pub credentials: FinnhubCredentials,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl FinnhubClientConfig {
    /// Create a configuration with the default fixed reconnect delay.
    #[must_use]
    pub fn new(url: String, credentials: FinnhubCredentials) -> Self {
        Self {
            url,
            credentials,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Create a configuration from upstream settings.
    #[must_use]
    pub fn from_settings(settings: &UpstreamSettings, credentials: FinnhubCredentials) -> Self {
        Self {
            url: settings.url.clone(),
            credentials,
            reconnect: ReconnectConfig::from_upstream_settings(settings),
        }
    }

    /// Full endpoint including the token query parameter.
    ///
    /// A URL without a path gets the root path, so the handshake request
    /// line is always origin-form (`GET /?token=...`).
    #[must_use]
    pub fn endpoint(&self) -> String {
        let (base, query) = match self.url.split_once('?') {
            Some((base, query)) => (base, Some(query).filter(|q| !q.is_empty())),
            None => (self.url.as_str(), None),
        };
        let authority_start = base.find("://").map_or(0, |i| i + 3);
        let path = if base[authority_start..].contains('/') {
            ""
        } else {
            "/"
        };
        let token = self.credentials.api_key();

        match query {
            Some(query) => format!("{base}{path}?{query}&token={token}"),
            None => format!("{base}{path}?token={token}"),
        }
    }
}

impl std::fmt::Debug for FinnhubClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinnhubClientConfig")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

// =============================================================================
// Finnhub Client
// =============================================================================

/// Finnhub WebSocket client.
///
/// Manages the connection lifecycle including:
/// - Replay of demanded symbols on every connect
/// - Deduplicated subscribe/unsubscribe frames
/// - Automatic reconnection with fixed or exponential backoff
pub struct FinnhubClient {
    config: FinnhubClientConfig,
    codec: FinnhubCodec,
    demand: Arc<dyn SymbolDemand>,
    commands: Mutex<mpsc::UnboundedReceiver<FeedCommand>>,
    event_tx: mpsc::Sender<FeedEvent>,
    state: Arc<FeedState>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl FinnhubClient {
    /// Create a new client.
    #[must_use]
    pub fn new(
        config: FinnhubClientConfig,
        demand: Arc<dyn SymbolDemand>,
        commands: mpsc::UnboundedReceiver<FeedCommand>,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: FinnhubCodec::new(),
            demand,
            commands: Mutex::new(commands),
            event_tx,
            state: Arc::new(FeedState::new()),
            cancel,
            running: AtomicBool::new(false),
        }
    }

    /// Shared connection state.
    #[must_use]
    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    /// Start the connection task.
    ///
    /// The task holds its own handle to the client. The feed event channel
    /// closes once the task has exited and every other handle is dropped.
    ///
    /// Returns `None` if the task is already running.
    pub fn connect(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("Finnhub client already running");
            return None;
        }

        let client = Arc::clone(self);
        Some(tokio::spawn(async move {
            client.run().await;
            client.running.store(false, Ordering::Release);
        }))
    }

    /// Run the connection loop until cancelled.
    async fn run(&self) {
        let mut commands = self.commands.lock().await;
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.state.set_state(FeedConnectionState::Connecting);

            match self.connect_and_run(&mut commands, &mut policy).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Finnhub connection error");
                    self.state.set_error(e.to_string());
                    metrics::set_upstream_connected(false);
                    self.publish(FeedEvent::Disconnected).await;

                    let delay = policy.next_delay();
                    let attempt = policy.attempt_count();
                    self.state.increment_reconnect_attempts();
                    metrics::record_reconnect();

                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to Finnhub stream"
                    );
                    self.publish(FeedEvent::Reconnecting { attempt, delay }).await;

                    if !self.wait_backoff(delay, &mut commands).await {
                        break;
                    }
                }
            }
        }

        self.state.set_state(FeedConnectionState::Disconnected);
        metrics::set_upstream_connected(false);
        tracing::info!("Finnhub client stopped");
    }

    /// Sleep out the backoff delay, discarding commands meanwhile.
    ///
    /// Returns `false` if cancelled.
    async fn wait_backoff(
        &self,
        delay: Duration,
        commands: &mut mpsc::UnboundedReceiver<FeedCommand>,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        let mut open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Finnhub client cancelled during reconnect delay");
                    return false;
                }
                () = &mut sleep => return true,
                command = commands.recv(), if open => match command {
                    Some(command) => {
                        tracing::trace!(?command, "Discarding command while disconnected");
                    }
                    None => open = false,
                },
            }
        }
    }

    /// Connect to WebSocket and run until error or cancellation.
    async fn connect_and_run(
        &self,
        commands: &mut mpsc::UnboundedReceiver<FeedCommand>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), FeedError> {
        tracing::info!(url = %self.config.url, "Connecting to Finnhub stream");

        let connected = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.endpoint()) => result,
        };
        let (ws_stream, _response) = connected?;
        let (mut write, mut read) = ws_stream.split();

        policy.reset();

        // Demand is replayed from the registry below.
        while commands.try_recv().is_ok() {}

        self.state.set_state(FeedConnectionState::Connected);
        metrics::set_upstream_connected(true);

        let mut remote: HashSet<Symbol> = HashSet::new();
        for symbol in self.demand.demanded_symbols() {
            self.send_control(&mut write, &ControlFrame::subscribe(&symbol))
                .await?;
            metrics::record_upstream_command(CommandKind::Subscribe);
            remote.insert(symbol);
        }
        self.state.set_remote_subscriptions(remote.len());

        tracing::info!(symbols = remote.len(), "Finnhub stream connected");
        self.publish(FeedEvent::Connected).await;

        let mut commands_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::debug!(error = %e, "Close frame not sent");
                    }
                    return Ok(());
                }
                command = commands.recv(), if commands_open => {
                    match command {
                        Some(command) => {
                            self.apply_command(&mut write, &mut remote, command).await?;
                        }
                        None => commands_open = false,
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Server sent close frame");
                            return Err(FeedError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Ignore other message types
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(FeedError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Apply one command against the remote subscription set.
    async fn apply_command<W>(
        &self,
        write: &mut W,
        remote: &mut HashSet<Symbol>,
        command: FeedCommand,
    ) -> Result<(), FeedError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        match command {
            FeedCommand::Subscribe(symbol) => {
                if remote.contains(&symbol) {
                    return Ok(());
                }
                self.send_control(write, &ControlFrame::subscribe(&symbol))
                    .await?;
                metrics::record_upstream_command(CommandKind::Subscribe);
                remote.insert(symbol);
            }
            FeedCommand::Unsubscribe(symbol) => {
                if !remote.remove(&symbol) {
                    return Ok(());
                }
                self.send_control(write, &ControlFrame::unsubscribe(&symbol))
                    .await?;
                metrics::record_upstream_command(CommandKind::Unsubscribe);
            }
        }

        self.state.set_remote_subscriptions(remote.len());
        Ok(())
    }

    /// Handle a text frame. Malformed frames are logged and dropped.
    async fn handle_text_message(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(FinnhubMessage::Trades { ticks, malformed }) => {
                if malformed > 0 {
                    tracing::warn!(malformed, "Dropped malformed trade entries");
                    metrics::record_malformed(MessageSource::Upstream, malformed as u64);
                }
                if ticks.is_empty() {
                    return;
                }
                let count = ticks.len() as u64;
                self.state.add_ticks(count);
                metrics::record_ticks_received(count);
                self.publish(FeedEvent::Ticks(ticks)).await;
            }
            Ok(FinnhubMessage::Ping) => {
                tracing::trace!("Finnhub ping");
            }
            Ok(FinnhubMessage::Error(msg)) => {
                tracing::error!(msg = %msg, "Finnhub error");
                self.publish(FeedEvent::Error(msg)).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed upstream frame");
                metrics::record_malformed(MessageSource::Upstream, 1);
            }
        }
    }

    /// Send a subscription frame.
    async fn send_control<W>(&self, write: &mut W, frame: &ControlFrame<'_>) -> Result<(), FeedError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let json = self.codec.encode(frame)?;

        tracing::debug!(kind = frame.kind.as_str(), symbol = frame.symbol, "Sending control frame");

        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| FeedError::SendFailed(e.to_string()))
    }

    async fn publish(&self, event: FeedEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::debug!("Feed event receiver dropped");
        }
    }
}
