//! Session Registry
//!
//! Per-connection view of downstream subscriptions. Each connection gets a
//! session record as soon as it is accepted; the record stays anonymous
//! until the client identifies itself with an init message, and only then
//! may it track symbols.
//!
//! The registry owns the tracked symbol set of every session so that
//! teardown can release exactly what the session holds.

use std::collections::HashMap;

use crate::domain::market::{Symbol, Tick};
use crate::domain::subscription::ConsumerId;

// =============================================================================
// Session Events
// =============================================================================

/// Events delivered to a session through its consumer handle.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Initial subscriptions were loaded.
    InitComplete {
        /// Effective subscribed set, in saved order.
        symbols: Vec<Symbol>,
    },
    /// A tick for one of the session's symbols.
    PriceUpdate(Tick),
}

// =============================================================================
// Session
// =============================================================================

/// One downstream session bound to a single connection.
#[derive(Debug)]
pub struct Session<H> {
    connection: ConsumerId,
    session_id: Option<String>,
    handle: H,
    symbols: Vec<Symbol>,
}

impl<H> Session<H> {
    fn new(connection: ConsumerId, handle: H) -> Self {
        Self {
            connection,
            session_id: None,
            handle,
            symbols: Vec::new(),
        }
    }

    /// Connection this session is bound to.
    #[must_use]
    pub const fn connection(&self) -> ConsumerId {
        self.connection
    }

    /// Client-supplied identifier, once init has arrived.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Consumer handle for this session's connection.
    #[must_use]
    pub const fn handle(&self) -> &H {
        &self.handle
    }

    /// Tracked symbols in subscription order.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Whether the session has been identified.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.session_id.is_some()
    }

    /// Consume the session, returning its tracked symbols.
    #[must_use]
    pub fn into_symbols(self) -> Vec<Symbol> {
        self.symbols
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Maps each connection to its session record.
#[derive(Debug)]
pub struct SessionRegistry<H> {
    sessions: HashMap<ConsumerId, Session<H>>,
}

impl<H> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> SessionRegistry<H> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Register an anonymous session for `connection`.
    ///
    /// Returns `false` if the connection is already registered.
    pub fn create(&mut self, connection: ConsumerId, handle: H) -> bool {
        if self.sessions.contains_key(&connection) {
            return false;
        }
        self.sessions
            .insert(connection, Session::new(connection, handle));
        true
    }

    /// Attach the client-supplied identifier to a session.
    ///
    /// # Errors
    ///
    /// Fails if the connection is unknown or was already identified.
    pub fn identify(&mut self, connection: ConsumerId, session_id: String) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&connection)
            .ok_or(SessionError::UnknownConnection(connection))?;

        if let Some(existing) = &session.session_id {
            return Err(SessionError::AlreadyInitialized {
                connection,
                session_id: existing.clone(),
            });
        }

        session.session_id = Some(session_id);
        Ok(())
    }

    /// Stop tracking `symbol` for a session.
    ///
    /// Returns `Ok(false)` if the symbol was not tracked.
    ///
    /// # Errors
    ///
    /// Fails if the connection is unknown or not yet identified.
    pub fn untrack(&mut self, connection: ConsumerId, symbol: &Symbol) -> Result<bool, SessionError> {
        let session = self.active_mut(connection)?;

        let Some(pos) = session.symbols.iter().position(|s| s == symbol) else {
            return Ok(false);
        };
        session.symbols.remove(pos);
        Ok(true)
    }

    /// Remove a session, returning its final state.
    pub fn remove(&mut self, connection: ConsumerId) -> Option<Session<H>> {
        self.sessions.remove(&connection)
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, connection: ConsumerId) -> Option<&Session<H>> {
        self.sessions.get(&connection)
    }

    /// Number of registered sessions, including anonymous ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of identified sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    fn active_mut(&mut self, connection: ConsumerId) -> Result<&mut Session<H>, SessionError> {
        let session = self
            .sessions
            .get_mut(&connection)
            .ok_or(SessionError::UnknownConnection(connection))?;

        if !session.is_active() {
            return Err(SessionError::NotInitialized(connection));
        }
        Ok(session)
    }
}

impl<H: Clone> SessionRegistry<H> {
    /// Start tracking `symbol` for a session.
    ///
    /// Returns the session's handle when the symbol was newly tracked, or
    /// `None` if the session already tracks it.
    ///
    /// # Errors
    ///
    /// Fails if the connection is unknown or not yet identified.
    pub fn track(&mut self, connection: ConsumerId, symbol: &Symbol) -> Result<Option<H>, SessionError> {
        let session = self.active_mut(connection)?;

        if session.symbols.contains(symbol) {
            return Ok(None);
        }
        session.symbols.push(symbol.clone());
        Ok(Some(session.handle.clone()))
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Session registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session is registered for the connection.
    #[error("no session for connection {0}")]
    UnknownConnection(ConsumerId),

    /// The session has not sent init yet.
    #[error("session on connection {0} is not initialized")]
    NotInitialized(ConsumerId),

    /// The session already sent init.
    #[error("connection {connection} already initialized as session {session_id}")]
    AlreadyInitialized {
        /// Connection that sent a second init.
        connection: ConsumerId,
        /// Identifier from the first init.
        session_id: String,
    },
}

// =============================================================================
// Tests
// =============================================================================
