//! Relay Context
//!
//! Process-wide owner of the relay's subscription state. Both registries
//! live behind a single lock so that every session operation and its
//! effect on the per-symbol consumer sets happen in one critical section.
//! Remote subscription changes are forwarded to the upstream port from
//! inside that same section, which keeps upstream commands in the order of
//! the transitions that caused them.

use std::sync::Arc;

use parking_lot::RwLock;

use super::sink::{Delivery, SessionSink};
use crate::application::ports::{SymbolDemand, UpstreamControl};
use crate::domain::market::{Symbol, Tick};
use crate::domain::session::{SessionError, SessionEvent, SessionRegistry};
use crate::domain::subscription::{ConsumerId, SymbolSubscriptionRegistry};

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by relay session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Session-level protocol violation.
    #[error(transparent)]
    Session(#[from] SessionError),
}

// =============================================================================
// Reports
// =============================================================================

/// Result of fanning one tick out to its consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Consumers the tick was queued for.
    pub delivered: usize,
    /// Consumers whose queue was full.
    pub dropped: usize,
    /// Consumers disconnected for overflowing.
    pub disconnected: usize,
}

/// Snapshot of relay state sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Open connections, identified or not.
    pub connections: usize,
    /// Connections that completed init.
    pub active_sessions: usize,
    /// Symbols with at least one consumer.
    pub symbols: usize,
    /// Total `(symbol, session)` pairs.
    pub subscriptions: usize,
}

// =============================================================================
// Relay Context
// =============================================================================

#[derive(Debug, Default)]
struct RelayState {
    symbols: SymbolSubscriptionRegistry<SessionSink>,
    sessions: SessionRegistry<SessionSink>,
}

/// Shared relay state plus the upstream control port.
pub struct RelayContext {
    state: RwLock<RelayState>,
    upstream: Arc<dyn UpstreamControl>,
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl RelayContext {
    /// Create an empty relay that forwards transitions to `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn UpstreamControl>) -> Self {
        Self {
            state: RwLock::new(RelayState::default()),
            upstream,
        }
    }

    /// Register an anonymous session for the sink's connection.
    ///
    /// Returns `false` if the connection already has a session.
    pub fn create_session(&self, sink: SessionSink) -> bool {
        let connection = sink.connection();
        let created = self.state.write().sessions.create(connection, sink);
        if created {
            tracing::debug!(connection, "Session created");
        }
        created
    }

    /// Identify a session and subscribe it to its saved symbols.
    ///
    /// Saved entries are normalized and de-duplicated in order; blank
    /// entries are skipped. An `InitComplete` event carrying the effective
    /// set is queued before any price update can reach the session.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if the connection is unknown or already
    /// initialized.
    pub fn load_initial_symbols(
        &self,
        connection: ConsumerId,
        session_id: String,
        saved: Vec<String>,
    ) -> Result<Vec<Symbol>, RelayError> {
        let mut symbols: Vec<Symbol> = Vec::with_capacity(saved.len());
        for raw in saved {
            match Symbol::parse(&raw) {
                Ok(symbol) if !symbols.contains(&symbol) => symbols.push(symbol),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(connection, raw = %raw, error = %e, "Skipping saved symbol");
                }
            }
        }

        let mut guard = self.state.write();
        let state = &mut *guard;

        state.sessions.identify(connection, session_id.clone())?;
        for symbol in &symbols {
            self.track(state, connection, symbol)?;
        }

        if let Some(session) = state.sessions.get(connection) {
            session.handle().deliver(SessionEvent::InitComplete {
                symbols: symbols.clone(),
            });
        }

        tracing::info!(
            connection,
            session_id = %session_id,
            symbols = symbols.len(),
            "Session initialized"
        );

        Ok(symbols)
    }

    /// Add `symbol` to a session's subscriptions.
    ///
    /// Returns `Ok(false)` if the session already held it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if the session is unknown or not initialized.
    pub fn subscribe_session(
        &self,
        connection: ConsumerId,
        symbol: &Symbol,
    ) -> Result<bool, RelayError> {
        let mut guard = self.state.write();
        self.track(&mut guard, connection, symbol)
    }

    /// Remove `symbol` from a session's subscriptions.
    ///
    /// Returns `Ok(false)` if the session did not hold it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if the session is unknown or not initialized.
    pub fn unsubscribe_session(
        &self,
        connection: ConsumerId,
        symbol: &Symbol,
    ) -> Result<bool, RelayError> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if !state.sessions.untrack(connection, symbol)? {
            return Ok(false);
        }
        if state.symbols.unsubscribe(symbol, connection).is_closed() {
            self.upstream.ensure_unsubscribed(symbol);
        }
        Ok(true)
    }

    /// Tear down a session, releasing every symbol it held.
    ///
    /// Returns the released symbols, or `None` for an unknown connection.
    pub fn destroy_session(&self, connection: ConsumerId) -> Option<Vec<Symbol>> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let session = state.sessions.remove(connection)?;
        let symbols = session.into_symbols();
        for symbol in &symbols {
            if state.symbols.unsubscribe(symbol, connection).is_closed() {
                self.upstream.ensure_unsubscribed(symbol);
            }
        }

        tracing::debug!(connection, released = symbols.len(), "Session destroyed");
        Some(symbols)
    }

    /// Fan a tick out to every consumer of its symbol.
    ///
    /// Never blocks: each consumer gets a non-blocking enqueue, and a full
    /// queue affects only that consumer.
    pub fn dispatch(&self, tick: &Tick) -> DispatchReport {
        let state = self.state.read();
        let mut report = DispatchReport::default();

        for (_, sink) in state.symbols.consumers(&tick.symbol) {
            match sink.deliver(SessionEvent::PriceUpdate(tick.clone())) {
                Delivery::Queued => report.delivered += 1,
                Delivery::Dropped => report.dropped += 1,
                Delivery::Overflowed => {
                    report.dropped += 1;
                    report.disconnected += 1;
                }
                Delivery::Closed => {}
            }
        }

        report
    }

    /// Symbols tracked by a session, in subscription order.
    #[must_use]
    pub fn session_symbols(&self, connection: ConsumerId) -> Option<Vec<Symbol>> {
        self.state
            .read()
            .sessions
            .get(connection)
            .map(|session| session.symbols().to_vec())
    }

    /// Current state sizes.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        let state = self.state.read();
        let subscriptions = state.symbols.stats();
        RelayStats {
            connections: state.sessions.len(),
            active_sessions: state.sessions.active_count(),
            symbols: subscriptions.symbol_count,
            subscriptions: subscriptions.subscription_count,
        }
    }

    fn track(
        &self,
        state: &mut RelayState,
        connection: ConsumerId,
        symbol: &Symbol,
    ) -> Result<bool, RelayError> {
        let Some(sink) = state.sessions.track(connection, symbol)? else {
            return Ok(false);
        };
        if state.symbols.subscribe(symbol, connection, sink).is_opened() {
            self.upstream.ensure_subscribed(symbol);
        }
        Ok(true)
    }
}

impl SymbolDemand for RelayContext {
    fn demanded_symbols(&self) -> Vec<Symbol> {
        self.state.read().symbols.symbols()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockUpstreamControl;
    use proptest::prelude::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Command {
        Subscribe(String),
        Unsubscribe(String),
    }

    #[derive(Default)]
    struct RecordingUpstream {
        commands: parking_lot::Mutex<Vec<Command>>,
    }

    impl RecordingUpstream {
        fn commands(&self) -> Vec<Command> {
            self.commands.lock().clone()
        }
    }

    impl UpstreamControl for RecordingUpstream {
        fn ensure_subscribed(&self, symbol: &Symbol) {
            self.commands
                .lock()
                .push(Command::Subscribe(symbol.to_string()));
        }

        fn ensure_unsubscribed(&self, symbol: &Symbol) {
            self.commands
                .lock()
                .push(Command::Unsubscribe(symbol.to_string()));
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn sink(connection: ConsumerId, capacity: usize) -> (SessionSink, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            SessionSink::new(connection, tx, 0, CancellationToken::new()),
            rx,
        )
    }

    fn relay() -> (RelayContext, Arc<RecordingUpstream>) {
        let upstream = Arc::new(RecordingUpstream::default());
        (RelayContext::new(upstream.clone()), upstream)
    }

    fn init(relay: &RelayContext, connection: ConsumerId, saved: &[&str]) -> mpsc::Receiver<SessionEvent> {
        let (sink, rx) = sink(connection, 16);
        assert!(relay.create_session(sink));
        relay
            .load_initial_symbols(
                connection,
                format!("s{connection}"),
                saved.iter().map(ToString::to_string).collect(),
            )
            .unwrap();
        rx
    }

    fn tick(symbol: &str, price: f64) -> Tick {
        Tick::new(sym(symbol), price, 10.0, 1_700_000_000_000)
    }

    #[test]
    fn init_subscribes_saved_symbols_and_reports_them() {
        let (relay, upstream) = relay();
        let (sink, mut rx) = sink(1, 16);
        relay.create_session(sink);

        let symbols = relay
            .load_initial_symbols(
                1,
                "s1".to_string(),
                vec!["aapl".into(), " ".into(), "MSFT".into(), "AAPL".into()],
            )
            .unwrap();

        assert_eq!(symbols, vec![sym("AAPL"), sym("MSFT")]);
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::InitComplete {
                symbols: vec![sym("AAPL"), sym("MSFT")]
            }
        );
        assert_eq!(
            upstream.commands(),
            vec![
                Command::Subscribe("AAPL".into()),
                Command::Subscribe("MSFT".into())
            ]
        );
    }

    #[test]
    fn second_init_is_rejected() {
        let (relay, upstream) = relay();
        let _rx = init(&relay, 1, &["AAPL"]);

        let err = relay
            .load_initial_symbols(1, "other".to_string(), vec!["TSLA".into()])
            .unwrap_err();

        assert!(matches!(
            err,
            RelayError::Session(SessionError::AlreadyInitialized { .. })
        ));
        assert_eq!(relay.session_symbols(1), Some(vec![sym("AAPL")]));
        assert_eq!(upstream.commands().len(), 1);
    }

    #[test]
    fn subscribe_before_init_never_reaches_upstream() {
        let mut upstream = MockUpstreamControl::new();
        upstream.expect_ensure_subscribed().times(0);
        let relay = RelayContext::new(Arc::new(upstream));
        let (sink, _rx) = sink(1, 4);
        relay.create_session(sink);

        let err = relay.subscribe_session(1, &sym("AAPL")).unwrap_err();

        assert_eq!(err, RelayError::Session(SessionError::NotInitialized(1)));
        assert_eq!(relay.stats().symbols, 0);
    }

    #[test]
    fn shared_symbol_opens_and_closes_once() {
        let mut upstream = MockUpstreamControl::new();
        upstream
            .expect_ensure_subscribed()
            .withf(|s| s.as_str() == "AAPL")
            .times(1)
            .return_const(());
        upstream
            .expect_ensure_unsubscribed()
            .withf(|s| s.as_str() == "AAPL")
            .times(1)
            .return_const(());
        let relay = RelayContext::new(Arc::new(upstream));

        let _a = init(&relay, 1, &[]);
        let _b = init(&relay, 2, &[]);

        assert!(relay.subscribe_session(1, &sym("AAPL")).unwrap());
        assert!(relay.subscribe_session(2, &sym("AAPL")).unwrap());
        assert!(relay.unsubscribe_session(1, &sym("AAPL")).unwrap());
        assert!(relay.unsubscribe_session(2, &sym("AAPL")).unwrap());
    }

    #[test]
    fn repeated_and_unknown_operations_are_noops() {
        let (relay, upstream) = relay();
        let _rx = init(&relay, 1, &["AAPL"]);

        assert!(!relay.subscribe_session(1, &sym("AAPL")).unwrap());
        assert!(!relay.unsubscribe_session(1, &sym("GOOG")).unwrap());

        assert_eq!(upstream.commands(), vec![Command::Subscribe("AAPL".into())]);
    }

    #[test]
    fn destroy_releases_every_symbol() {
        let (relay, upstream) = relay();
        let _rx = init(&relay, 1, &["AAPL", "MSFT"]);

        let released = relay.destroy_session(1).unwrap();

        assert_eq!(released, vec![sym("AAPL"), sym("MSFT")]);
        assert_eq!(
            upstream.commands(),
            vec![
                Command::Subscribe("AAPL".into()),
                Command::Subscribe("MSFT".into()),
                Command::Unsubscribe("AAPL".into()),
                Command::Unsubscribe("MSFT".into()),
            ]
        );
        assert!(relay.demanded_symbols().is_empty());
        assert_eq!(relay.stats(), RelayStats::default());
        assert!(relay.destroy_session(1).is_none());
    }

    #[test]
    fn destroy_keeps_symbols_other_sessions_hold() {
        let (relay, upstream) = relay();
        let _a = init(&relay, 1, &["AAPL", "MSFT"]);
        let _b = init(&relay, 2, &["MSFT"]);

        relay.destroy_session(1);

        assert_eq!(relay.demanded_symbols(), vec![sym("MSFT")]);
        assert_eq!(
            upstream.commands().last(),
            Some(&Command::Unsubscribe("AAPL".into()))
        );
    }

    #[test]
    fn dispatch_reaches_only_current_subscribers() {
        let (relay, _upstream) = relay();
        let mut a = init(&relay, 1, &["AAPL"]);
        let mut b = init(&relay, 2, &["AAPL", "MSFT"]);
        let mut c = init(&relay, 3, &["MSFT"]);
        a.try_recv().unwrap();
        b.try_recv().unwrap();
        c.try_recv().unwrap();

        relay.unsubscribe_session(2, &sym("AAPL")).unwrap();
        let report = relay.dispatch(&tick("AAPL", 172.50));

        assert_eq!(report.delivered, 1);
        assert_eq!(a.try_recv().unwrap(), SessionEvent::PriceUpdate(tick("AAPL", 172.50)));
        assert!(b.try_recv().is_err());
        assert!(c.try_recv().is_err());
    }

    #[test]
    fn dispatch_for_untracked_symbol_is_silent() {
        let (relay, _upstream) = relay();
        let _rx = init(&relay, 1, &["AAPL"]);

        assert_eq!(relay.dispatch(&tick("ZZZZ", 1.0)), DispatchReport::default());
    }

    #[test]
    fn dispatch_skips_destroyed_session() {
        let (relay, _upstream) = relay();
        let mut rx = init(&relay, 1, &["AAPL"]);
        rx.try_recv().unwrap();

        relay.destroy_session(1);

        assert_eq!(relay.dispatch(&tick("AAPL", 1.0)).delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn slow_consumer_does_not_affect_others() {
        let (relay, _upstream) = relay();
        let token = CancellationToken::new();
        let (tx, _slow_rx) = mpsc::channel(1);
        relay.create_session(SessionSink::new(1, tx, 2, token.clone()));
        relay
            .load_initial_symbols(1, "slow".into(), vec!["AAPL".into()])
            .unwrap();
        let mut fast = init(&relay, 2, &["AAPL"]);
        fast.try_recv().unwrap();

        let first = relay.dispatch(&tick("AAPL", 1.0));
        let second = relay.dispatch(&tick("AAPL", 2.0));

        assert_eq!(first.delivered, 1);
        assert_eq!(first.dropped, 1);
        assert_eq!(second.disconnected, 1);
        assert!(token.is_cancelled());
        assert_eq!(fast.try_recv().unwrap(), SessionEvent::PriceUpdate(tick("AAPL", 1.0)));
        assert_eq!(fast.try_recv().unwrap(), SessionEvent::PriceUpdate(tick("AAPL", 2.0)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(ConsumerId),
        Unsubscribe(ConsumerId),
        Destroy(ConsumerId),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        (0u8..3, 1u64..=4).prop_map(|(kind, id)| match kind {
            0 => Op::Subscribe(id),
            1 => Op::Unsubscribe(id),
            _ => Op::Destroy(id),
        })
    }

    proptest! {
        #[test]
        fn upstream_commands_follow_demand_transitions(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let (relay, upstream) = relay();
            let symbol = sym("AAPL");
            let mut receivers = Vec::new();
            let mut holders = std::collections::HashSet::new();
            let mut expected = Vec::new();

            for id in 1..=4 {
                receivers.push(init(&relay, id, &[]));
            }

            for op in ops {
                let was_demanded = !holders.is_empty();
                match op {
                    Op::Subscribe(id) => {
                        if relay.session_symbols(id).is_none() {
                            receivers.push(init(&relay, id, &[]));
                        }
                        relay.subscribe_session(id, &symbol).unwrap();
                        holders.insert(id);
                    }
                    Op::Unsubscribe(id) => {
                        if relay.session_symbols(id).is_some() {
                            relay.unsubscribe_session(id, &symbol).unwrap();
                        }
                        holders.remove(&id);
                    }
                    Op::Destroy(id) => {
                        relay.destroy_session(id);
                        holders.remove(&id);
                    }
                }
                match (was_demanded, !holders.is_empty()) {
                    (false, true) => expected.push(Command::Subscribe("AAPL".into())),
                    (true, false) => expected.push(Command::Unsubscribe("AAPL".into())),
                    _ => {}
                }
            }

            prop_assert_eq!(upstream.commands(), expected);
            prop_assert_eq!(relay.demanded_symbols().is_empty(), holders.is_empty());
        }
    }
}
