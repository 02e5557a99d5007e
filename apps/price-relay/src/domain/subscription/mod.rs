//! Symbol Subscription Registry
//!
//! Tracks, per symbol, which consumers are interested in its ticks.
//!
//! # Design
//!
//! The registry stores an explicit `symbol → consumer → handle` table:
//! - A symbol entry exists if and only if at least one consumer holds it
//! - Adding the first consumer reports [`SubscriptionChange::Opened`]
//! - Removing the last consumer reports [`SubscriptionChange::Closed`]
//!
//! The caller turns those transitions into upstream subscribe/unsubscribe
//! commands, so many consumers share one remote subscription per symbol.
//! The registry itself is not synchronized; it lives behind the relay lock.

use std::collections::HashMap;

use crate::domain::market::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a consumer (one downstream connection).
pub type ConsumerId = u64;

/// Effect of a registry mutation on the symbol's remote subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// The symbol went from zero to one consumer.
    Opened,
    /// The consumer set changed (or not) without crossing zero.
    Unchanged,
    /// The symbol went from one to zero consumers and was removed.
    Closed,
}

impl SubscriptionChange {
    /// Whether the remote subscription must be opened.
    #[must_use]
    pub const fn is_opened(self) -> bool {
        matches!(self, Self::Opened)
    }

    /// Whether the remote subscription must be closed.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Consumers interested in one symbol.
type SubscriptionSet<H> = HashMap<ConsumerId, H>;

// =============================================================================
// Registry
// =============================================================================

/// Maps each symbol to the consumer handles subscribed to it.
///
/// # Example
///
/// ```rust
/// use price_relay::domain::market::Symbol;
/// use price_relay::domain::subscription::{SubscriptionChange, SymbolSubscriptionRegistry};
///
/// let mut registry = SymbolSubscriptionRegistry::new();
/// let aapl = Symbol::parse("AAPL").unwrap();
///
/// // First consumer opens the symbol
/// assert_eq!(registry.subscribe(&aapl, 1, "sink-1"), SubscriptionChange::Opened);
///
/// // Second consumer shares it
/// assert_eq!(registry.subscribe(&aapl, 2, "sink-2"), SubscriptionChange::Unchanged);
///
/// // Still held by consumer 2
/// assert_eq!(registry.unsubscribe(&aapl, 1), SubscriptionChange::Unchanged);
///
/// // Last consumer closes it
/// assert_eq!(registry.unsubscribe(&aapl, 2), SubscriptionChange::Closed);
/// assert!(registry.is_empty());
/// ```
#[derive(Debug)]
pub struct SymbolSubscriptionRegistry<H> {
    subscriptions: HashMap<Symbol, SubscriptionSet<H>>,
}

impl<H> Default for SymbolSubscriptionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> SymbolSubscriptionRegistry<H> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
        }
    }

    /// Add `consumer` to the symbol's subscription set.
    ///
    /// Re-subscribing an existing `(symbol, consumer)` pair keeps the
    /// original handle and reports no change.
    pub fn subscribe(
        &mut self,
        symbol: &Symbol,
        consumer: ConsumerId,
        handle: H,
    ) -> SubscriptionChange {
        if let Some(set) = self.subscriptions.get_mut(symbol) {
            set.entry(consumer).or_insert(handle);
            return SubscriptionChange::Unchanged;
        }

        let mut set = SubscriptionSet::new();
        set.insert(consumer, handle);
        self.subscriptions.insert(symbol.clone(), set);
        SubscriptionChange::Opened
    }

    /// Remove `consumer` from the symbol's subscription set.
    ///
    /// Removing a consumer that is not subscribed is a no-op.
    pub fn unsubscribe(&mut self, symbol: &Symbol, consumer: ConsumerId) -> SubscriptionChange {
        let Some(set) = self.subscriptions.get_mut(symbol) else {
            return SubscriptionChange::Unchanged;
        };

        if set.remove(&consumer).is_none() {
            return SubscriptionChange::Unchanged;
        }

        if set.is_empty() {
            self.subscriptions.remove(symbol);
            return SubscriptionChange::Closed;
        }

        SubscriptionChange::Unchanged
    }

    /// Iterate the consumers currently subscribed to `symbol`.
    ///
    /// Yields nothing for an untracked symbol.
    pub fn consumers<'a>(
        &'a self,
        symbol: &Symbol,
    ) -> impl Iterator<Item = (ConsumerId, &'a H)> + use<'a, H> {
        self.subscriptions
            .get(symbol)
            .into_iter()
            .flat_map(|set| set.iter().map(|(id, handle)| (*id, handle)))
    }

    /// Whether `consumer` is subscribed to `symbol`.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol, consumer: ConsumerId) -> bool {
        self.subscriptions
            .get(symbol)
            .is_some_and(|set| set.contains_key(&consumer))
    }

    /// Get all symbols with at least one consumer.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.subscriptions.keys().cloned().collect()
    }

    /// Number of consumers subscribed to `symbol`.
    #[must_use]
    pub fn consumer_count(&self, symbol: &Symbol) -> usize {
        self.subscriptions.get(symbol).map_or(0, HashMap::len)
    }

    /// Number of tracked symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no symbol is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            symbol_count: self.subscriptions.len(),
            subscription_count: self.subscriptions.values().map(HashMap::len).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of unique symbols with consumers.
    pub symbol_count: usize,
    /// Number of `(symbol, consumer)` pairs.
    pub subscription_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
