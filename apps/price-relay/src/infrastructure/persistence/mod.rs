//! Watchlist Store Adapters
//!
//! Read-only implementations of the [`WatchlistStore`] port. The write side
//! of saved symbols belongs to a separate CRUD service; these adapters only
//! read what it saved.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::application::ports::{StoreError, WatchlistStore};

// =============================================================================
// In-Memory Store
// =============================================================================

/// Fixed watchlists held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryWatchlistStore {
    watchlists: HashMap<String, Vec<String>>,
}

impl InMemoryWatchlistStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session's saved symbols.
    #[must_use]
    pub fn with_watchlist<I, S>(mut self, session_id: impl Into<String>, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watchlists.insert(
            session_id.into(),
            symbols.into_iter().map(Into::into).collect(),
        );
        self
    }
}

#[async_trait]
impl WatchlistStore for InMemoryWatchlistStore {
    async fn saved_symbols(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.watchlists.get(session_id).cloned().unwrap_or_default())
    }
}

// =============================================================================
// JSON File Store
// =============================================================================

/// Watchlists read from a JSON file of the form
/// `{"<session id>": ["AAPL", "MSFT"]}`.
///
/// The file is re-read on every lookup so external edits are picked up.
#[derive(Debug, Clone)]
pub struct JsonFileWatchlistStore {
    path: PathBuf,
}

impl JsonFileWatchlistStore {
    /// Create a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WatchlistStore for JsonFileWatchlistStore {
    async fn saved_symbols(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Watchlist file not found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut watchlists: HashMap<String, Vec<String>> = serde_json::from_str(&contents)?;
        Ok(watchlists.remove(session_id).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn in_memory_returns_seeded_list() {
        let store = InMemoryWatchlistStore::new().with_watchlist("s1", ["AAPL", "MSFT"]);

        assert_eq!(
            store.saved_symbols("s1").await.unwrap(),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );
        assert!(store.saved_symbols("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn json_file_reads_session_entry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"s1":["aapl","TSLA"],"s2":[]}}"#).unwrap();
        let store = JsonFileWatchlistStore::new(file.path());

        let symbols = assert_ok!(store.saved_symbols("s1").await);
        assert_eq!(symbols, vec!["aapl".to_string(), "TSLA".to_string()]);
        assert!(assert_ok!(store.saved_symbols("s3").await).is_empty());
    }

    #[tokio::test]
    async fn json_file_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileWatchlistStore::new(dir.path().join("absent.json"));

        assert!(assert_ok!(store.saved_symbols("s1").await).is_empty());
    }

    #[tokio::test]
    async fn json_file_malformed_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[not an object").unwrap();
        let store = JsonFileWatchlistStore::new(file.path());

        let err = assert_err!(store.saved_symbols("s1").await);
        assert!(matches!(err, StoreError::Malformed(_)));
    }
}
