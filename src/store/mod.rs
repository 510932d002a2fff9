pub mod actions;
pub mod classifiers;
pub mod feeds;
pub mod maintenance;
pub mod selection;
pub mod social;
pub mod sqlite;
pub mod stories;

use std::sync::Arc;

use crate::app::Result;

pub use feeds::FeedFolderSnapshot;
pub use sqlite::SqliteStore;

/// Keys in the `sync_metadata` table.
pub mod keys {
    /// Compact form of the feed set the reading session was built for.
    pub const SESSION_FEED_SET: &str = "session_feed_set";
    pub const LAST_SYNC: &str = "last_sync";
    pub const LAST_CLEANUP: &str = "last_cleanup";
    pub const LAST_VACUUM: &str = "last_vacuum";
    /// Crate version the local data was written by.
    pub const SCHEMA_VERSION: &str = "schema_version";
}

/// Async handle to the store.
///
/// SQLite calls block, so every call runs on the blocking pool; the engine
/// and its workers share one handle.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<SqliteStore>,
}

impl LocalStore {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(SqliteStore::in_memory()?))
    }

    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SqliteStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    /// Direct access for synchronous callers such as the CLI and tests.
    pub fn blocking(&self) -> &SqliteStore {
        &self.inner
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn to_json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn from_json_list(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

/// `?, ?, ?` with `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
