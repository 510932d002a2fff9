use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, SyncError};

/// Tables holding synced data; `sync_metadata` survives a wipe.
const DATA_TABLES: &[&str] = &[
    "feeds",
    "social_feeds",
    "folders",
    "stories",
    "story_texts",
    "social_story_map",
    "comments",
    "replies",
    "users",
    "classifiers",
    "starred_counts",
    "saved_searches",
    "actions",
    "reading_session",
    "notify_dismissals",
    "feed_tags",
    "feed_authors",
];

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations.to_latest(&mut conn)?;

        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            SyncError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    // Key/value sync metadata

    pub fn sync_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_sync_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn clear_sync_value(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sync_metadata WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn sync_timestamp(&self, key: &str) -> Result<i64> {
        Ok(self
            .sync_value(key)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub fn set_sync_timestamp(&self, key: &str, millis: i64) -> Result<()> {
        self.set_sync_value(key, &millis.to_string())
    }

    // Whole-database maintenance

    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Delete every synced row, keeping the schema and sync metadata.
    pub fn wipe(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for table in DATA_TABLES {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_value_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.sync_value("k").unwrap(), None);
        store.set_sync_value("k", "a").unwrap();
        store.set_sync_value("k", "b").unwrap();
        assert_eq!(store.sync_value("k").unwrap().as_deref(), Some("b"));
        store.clear_sync_value("k").unwrap();
        assert_eq!(store.sync_value("k").unwrap(), None);
    }

    #[test]
    fn test_sync_timestamp_defaults_to_zero() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.sync_timestamp("never").unwrap(), 0);
        store.set_sync_timestamp("never", 1234).unwrap();
        assert_eq!(store.sync_timestamp("never").unwrap(), 1234);
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.set_sync_value("k", "v").unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.sync_value("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_wipe_keeps_metadata() {
        let store = SqliteStore::in_memory().unwrap();
        store.set_sync_value("version", "1").unwrap();
        store.put_story_text("1:a", "text").unwrap();
        store.wipe().unwrap();
        assert_eq!(store.story_text("1:a").unwrap(), None);
        assert_eq!(store.sync_value("version").unwrap().as_deref(), Some("1"));
    }
}
