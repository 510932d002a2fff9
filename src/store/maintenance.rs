use rusqlite::params;

use super::{now_millis, SqliteStore};
use crate::app::Result;

/// Stories and dismissals older than this are dropped by cleanup.
pub const CLEANUP_AGE_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Stories eligible for a notification, split by the feed's filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyCandidates {
    /// Unread focus stories in feeds notifying on `focus`.
    pub focus: Vec<String>,
    /// Unread non-negative stories in feeds notifying on `unread`.
    pub unread: Vec<String>,
}

impl NotifyCandidates {
    pub fn is_empty(&self) -> bool {
        self.focus.is_empty() && self.unread.is_empty()
    }

    pub fn into_hashes(self) -> Vec<String> {
        let mut hashes = self.focus;
        hashes.extend(self.unread);
        hashes
    }
}

impl SqliteStore {
    /// Delete stories older than the cleanup age that are not on screen.
    pub fn cleanup_very_old_stories(&self) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM stories WHERE timestamp < ?1
             AND story_hash NOT IN (SELECT story_hash FROM reading_session)",
            params![now_millis() - CLEANUP_AGE_MILLIS],
        )?;
        Ok(deleted)
    }

    /// Delete read stories that are not on screen.
    pub fn cleanup_read_stories(&self) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM stories WHERE read = 1 AND starred = 0
             AND story_hash NOT IN (SELECT story_hash FROM reading_session)",
            [],
        )?;
        Ok(deleted)
    }

    /// Delete fetched text whose story is gone.
    pub fn cleanup_story_text(&self) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM story_texts WHERE story_hash NOT IN (SELECT story_hash FROM stories)",
            [],
        )?;
        Ok(deleted)
    }

    pub fn cleanup_dismissals(&self) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM notify_dismissals WHERE time < ?1",
            params![now_millis() - CLEANUP_AGE_MILLIS],
        )?;
        Ok(deleted)
    }

    pub fn put_story_dismissed(&self, story_hash: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO notify_dismissals (story_hash, time) VALUES (?1, ?2)",
            params![story_hash, now_millis()],
        )?;
        Ok(())
    }

    pub fn is_story_dismissed(&self, story_hash: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notify_dismissals WHERE story_hash = ?1",
            params![story_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn notify_candidates(&self) -> Result<NotifyCandidates> {
        let conn = self.conn()?;
        let query = |filter: &str, intel: &str| -> rusqlite::Result<Vec<String>> {
            let mut stmt = conn.prepare(&format!(
                "SELECT stories.story_hash FROM stories
                 JOIN feeds ON feeds.feed_id = stories.feed_id
                 WHERE feeds.notification_filter = ?1 AND stories.read = 0 AND {}
                 AND stories.story_hash NOT IN (SELECT story_hash FROM notify_dismissals)
                 ORDER BY stories.timestamp DESC",
                intel
            ))?;
            let hashes = stmt
                .query_map(params![filter], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(hashes)
        };
        Ok(NotifyCandidates {
            focus: query("focus", "stories.intel_total > 0")?,
            unread: query("unread", "stories.intel_total >= 0")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StateFilter, StoriesPage};
    use crate::store::stories::tests::{seed_feeds, story};

    fn insert(store: &SqliteStore, stories: Vec<crate::domain::Story>) {
        store
            .insert_stories(
                &StoriesPage {
                    stories,
                    ..Default::default()
                },
                StateFilter::All,
                false,
            )
            .unwrap();
    }

    #[test]
    fn test_cleanup_spares_session_and_saved() {
        let store = SqliteStore::in_memory().unwrap();
        let now = now_millis();
        let mut read = story("1:read", now);
        read.read = true;
        let mut saved = story("1:saved", now);
        saved.read = true;
        saved.starred = true;
        insert(&store, vec![story("1:old", 1), read, saved, story("1:fresh", now)]);
        store.clear_story_session().unwrap();
        store
            .prepare_reading_session(
                &crate::domain::FeedSet::single_feed("1"),
                crate::domain::CursorFilters {
                    state_filter: StateFilter::All,
                    read_filter: crate::domain::ReadFilter::All,
                    ..Default::default()
                },
            )
            .unwrap();

        // Everything is on screen, so nothing goes.
        assert_eq!(store.cleanup_very_old_stories().unwrap(), 0);
        store.clear_story_session().unwrap();
        assert_eq!(store.cleanup_very_old_stories().unwrap(), 1);
        assert_eq!(store.cleanup_read_stories().unwrap(), 1);
        assert!(store.story("1:saved").unwrap().is_some());
        assert!(store.story("1:fresh").unwrap().is_some());
    }

    #[test]
    fn test_cleanup_story_text() {
        let store = SqliteStore::in_memory().unwrap();
        insert(&store, vec![story("1:a", now_millis())]);
        store.put_story_text("1:a", "kept").unwrap();
        store.put_story_text("1:gone", "dropped").unwrap();
        assert_eq!(store.cleanup_story_text().unwrap(), 1);
        assert_eq!(store.story_text("1:a").unwrap().as_deref(), Some("kept"));
    }

    #[test]
    fn test_notify_candidates_respect_filter_and_dismissal() {
        let store = SqliteStore::in_memory().unwrap();
        seed_feeds(&store, &["1", "2"]);
        store.set_feed_notifications("1", &[], Some("focus")).unwrap();
        store.set_feed_notifications("2", &[], Some("unread")).unwrap();

        let mut focus = story("1:f", 1);
        focus.intelligence.author = 1;
        let mut negative = story("2:n", 1);
        negative.intelligence.tags = -1;
        insert(&store, vec![focus, story("1:plain", 1), story("2:u", 1), negative]);

        let candidates = store.notify_candidates().unwrap();
        assert_eq!(candidates.focus, vec!["1:f"]);
        assert_eq!(candidates.unread, vec!["2:u"]);

        store.put_story_dismissed("2:u").unwrap();
        assert!(store.is_story_dismissed("2:u").unwrap());
        assert!(store.notify_candidates().unwrap().unread.is_empty());
        assert_eq!(store.cleanup_dismissals().unwrap(), 0);
    }
}
