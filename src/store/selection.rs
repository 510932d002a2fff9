use std::collections::BTreeSet;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::warn;

use super::keys::SESSION_FEED_SET;
use super::stories::{story_from_row, STORY_COLUMNS};
use super::{placeholders, SqliteStore};
use crate::app::Result;
use crate::domain::{CursorFilters, FeedCounts, FeedSet, ReadFilter, StateFilter, Story, StoryOrder};

/// `FROM ... WHERE ...` clause selecting the stories of a feed set.
#[derive(Debug, Default)]
pub(crate) struct Selection {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Selection {
    fn from_stories(filter: &str) -> Self {
        Self {
            sql: format!("FROM stories WHERE {}", filter),
            args: Vec::new(),
        }
    }

    fn from_social_map(filter: &str) -> Self {
        Self {
            sql: format!(
                "FROM social_story_map JOIN stories ON stories.story_hash = social_story_map.story_hash WHERE {}",
                filter
            ),
            args: Vec::new(),
        }
    }

    fn push_text(mut self, value: &str) -> Self {
        self.args.push(Value::Text(value.to_string()));
        self
    }

    fn push_all(mut self, values: &BTreeSet<String>) -> Self {
        self.args.extend(values.iter().cloned().map(Value::Text));
        self
    }

    fn append_filters(&mut self, read: ReadFilter, state: StateFilter, query: Option<&str>) {
        if read == ReadFilter::Unread {
            self.sql.push_str(" AND stories.read = 0");
        }
        let clause = match state {
            StateFilter::All => None,
            StateFilter::Some => Some(" AND stories.intel_total >= 0"),
            StateFilter::Neut => Some(" AND stories.intel_total = 0"),
            StateFilter::Best => Some(" AND stories.intel_total > 0"),
            StateFilter::Neg => Some(" AND stories.intel_total < 0"),
            StateFilter::Saved => Some(" AND stories.starred = 1"),
        };
        if let Some(clause) = clause {
            self.sql.push_str(clause);
        }
        if let Some(query) = query {
            self.sql.push_str(" AND stories.search_hit = ?");
            self.args.push(Value::Text(query.to_string()));
        }
    }
}

/// Build the local predicate for a feed set under the given filters.
pub(crate) fn story_selection(fs: &FeedSet, state: StateFilter, read: ReadFilter) -> Selection {
    let query = fs.search_query();
    // Saved stories are listed regardless of read state.
    let read = if state == StateFilter::Saved || fs.is_saved() {
        ReadFilter::All
    } else {
        read
    };

    let mut selection = match fs.base() {
        FeedSet::SingleFeed { feed_id } => {
            Selection::from_stories("stories.feed_id = ?").push_text(feed_id)
        }
        FeedSet::MultipleFeeds { feed_ids } | FeedSet::Folder { feed_ids, .. } => {
            Selection::from_stories(&format!(
                "stories.feed_id IN ({})",
                placeholders(feed_ids.len())
            ))
            .push_all(feed_ids)
        }
        FeedSet::SingleSocialFeed { user_id, .. } => {
            Selection::from_social_map("social_story_map.user_id = ?").push_text(user_id)
        }
        FeedSet::MultipleSocialFeeds { user_ids } => Selection::from_social_map(&format!(
            "social_story_map.user_id IN ({})",
            placeholders(user_ids.len())
        ))
        .push_all(user_ids),
        FeedSet::AllStories => Selection::from_stories("1"),
        FeedSet::AllSocial | FeedSet::GlobalShared => {
            let mut selection = Selection::from_social_map("1");
            let state = if state == StateFilter::Saved {
                StateFilter::Some
            } else {
                state
            };
            selection.append_filters(read, state, query);
            return selection;
        }
        FeedSet::AllRead => return Selection::from_stories("stories.last_read_timestamp > 0"),
        FeedSet::AllSaved => {
            let mut selection = Selection::from_stories("stories.starred = 1");
            selection.append_filters(ReadFilter::All, StateFilter::All, query);
            return selection;
        }
        FeedSet::SavedTag { tag } => {
            let mut selection = Selection::from_stories("stories.starred = 1 AND stories.user_tags LIKE ?")
                .push_text(&format!("%\"{}\"%", tag));
            selection.append_filters(ReadFilter::All, StateFilter::All, query);
            return selection;
        }
        FeedSet::Infrequent => Selection::from_stories("stories.infrequent = 1"),
        FeedSet::Search { .. } => unreachable!("base() strips search wrappers"),
    };

    selection.append_filters(read, state, query);
    selection
}

fn order_clause(fs: &FeedSet, order: StoryOrder) -> String {
    let dir = match order {
        StoryOrder::Newest => "DESC",
        StoryOrder::Oldest => "ASC",
    };
    match fs.base() {
        FeedSet::AllRead => "stories.last_read_timestamp DESC".to_string(),
        FeedSet::GlobalShared => "stories.shared_timestamp DESC".to_string(),
        FeedSet::AllSaved | FeedSet::SavedTag { .. } => format!("stories.starred_timestamp {}", dir),
        _ => format!("stories.timestamp {}", dir),
    }
}

fn count_selection(conn: &Connection, selection: &Selection) -> rusqlite::Result<i64> {
    conn.query_row(
        &format!("SELECT COUNT(DISTINCT stories.story_hash) {}", selection.sql),
        params_from_iter(selection.args.iter()),
        |row| row.get(0),
    )
}

impl SqliteStore {
    /// Hashes of the stories a feed set selects locally.
    pub fn local_story_hashes(
        &self,
        fs: &FeedSet,
        state: StateFilter,
        read: ReadFilter,
    ) -> Result<Vec<String>> {
        let selection = story_selection(fs, state, read);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT stories.story_hash {}",
            selection.sql
        ))?;
        let hashes = stmt
            .query_map(params_from_iter(selection.args.iter()), |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(hashes)
    }

    /// Unread stories a feed set selects locally, counted directly.
    pub fn local_unread_count(&self, fs: &FeedSet, state: StateFilter) -> Result<i64> {
        let selection = story_selection(fs, state, ReadFilter::Unread);
        let conn = self.conn()?;
        Ok(count_selection(&conn, &selection)?)
    }

    /// Unread count according to the stored per-feed counters.
    ///
    /// Positive stories always count; `Some` adds neutral ones and `All`
    /// adds negative ones too. Saved and read-history sets have no count.
    pub fn unread_count(&self, fs: &FeedSet, state: StateFilter) -> Result<i64> {
        if state == StateFilter::Saved || fs.is_saved() {
            return Ok(0);
        }
        let counts = match fs.base() {
            FeedSet::AllStories => self.sum_feed_counts(None, true)?,
            FeedSet::SingleFeed { .. } | FeedSet::MultipleFeeds { .. } | FeedSet::Folder { .. } => {
                let ids = fs.feed_ids().unwrap_or_default();
                self.sum_feed_counts(Some(&ids), true)?
            }
            FeedSet::SingleSocialFeed { .. } | FeedSet::MultipleSocialFeeds { .. } => {
                let ids = fs.social_user_ids().unwrap_or_default();
                self.sum_social_counts(&ids)?
            }
            _ => return Ok(0),
        };
        Ok(match state {
            StateFilter::All => counts.positive + counts.neutral + counts.negative,
            StateFilter::Some => counts.positive + counts.neutral,
            _ => counts.positive,
        })
    }

    /// Recompute stored counters from the stories held locally.
    ///
    /// Used when offline, where the server cannot be asked.
    pub fn update_local_feed_counts(&self, fs: &FeedSet) -> Result<()> {
        let (feed_ids, social_ids): (BTreeSet<String>, BTreeSet<String>) = match fs.base() {
            FeedSet::AllStories => (
                self.feeds()?.into_iter().map(|f| f.feed_id).collect(),
                self.social_feeds()?.into_iter().map(|f| f.user_id).collect(),
            ),
            FeedSet::SingleFeed { .. } | FeedSet::MultipleFeeds { .. } | FeedSet::Folder { .. } => {
                (fs.feed_ids().unwrap_or_default(), BTreeSet::new())
            }
            FeedSet::SingleSocialFeed { .. } | FeedSet::MultipleSocialFeeds { .. } => {
                (BTreeSet::new(), fs.social_user_ids().unwrap_or_default())
            }
            other => {
                warn!(feed_set = %other, "Feed set has no local counters to update");
                return Ok(());
            }
        };

        for feed_id in feed_ids {
            let single = FeedSet::single_feed(&feed_id);
            let counts = self.local_counts(&single)?;
            self.update_feed_counts(&feed_id, counts)?;
        }
        for user_id in social_ids {
            let single = FeedSet::single_social(&user_id, "");
            let counts = self.local_counts(&single)?;
            self.update_social_feed_counts(&user_id, counts)?;
        }
        Ok(())
    }

    fn local_counts(&self, fs: &FeedSet) -> Result<FeedCounts> {
        Ok(FeedCounts {
            positive: self.local_unread_count(fs, StateFilter::Best)?,
            neutral: self.local_unread_count(fs, StateFilter::Neut)?,
            negative: self.local_unread_count(fs, StateFilter::Neg)?,
        })
    }

    // Reading session

    pub fn session_feed_set(&self) -> Result<Option<FeedSet>> {
        Ok(self
            .sync_value(SESSION_FEED_SET)?
            .and_then(|s| FeedSet::from_compact(&s)))
    }

    pub fn set_session_feed_set(&self, fs: Option<&FeedSet>) -> Result<()> {
        match fs {
            Some(fs) => self.set_sync_value(SESSION_FEED_SET, &fs.to_compact()),
            None => self.clear_sync_value(SESSION_FEED_SET),
        }
    }

    /// Whether the session was built for exactly this set.
    pub fn is_feed_set_ready(&self, fs: &FeedSet) -> Result<bool> {
        Ok(self.session_feed_set()?.as_ref() == Some(fs))
    }

    pub fn clear_story_session(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM reading_session", [])?;
        Ok(())
    }

    /// Fill the session with every locally held story the set selects.
    pub fn prepare_reading_session(&self, fs: &FeedSet, filters: CursorFilters) -> Result<()> {
        let selection = story_selection(fs, filters.state_filter, filters.read_filter);
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO reading_session (story_hash) SELECT DISTINCT stories.story_hash {}",
                selection.sql
            ),
            params_from_iter(selection.args.iter()),
        )?;
        Ok(())
    }

    /// Rebuild the session for `fs` unless it was already built for it.
    ///
    /// Returns whether the session changed.
    pub fn switch_reading_session(&self, fs: &FeedSet, filters: CursorFilters) -> Result<bool> {
        if self.is_feed_set_ready(fs)? {
            return Ok(false);
        }
        self.clear_story_session()?;
        self.prepare_reading_session(fs, filters)?;
        self.set_session_feed_set(Some(fs))?;
        Ok(true)
    }

    pub fn session_hashes(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT story_hash FROM reading_session ORDER BY story_hash")?;
        let hashes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(hashes)
    }

    /// Stories of the current session in display order.
    ///
    /// An empty session is primed from the local store first.
    pub fn active_stories(&self, fs: &FeedSet, filters: CursorFilters) -> Result<Vec<Story>> {
        if self.session_hashes()?.is_empty() {
            self.prepare_reading_session(fs, filters)?;
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reading_session JOIN stories ON stories.story_hash = reading_session.story_hash
             ORDER BY {}",
            STORY_COLUMNS,
            order_clause(fs, filters.story_order)
        ))?;
        let stories = stmt
            .query_map([], story_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stories)
    }
}
