use std::collections::{BTreeSet, HashSet};

use rusqlite::{params, params_from_iter, OptionalExtension, Row, Transaction};

use super::{from_json_list, placeholders, to_json_list, SqliteStore};
use crate::app::Result;
use crate::domain::feed::TOTAL_STARRED;
use crate::domain::{Feed, FeedCounts, FeedSet, Folder, SavedSearch, SocialFeed, StarredCount, Story};

const FEED_COLUMNS: &str = "feed_id, title, address, favicon_url, active, pos_count, neut_count, neg_count,
     fetch_pending, notification_filter, notification_types";

const SOCIAL_FEED_COLUMNS: &str =
    "user_id, username, title, photo_url, pos_count, neut_count, neg_count";

/// Everything a feed/folder sync replaces in one transaction.
#[derive(Debug, Clone, Default)]
pub struct FeedFolderSnapshot {
    pub feeds: Vec<Feed>,
    pub social_feeds: Vec<SocialFeed>,
    pub folders: Vec<Folder>,
    pub starred_counts: Vec<StarredCount>,
    pub saved_searches: Vec<SavedSearch>,
}

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<Feed> {
    Ok(Feed {
        feed_id: row.get(0)?,
        title: row.get(1)?,
        address: row.get(2)?,
        favicon_url: row.get(3)?,
        active: row.get(4)?,
        counts: FeedCounts {
            positive: row.get(5)?,
            neutral: row.get(6)?,
            negative: row.get(7)?,
        },
        fetch_pending: row.get(8)?,
        notification_filter: row.get(9)?,
        notification_types: from_json_list(&row.get::<_, String>(10)?),
    })
}

fn social_feed_from_row(row: &Row<'_>) -> rusqlite::Result<SocialFeed> {
    Ok(SocialFeed {
        user_id: row.get(0)?,
        username: row.get(1)?,
        title: row.get(2)?,
        photo_url: row.get(3)?,
        counts: FeedCounts {
            positive: row.get(4)?,
            neutral: row.get(5)?,
            negative: row.get(6)?,
        },
    })
}

fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        name: row.get(0)?,
        feed_ids: from_json_list(&row.get::<_, String>(1)?),
        children: from_json_list(&row.get::<_, String>(2)?),
    })
}

pub(crate) fn insert_feed(tx: &Transaction<'_>, feed: &Feed) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO feeds (feed_id, title, address, favicon_url, active, pos_count,
             neut_count, neg_count, fetch_pending, notification_filter, notification_types)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            feed.feed_id,
            feed.title,
            feed.address,
            feed.favicon_url,
            feed.active,
            feed.counts.positive,
            feed.counts.neutral,
            feed.counts.negative,
            feed.fetch_pending,
            feed.notification_filter,
            to_json_list(&feed.notification_types),
        ],
    )?;
    Ok(())
}

impl SqliteStore {
    // Bulk feed/folder replacement

    pub fn set_feeds_folders(&self, snapshot: &FeedFolderSnapshot) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for table in [
            "feeds",
            "folders",
            "social_feeds",
            "social_story_map",
            "comments",
            "replies",
            "starred_counts",
            "saved_searches",
        ] {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }

        for feed in &snapshot.feeds {
            insert_feed(&tx, feed)?;
        }
        for (position, folder) in snapshot.folders.iter().enumerate() {
            tx.execute(
                "INSERT OR REPLACE INTO folders (name, position, feed_ids, children)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    folder.name,
                    position as i64,
                    to_json_list(&folder.feed_ids),
                    to_json_list(&folder.children),
                ],
            )?;
        }
        for social in &snapshot.social_feeds {
            tx.execute(
                "INSERT OR REPLACE INTO social_feeds (user_id, username, title, photo_url,
                     pos_count, neut_count, neg_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    social.user_id,
                    social.username,
                    social.title,
                    social.photo_url,
                    social.counts.positive,
                    social.counts.neutral,
                    social.counts.negative,
                ],
            )?;
        }
        for count in &snapshot.starred_counts {
            tx.execute(
                "INSERT OR REPLACE INTO starred_counts (tag, feed_id, count) VALUES (?1, ?2, ?3)",
                params![
                    count.tag.as_deref().unwrap_or_default(),
                    count.feed_id.as_deref().unwrap_or_default(),
                    count.count,
                ],
            )?;
        }
        for search in &snapshot.saved_searches {
            tx.execute(
                "INSERT OR REPLACE INTO saved_searches (feed_id, query, title) VALUES (?1, ?2, ?3)",
                params![search.feed_id, search.query, search.title],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // Feed operations

    pub fn feed(&self, feed_id: &str) -> Result<Option<Feed>> {
        let conn = self.conn()?;
        let feed = conn
            .query_row(
                &format!("SELECT {} FROM feeds WHERE feed_id = ?1", FEED_COLUMNS),
                params![feed_id],
                feed_from_row,
            )
            .optional()?;
        Ok(feed)
    }

    pub fn feeds(&self) -> Result<Vec<Feed>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM feeds ORDER BY title COLLATE NOCASE",
            FEED_COLUMNS
        ))?;
        let feeds = stmt
            .query_map([], feed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    pub fn all_feed_ids(&self) -> Result<BTreeSet<String>> {
        self.feed_ids_where("1 = 1")
    }

    pub fn active_feed_ids(&self) -> Result<BTreeSet<String>> {
        self.feed_ids_where("active = 1")
    }

    fn feed_ids_where(&self, predicate: &str) -> Result<BTreeSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT feed_id FROM feeds WHERE {}", predicate))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<BTreeSet<String>, _>>()?;
        Ok(ids)
    }

    /// Replace (or create) a single feed row.
    pub fn put_feed(&self, feed: &Feed) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_feed(&tx, feed)?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_feeds_active(&self, feed_ids: &BTreeSet<String>, active: bool) -> Result<()> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("UPDATE feeds SET active = ?1 WHERE feed_id = ?2")?;
        for id in feed_ids {
            stmt.execute(params![active, id])?;
        }
        Ok(())
    }

    pub fn set_feed_fetch_pending(&self, feed_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET fetch_pending = 1 WHERE feed_id = ?1",
            params![feed_id],
        )?;
        Ok(())
    }

    /// Only single-feed sets can be waiting on a server-side refetch.
    pub fn is_feed_set_fetch_pending(&self, fs: &FeedSet) -> Result<bool> {
        let Some(feed_id) = fs.single_feed_id() else {
            return Ok(false);
        };
        Ok(self.feed(feed_id)?.is_some_and(|f| f.fetch_pending))
    }

    pub fn rename_feed(&self, feed_id: &str, title: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET title = ?1 WHERE feed_id = ?2",
            params![title, feed_id],
        )?;
        Ok(())
    }

    pub fn set_feed_notifications(
        &self,
        feed_id: &str,
        types: &[String],
        filter: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET notification_types = ?1, notification_filter = ?2 WHERE feed_id = ?3",
            params![to_json_list(types), filter, feed_id],
        )?;
        Ok(())
    }

    /// Remove a feed and every story filed under it.
    pub fn delete_feed(&self, feed_id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM feeds WHERE feed_id = ?1", params![feed_id])?;
        tx.execute("DELETE FROM stories WHERE feed_id = ?1", params![feed_id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_feed_counts(&self, feed_id: &str, counts: FeedCounts) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET pos_count = ?1, neut_count = ?2, neg_count = ?3, fetch_pending = 0
             WHERE feed_id = ?4",
            params![counts.positive, counts.neutral, counts.negative, feed_id],
        )?;
        Ok(())
    }

    /// Insert placeholder feeds for stories whose feed is unknown locally.
    pub fn fix_missing_story_feeds(&self, stories: &[Story]) -> Result<()> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO feeds (feed_id, title, active) VALUES (?1, '', 1)",
        )?;
        for story in stories {
            stmt.execute(params![story.feed_id])?;
        }
        Ok(())
    }

    /// Feeds the user asked to be notified about.
    pub fn notify_feed_ids(&self) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT feed_id FROM feeds WHERE notification_filter IN ('focus', 'unread')",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(ids)
    }

    // Social feed operations

    pub fn social_feed(&self, user_id: &str) -> Result<Option<SocialFeed>> {
        let conn = self.conn()?;
        let feed = conn
            .query_row(
                &format!(
                    "SELECT {} FROM social_feeds WHERE user_id = ?1",
                    SOCIAL_FEED_COLUMNS
                ),
                params![user_id],
                social_feed_from_row,
            )
            .optional()?;
        Ok(feed)
    }

    pub fn social_feeds(&self) -> Result<Vec<SocialFeed>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM social_feeds ORDER BY username COLLATE NOCASE",
            SOCIAL_FEED_COLUMNS
        ))?;
        let feeds = stmt
            .query_map([], social_feed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    pub fn update_social_feed_counts(&self, user_id: &str, counts: FeedCounts) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE social_feeds SET pos_count = ?1, neut_count = ?2, neg_count = ?3
             WHERE user_id = ?4",
            params![counts.positive, counts.neutral, counts.negative, user_id],
        )?;
        Ok(())
    }

    /// Remove a social feed, the stories it shared and its story links.
    pub fn delete_social_feed(&self, user_id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM social_feeds WHERE user_id = ?1", params![user_id])?;
        tx.execute(
            "DELETE FROM stories WHERE social_user_id = ?1",
            params![user_id],
        )?;
        tx.execute(
            "DELETE FROM social_story_map WHERE user_id = ?1",
            params![user_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // Folder operations

    pub fn folders(&self) -> Result<Vec<Folder>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT name, feed_ids, children FROM folders ORDER BY position")?;
        let folders = stmt
            .query_map([], folder_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    pub fn folder(&self, name: &str) -> Result<Option<Folder>> {
        let conn = self.conn()?;
        let folder = conn
            .query_row(
                "SELECT name, feed_ids, children FROM folders WHERE name = ?1",
                params![name],
                folder_from_row,
            )
            .optional()?;
        Ok(folder)
    }

    /// Feed set covering a folder and, recursively, its children.
    pub fn feed_set_for_folder(&self, name: &str) -> Result<Option<FeedSet>> {
        let folders = self.folders()?;
        if !folders.iter().any(|f| f.name == name) {
            return Ok(None);
        }

        let mut feed_ids = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(folder) = folders.iter().find(|f| f.name == current) {
                feed_ids.extend(folder.feed_ids.iter().cloned());
                pending.extend(folder.children.iter().cloned());
            }
        }

        Ok(Some(FeedSet::Folder {
            name: name.to_string(),
            feed_ids,
        }))
    }

    // Starred counts and saved searches

    pub fn starred_counts(&self) -> Result<Vec<StarredCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT tag, feed_id, count FROM starred_counts WHERE tag != ?1 ORDER BY tag, feed_id",
        )?;
        let counts = stmt
            .query_map(params![TOTAL_STARRED], |row| {
                let tag: String = row.get(0)?;
                let feed_id: String = row.get(1)?;
                Ok(StarredCount {
                    tag: (!tag.is_empty()).then_some(tag),
                    feed_id: (!feed_id.is_empty()).then_some(feed_id),
                    count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    pub fn total_starred_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn
            .query_row(
                "SELECT count FROM starred_counts WHERE tag = ?1 AND feed_id = ''",
                params![TOTAL_STARRED],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    pub fn saved_searches(&self) -> Result<Vec<SavedSearch>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT feed_id, query, title FROM saved_searches ORDER BY query")?;
        let searches = stmt
            .query_map([], |row| {
                Ok(SavedSearch {
                    feed_id: row.get(0)?,
                    query: row.get(1)?,
                    title: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(searches)
    }

    pub fn delete_saved_search(&self, feed_id: &str, query: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM saved_searches WHERE feed_id = ?1 AND query = ?2",
            params![feed_id, query],
        )?;
        Ok(())
    }

    /// Sum of stored unread counts over the given feed rows.
    pub(crate) fn sum_feed_counts(&self, feed_ids: Option<&BTreeSet<String>>, active_only: bool) -> Result<FeedCounts> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT COALESCE(SUM(pos_count), 0), COALESCE(SUM(neut_count), 0), COALESCE(SUM(neg_count), 0)
             FROM feeds WHERE 1",
        );
        if active_only {
            sql.push_str(" AND active = 1");
        }
        let args: Vec<&String> = feed_ids.map(|ids| ids.iter().collect()).unwrap_or_default();
        if feed_ids.is_some() {
            sql.push_str(&format!(" AND feed_id IN ({})", placeholders(args.len())));
        }
        let counts = conn.query_row(&sql, params_from_iter(args), |row| {
            Ok(FeedCounts {
                positive: row.get(0)?,
                neutral: row.get(1)?,
                negative: row.get(2)?,
            })
        })?;
        Ok(counts)
    }

    pub(crate) fn sum_social_counts(&self, user_ids: &BTreeSet<String>) -> Result<FeedCounts> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT COALESCE(SUM(pos_count), 0), COALESCE(SUM(neut_count), 0), COALESCE(SUM(neg_count), 0)
             FROM social_feeds WHERE user_id IN ({})",
            placeholders(user_ids.len())
        );
        let counts = conn.query_row(&sql, params_from_iter(user_ids.iter()), |row| {
            Ok(FeedCounts {
                positive: row.get(0)?,
                neutral: row.get(1)?,
                negative: row.get(2)?,
            })
        })?;
        Ok(counts)
    }
}
