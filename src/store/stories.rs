use std::collections::{BTreeSet, HashSet};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, Transaction};
use tracing::{debug, warn};

use super::classifiers::replace_classifier_tx;
use super::social::insert_comment_tx;
use super::{from_json_list, now_millis, placeholders, to_json_list, SqliteStore};
use crate::app::Result;
use crate::domain::feed::TOTAL_STARRED;
use crate::domain::{FeedSet, Intelligence, StateFilter, StoriesPage, Story};

pub(crate) const STORY_COLUMNS: &str = "stories.story_hash, stories.story_id, stories.feed_id,
     stories.title, stories.authors, stories.content, stories.permalink, stories.timestamp,
     stories.read, stories.starred, stories.starred_timestamp, stories.last_read_timestamp,
     stories.shared_timestamp, stories.user_tags, stories.tags, stories.image_urls,
     stories.thumbnail_url, stories.shared_user_ids, stories.friend_user_ids,
     stories.social_user_id, stories.intel_feed, stories.intel_author, stories.intel_tags,
     stories.intel_title, stories.infrequent, stories.search_hit";

pub(crate) fn story_from_row(row: &Row<'_>) -> rusqlite::Result<Story> {
    Ok(Story {
        story_hash: row.get(0)?,
        story_id: row.get(1)?,
        feed_id: row.get(2)?,
        title: row.get(3)?,
        authors: row.get(4)?,
        content: row.get(5)?,
        permalink: row.get(6)?,
        timestamp: row.get(7)?,
        read: row.get(8)?,
        starred: row.get(9)?,
        starred_timestamp: row.get(10)?,
        last_read_timestamp: row.get(11)?,
        shared_timestamp: row.get(12)?,
        user_tags: from_json_list(&row.get::<_, String>(13)?),
        tags: from_json_list(&row.get::<_, String>(14)?),
        image_urls: from_json_list(&row.get::<_, String>(15)?),
        thumbnail_url: row.get(16)?,
        shared_user_ids: from_json_list(&row.get::<_, String>(17)?),
        friend_user_ids: from_json_list(&row.get::<_, String>(18)?),
        social_user_id: row.get(19)?,
        intelligence: Intelligence {
            feed: row.get(20)?,
            author: row.get(21)?,
            tags: row.get(22)?,
            title: row.get(23)?,
        },
        infrequent: row.get(24)?,
        search_hit: row.get(25)?,
        ..Default::default()
    })
}

fn insert_story_row(tx: &Transaction<'_>, story: &Story) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO stories (story_hash, story_id, feed_id, title, authors, content,
             permalink, timestamp, read, starred, starred_timestamp, last_read_timestamp,
             shared_timestamp, user_tags, tags, image_urls, thumbnail_url, shared_user_ids,
             friend_user_ids, social_user_id, intel_feed, intel_author, intel_tags, intel_title,
             intel_total, infrequent, search_hit)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
             ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
        params![
            story.story_hash,
            story.story_id,
            story.feed_id,
            story.title,
            story.authors,
            story.content,
            story.permalink,
            story.timestamp,
            story.read,
            story.starred,
            story.starred_timestamp,
            story.last_read_timestamp,
            story.shared_timestamp,
            to_json_list(&story.user_tags),
            to_json_list(&story.tags),
            to_json_list(&story.image_urls),
            story.guess_thumbnail_url(),
            to_json_list(&story.shared_user_ids),
            to_json_list(&story.friend_user_ids),
            story.social_user_id,
            story.intelligence.feed,
            story.intelligence.author,
            story.intelligence.tags,
            story.intelligence.title,
            story.intelligence.total(),
            story.infrequent,
            story.search_hit,
        ],
    )?;
    Ok(())
}

/// Write one page of stories and everything that came with it.
///
/// With `for_immediate`, stories visible under `state` also join the
/// current reading session.
pub(crate) fn insert_stories_tx(
    tx: &Transaction<'_>,
    page: &StoriesPage,
    state: StateFilter,
    for_immediate: bool,
) -> Result<()> {
    for user in &page.users {
        tx.execute(
            "INSERT OR REPLACE INTO users (user_id, username, photo_url, location)
             VALUES (?1, ?2, ?3, ?4)",
            params![user.user_id, user.username, user.photo_url, user.location],
        )?;
    }

    for feed in &page.feeds {
        tx.execute(
            "INSERT INTO feeds (feed_id, title, address, favicon_url, active)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(feed_id) DO UPDATE SET title = excluded.title,
                 address = excluded.address, favicon_url = excluded.favicon_url",
            params![feed.feed_id, feed.title, feed.address, feed.favicon_url, feed.active],
        )?;
    }

    for story in page.stories.iter().chain(page.story.iter()) {
        if story.story_hash.is_empty() {
            warn!(story_id = %story.story_id, "Skipping story without a hash");
            continue;
        }
        insert_story_row(tx, story)?;

        for user_id in &story.shared_user_ids {
            tx.execute(
                "INSERT OR IGNORE INTO social_story_map (user_id, story_hash) VALUES (?1, ?2)",
                params![user_id, story.story_hash],
            )?;
        }

        for comment in &story.public_comments {
            insert_comment_tx(tx, comment)?;
        }
        for comment in &story.friends_comments {
            let mut comment = comment.clone();
            comment.by_friend = true;
            insert_comment_tx(tx, &comment)?;
        }
        for share in &story.friends_shares {
            let mut share = share.clone();
            share.by_friend = true;
            share.is_pseudo = true;
            insert_comment_tx(tx, &share)?;
        }

        if for_immediate && story.is_visible_in(state) {
            tx.execute(
                "INSERT OR IGNORE INTO reading_session (story_hash) VALUES (?1)",
                params![story.story_hash],
            )?;
        }
    }

    let implied = page.implied_feed_id();
    for (key, classifier) in &page.classifiers {
        let feed_id = if key == "-1" { implied } else { Some(key.as_str()) };
        match feed_id {
            Some(feed_id) => replace_classifier_tx(tx, feed_id, classifier)?,
            None => debug!("Dropping classifier for a page without stories"),
        }
    }

    if let Some(feed_id) = implied {
        if !page.feed_tags.is_empty() {
            tx.execute("DELETE FROM feed_tags WHERE feed_id = ?1", params![feed_id])?;
            for tag in &page.feed_tags {
                tx.execute(
                    "INSERT OR IGNORE INTO feed_tags (feed_id, tag) VALUES (?1, ?2)",
                    params![feed_id, tag],
                )?;
            }
        }
        if !page.feed_authors.is_empty() {
            tx.execute("DELETE FROM feed_authors WHERE feed_id = ?1", params![feed_id])?;
            for author in &page.feed_authors {
                tx.execute(
                    "INSERT OR IGNORE INTO feed_authors (feed_id, author) VALUES (?1, ?2)",
                    params![feed_id, author],
                )?;
            }
        }
    }

    Ok(())
}

fn adjust_unread_counts(
    tx: &Transaction<'_>,
    feed_id: &str,
    social_ids: &BTreeSet<String>,
    intel_total: i32,
    delta: i64,
) -> rusqlite::Result<()> {
    let column = match intel_total {
        0 => "neut_count",
        t if t > 0 => "pos_count",
        _ => return Ok(()),
    };
    tx.execute(
        &format!(
            "UPDATE feeds SET {col} = MAX({col} + ?1, 0) WHERE feed_id = ?2",
            col = column
        ),
        params![delta, feed_id],
    )?;
    for user_id in social_ids {
        tx.execute(
            &format!(
                "UPDATE social_feeds SET {col} = MAX({col} + ?1, 0) WHERE user_id = ?2",
                col = column
            ),
            params![delta, user_id],
        )?;
    }
    Ok(())
}

impl SqliteStore {
    pub fn insert_stories(
        &self,
        page: &StoriesPage,
        state: StateFilter,
        for_immediate: bool,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_stories_tx(&tx, page, state, for_immediate)?;
        tx.commit()?;
        Ok(())
    }

    /// Insert a server-confirmed story, keeping the local read and saved
    /// state, which the server copy may not reflect yet.
    pub fn update_story(&self, page: &StoriesPage, state: StateFilter, for_immediate: bool) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut page = page.clone();
        for story in page.stories.iter_mut().chain(page.story.iter_mut()) {
            let existing = tx
                .query_row(
                    "SELECT starred, starred_timestamp, read FROM stories WHERE story_hash = ?1",
                    params![story.story_hash],
                    |row| Ok((row.get::<_, bool>(0)?, row.get::<_, i64>(1)?, row.get::<_, bool>(2)?)),
                )
                .optional()?;
            if let Some((starred, starred_timestamp, read)) = existing {
                story.starred = starred;
                story.starred_timestamp = starred_timestamp;
                story.read = read;
            }
        }

        insert_stories_tx(&tx, &page, state, for_immediate)?;
        tx.commit()?;
        Ok(())
    }

    pub fn story(&self, story_hash: &str) -> Result<Option<Story>> {
        let conn = self.conn()?;
        let story = conn
            .query_row(
                &format!("SELECT {} FROM stories WHERE story_hash = ?1", STORY_COLUMNS),
                params![story_hash],
                story_from_row,
            )
            .optional()?;
        Ok(story)
    }

    pub fn stories_by_hashes(&self, hashes: &[String]) -> Result<Vec<Story>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM stories WHERE story_hash IN ({})",
            STORY_COLUMNS,
            placeholders(hashes.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let stories = stmt
            .query_map(params_from_iter(hashes.iter()), story_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stories)
    }

    pub fn unread_stories_for_feed(&self, feed_id: &str) -> Result<Vec<Story>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stories WHERE feed_id = ?1 AND read = 0",
            STORY_COLUMNS
        ))?;
        let stories = stmt
            .query_map(params![feed_id], story_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stories)
    }

    pub fn delete_stories(&self, hashes: &[String]) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            &format!(
                "DELETE FROM stories WHERE story_hash IN ({})",
                placeholders(hashes.len())
            ),
            params_from_iter(hashes.iter()),
        )?;
        Ok(deleted)
    }

    // Read state

    /// Set the read flag without touching unread counts.
    ///
    /// Safe to repeat; used when the server has confirmed the change.
    pub fn set_story_read_state(&self, story_hash: &str, read: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE stories SET read = ?1 WHERE story_hash = ?2",
            params![read, story_hash],
        )?;
        Ok(())
    }

    /// Set the read flag and adjust the stored unread counts of every feed
    /// the story appears in.
    ///
    /// Returns the feed sets whose counts are affected. A story already in
    /// the requested state is left alone and no count moves.
    pub fn set_story_read_state_counted(&self, story_hash: &str, read: bool) -> Result<Vec<FeedSet>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                "SELECT feed_id, social_user_id, friend_user_ids, intel_total, read
                 FROM stories WHERE story_hash = ?1",
                params![story_hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i32>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((feed_id, social_user_id, friends, intel_total, was_read)) = row else {
            warn!(story_hash, "Cannot change read state of unknown story");
            return Ok(Vec::new());
        };

        let mut social_ids: BTreeSet<String> = from_json_list(&friends).into_iter().collect();
        social_ids.extend(social_user_id);

        let mut impacted = vec![FeedSet::single_feed(&feed_id)];
        if !social_ids.is_empty() {
            impacted.push(FeedSet::MultipleSocialFeeds {
                user_ids: social_ids.clone(),
            });
        }

        if was_read == read {
            return Ok(impacted);
        }

        tx.execute(
            "UPDATE stories SET read = ?1 WHERE story_hash = ?2",
            params![read, story_hash],
        )?;
        adjust_unread_counts(&tx, &feed_id, &social_ids, intel_total, if read { -1 } else { 1 })?;
        tx.commit()?;

        Ok(impacted)
    }

    /// Mark every story in a feed set read, optionally bounded by time.
    ///
    /// Only feed- and social-scoped sets and `AllStories` can be marked
    /// this way; other sets are logged and ignored.
    pub fn mark_stories_read(
        &self,
        fs: &FeedSet,
        older_than: Option<i64>,
        newer_than: Option<i64>,
    ) -> Result<usize> {
        let mut sql = String::from("UPDATE stories SET read = 1 WHERE read = 0");
        let mut args: Vec<Value> = Vec::new();

        match fs.base() {
            FeedSet::AllStories => {}
            FeedSet::SingleFeed { feed_id } => {
                sql.push_str(" AND feed_id = ?");
                args.push(Value::Text(feed_id.clone()));
            }
            FeedSet::MultipleFeeds { feed_ids } | FeedSet::Folder { feed_ids, .. } => {
                sql.push_str(&format!(" AND feed_id IN ({})", placeholders(feed_ids.len())));
                args.extend(feed_ids.iter().cloned().map(Value::Text));
            }
            FeedSet::SingleSocialFeed { user_id, .. } => {
                sql.push_str(" AND social_user_id = ?");
                args.push(Value::Text(user_id.clone()));
            }
            FeedSet::MultipleSocialFeeds { user_ids } => {
                sql.push_str(&format!(
                    " AND social_user_id IN ({})",
                    placeholders(user_ids.len())
                ));
                args.extend(user_ids.iter().cloned().map(Value::Text));
            }
            other => {
                warn!(feed_set = %other, "Feed set cannot be marked read locally");
                return Ok(0);
            }
        }

        if let Some(older) = older_than {
            sql.push_str(" AND timestamp <= ?");
            args.push(Value::Integer(older));
        }
        if let Some(newer) = newer_than {
            sql.push_str(" AND timestamp >= ?");
            args.push(Value::Integer(newer));
        }

        let conn = self.conn()?;
        let changed = conn.execute(&sql, params_from_iter(args.iter()))?;
        Ok(changed)
    }

    pub fn mark_story_hashes_read(&self, hashes: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare("UPDATE stories SET read = 1 WHERE story_hash = ?1")?;
            for hash in hashes {
                changed += stmt.execute(params![hash])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    pub fn unread_story_hashes(&self) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT story_hash FROM stories WHERE read = 0")?;
        let hashes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(hashes)
    }

    /// Record that the user opened a story, once.
    pub fn touch_story(&self, story_hash: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE stories SET last_read_timestamp = ?1
             WHERE story_hash = ?2 AND last_read_timestamp < 1",
            params![now_millis(), story_hash],
        )?;
        Ok(())
    }

    /// Drop the infrequent tag so the next infrequent river starts clean.
    pub fn clear_infrequent_session(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("UPDATE stories SET infrequent = 0 WHERE infrequent = 1", [])?;
        Ok(())
    }

    // Saved state

    /// Save or unsave a story, keeping the total saved count in step.
    ///
    /// Saving an already-saved story only replaces its tags.
    pub fn set_story_starred(
        &self,
        story_hash: &str,
        user_tags: Option<&[String]>,
        starred: bool,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current = tx
            .query_row(
                "SELECT starred FROM stories WHERE story_hash = ?1",
                params![story_hash],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        let Some(was_starred) = current else {
            warn!(story_hash, "Cannot change saved state of unknown story");
            return Ok(());
        };

        if was_starred && starred {
            if let Some(tags) = user_tags {
                tx.execute(
                    "UPDATE stories SET user_tags = ?1 WHERE story_hash = ?2",
                    params![to_json_list(tags), story_hash],
                )?;
                tx.commit()?;
            }
            return Ok(());
        }
        if was_starred == starred {
            return Ok(());
        }

        tx.execute(
            "UPDATE stories SET starred = ?1, starred_timestamp = ?2, user_tags = ?3
             WHERE story_hash = ?4",
            params![
                starred,
                if starred { now_millis() } else { 0 },
                to_json_list(user_tags.unwrap_or_default()),
                story_hash
            ],
        )?;
        tx.execute(
            "INSERT INTO starred_counts (tag, feed_id, count) VALUES (?1, '', MAX(?2, 0))
             ON CONFLICT(tag, feed_id) DO UPDATE SET count = MAX(count + ?2, 0)",
            params![TOTAL_STARRED, if starred { 1 } else { -1 }],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Set the saved flag on many stories without touching counts.
    pub fn mark_story_hashes_starred(&self, hashes: &[String], starred: bool) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE stories SET starred = ?1 WHERE story_hash = ?2 AND starred != ?1")?;
            for hash in hashes {
                changed += stmt.execute(params![starred, hash])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    pub fn starred_story_hashes(&self) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT story_hash FROM stories WHERE starred = 1")?;
        let hashes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(hashes)
    }

    // Shared state

    pub fn set_story_shared(&self, story_hash: &str, user_id: &str, shared: bool) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let current = tx
            .query_row(
                "SELECT shared_user_ids FROM stories WHERE story_hash = ?1",
                params![story_hash],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        let Some(current) = current else {
            warn!(story_hash, "Cannot change shared state of unknown story");
            return Ok(());
        };

        let mut ids = from_json_list(&current);
        ids.retain(|id| id != user_id);
        if shared {
            ids.push(user_id.to_string());
        }
        tx.execute(
            "UPDATE stories SET shared_user_ids = ?1, shared_timestamp = ?2 WHERE story_hash = ?3",
            params![to_json_list(&ids), if shared { now_millis() } else { 0 }, story_hash],
        )?;
        tx.commit()?;
        Ok(())
    }

    // Original text and images

    pub fn story_text(&self, story_hash: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let text = conn
            .query_row(
                "SELECT text FROM story_texts WHERE story_hash = ?1",
                params![story_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    pub fn put_story_text(&self, story_hash: &str, text: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO story_texts (story_hash, text) VALUES (?1, ?2)",
            params![story_hash, text],
        )?;
        Ok(())
    }

    /// Image URLs of every stored story; what the image cache must keep.
    pub fn all_story_images(&self) -> Result<HashSet<String>> {
        self.story_images("")
    }

    /// Image URLs of unread stories; what is still worth prefetching.
    pub fn unread_story_images(&self) -> Result<HashSet<String>> {
        self.story_images("WHERE read = 0")
    }

    pub fn all_story_thumbnails(&self) -> Result<HashSet<String>> {
        self.story_thumbnails("")
    }

    pub fn unread_story_thumbnails(&self) -> Result<HashSet<String>> {
        self.story_thumbnails("AND read = 0")
    }

    fn story_images(&self, filter: &str) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT image_urls FROM stories {}", filter))?;
        let mut urls = HashSet::new();
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            urls.extend(from_json_list(&row?));
        }
        Ok(urls)
    }

    fn story_thumbnails(&self, filter: &str) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT thumbnail_url FROM stories WHERE thumbnail_url IS NOT NULL {}",
            filter
        ))?;
        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(urls)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{Feed, FeedCounts};
    use crate::store::FeedFolderSnapshot;

    pub(crate) fn story(hash: &str, timestamp: i64) -> Story {
        let feed_id = crate::domain::story::infer_feed_id(hash).to_string();
        Story {
            story_hash: hash.into(),
            story_id: format!("id-{}", hash),
            feed_id,
            title: format!("Story {}", hash),
            timestamp,
            ..Default::default()
        }
    }

    pub(crate) fn seed_feeds(store: &SqliteStore, ids: &[&str]) {
        let snapshot = FeedFolderSnapshot {
            feeds: ids.iter().map(|id| Feed::new(*id, format!("Feed {}", id))).collect(),
            ..Default::default()
        };
        store.set_feeds_folders(&snapshot).unwrap();
    }

    fn page(stories: Vec<Story>) -> StoriesPage {
        StoriesPage {
            stories,
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_skips_empty_hash_and_fills_session() {
        let store = SqliteStore::in_memory().unwrap();
        let mut hidden = story("1:c", 3);
        hidden.intelligence.title = -1;
        store
            .insert_stories(
                &page(vec![story("1:a", 1), story("", 2), hidden]),
                StateFilter::Some,
                true,
            )
            .unwrap();

        assert!(store.story("1:a").unwrap().is_some());
        assert!(store.story("1:c").unwrap().is_some());
        assert_eq!(store.session_hashes().unwrap(), vec!["1:a".to_string()]);
    }

    #[test]
    fn test_insert_not_immediate_leaves_session_alone() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_stories(&page(vec![story("1:a", 1)]), StateFilter::All, false)
            .unwrap();
        assert!(store.session_hashes().unwrap().is_empty());
    }

    #[test]
    fn test_counted_read_state_adjusts_counts_once() {
        let store = SqliteStore::in_memory().unwrap();
        seed_feeds(&store, &["1"]);
        store
            .update_feed_counts(
                "1",
                FeedCounts {
                    positive: 0,
                    neutral: 2,
                    negative: 0,
                },
            )
            .unwrap();
        store
            .insert_stories(&page(vec![story("1:a", 1)]), StateFilter::Some, false)
            .unwrap();

        let impacted = store.set_story_read_state_counted("1:a", true).unwrap();
        assert_eq!(impacted, vec![FeedSet::single_feed("1")]);
        assert_eq!(store.feed("1").unwrap().unwrap().counts.neutral, 1);

        store.set_story_read_state_counted("1:a", true).unwrap();
        assert_eq!(store.feed("1").unwrap().unwrap().counts.neutral, 1);

        store.set_story_read_state_counted("1:a", false).unwrap();
        assert_eq!(store.feed("1").unwrap().unwrap().counts.neutral, 2);
    }

    #[test]
    fn test_counted_read_state_reports_social_feeds() {
        let store = SqliteStore::in_memory().unwrap();
        let mut s = story("1:a", 1);
        s.friend_user_ids = vec!["5".into()];
        s.social_user_id = Some("6".into());
        store.insert_stories(&page(vec![s]), StateFilter::Some, false).unwrap();

        let impacted = store.set_story_read_state_counted("1:a", true).unwrap();
        assert_eq!(impacted.len(), 2);
        assert_eq!(
            impacted[1].flat_feed_ids().into_iter().collect::<Vec<_>>(),
            vec!["social:5", "social:6"]
        );
    }

    #[test]
    fn test_negative_story_does_not_move_counts() {
        let store = SqliteStore::in_memory().unwrap();
        seed_feeds(&store, &["1"]);
        let mut s = story("1:a", 1);
        s.intelligence.author = -1;
        store.insert_stories(&page(vec![s]), StateFilter::All, false).unwrap();
        store.set_story_read_state_counted("1:a", true).unwrap();
        let counts = store.feed("1").unwrap().unwrap().counts;
        assert_eq!(counts, FeedCounts::default());
        assert!(store.story("1:a").unwrap().unwrap().read);
    }

    #[test]
    fn test_mark_stories_read_with_range() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_stories(
                &page(vec![story("1:a", 10), story("1:b", 20), story("2:c", 15)]),
                StateFilter::All,
                false,
            )
            .unwrap();

        let changed = store
            .mark_stories_read(&FeedSet::single_feed("1"), Some(15), None)
            .unwrap();
        assert_eq!(changed, 1);
        assert!(store.story("1:a").unwrap().unwrap().read);
        assert!(!store.story("1:b").unwrap().unwrap().read);

        store.mark_stories_read(&FeedSet::AllStories, None, None).unwrap();
        assert!(store.unread_story_hashes().unwrap().is_empty());
    }

    #[test]
    fn test_mark_stories_read_ignores_saved_sets() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_stories(&page(vec![story("1:a", 10)]), StateFilter::All, false)
            .unwrap();
        assert_eq!(store.mark_stories_read(&FeedSet::AllSaved, None, None).unwrap(), 0);
    }

    #[test]
    fn test_starring_tracks_total() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_stories(&page(vec![story("1:a", 1)]), StateFilter::All, false)
            .unwrap();

        store.set_story_starred("1:a", None, true).unwrap();
        store.set_story_starred("1:a", None, true).unwrap();
        assert_eq!(store.total_starred_count().unwrap(), 1);

        let tags = vec!["rust".to_string()];
        store.set_story_starred("1:a", Some(&tags), true).unwrap();
        assert_eq!(store.story("1:a").unwrap().unwrap().user_tags, tags);
        assert_eq!(store.total_starred_count().unwrap(), 1);

        store.set_story_starred("1:a", None, false).unwrap();
        assert_eq!(store.total_starred_count().unwrap(), 0);
        assert!(!store.story("1:a").unwrap().unwrap().starred);
    }

    #[test]
    fn test_update_story_preserves_local_state() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_stories(&page(vec![story("1:a", 1)]), StateFilter::All, false)
            .unwrap();
        store.set_story_read_state("1:a", true).unwrap();
        store.set_story_starred("1:a", None, true).unwrap();

        let mut fresh = story("1:a", 1);
        fresh.title = "Updated".into();
        let confirmed = StoriesPage {
            story: Some(fresh),
            ..Default::default()
        };
        store.update_story(&confirmed, StateFilter::All, false).unwrap();

        let stored = store.story("1:a").unwrap().unwrap();
        assert_eq!(stored.title, "Updated");
        assert!(stored.read);
        assert!(stored.starred);
    }

    #[test]
    fn test_set_story_shared_edits_user_list() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_stories(&page(vec![story("1:a", 1)]), StateFilter::All, false)
            .unwrap();
        store.set_story_shared("1:a", "me", true).unwrap();
        store.set_story_shared("1:a", "me", true).unwrap();
        assert_eq!(store.story("1:a").unwrap().unwrap().shared_user_ids, vec!["me"]);
        store.set_story_shared("1:a", "me", false).unwrap();
        assert!(store.story("1:a").unwrap().unwrap().shared_user_ids.is_empty());
    }

    #[test]
    fn test_touch_story_only_once() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_stories(&page(vec![story("1:a", 1)]), StateFilter::All, false)
            .unwrap();
        store.touch_story("1:a").unwrap();
        let first = store.story("1:a").unwrap().unwrap().last_read_timestamp;
        assert!(first > 0);
        store.touch_story("1:a").unwrap();
        assert_eq!(store.story("1:a").unwrap().unwrap().last_read_timestamp, first);
    }

    #[test]
    fn test_image_sets() {
        let store = SqliteStore::in_memory().unwrap();
        let mut s = story("1:a", 1);
        s.image_urls = vec!["http://x/1.png".into(), "http://x/2.png".into()];
        store.insert_stories(&page(vec![s]), StateFilter::All, false).unwrap();
        assert_eq!(store.all_story_images().unwrap().len(), 2);
        assert_eq!(
            store.all_story_thumbnails().unwrap(),
            HashSet::from(["http://x/1.png".to_string()])
        );
        assert_eq!(store.unread_story_images().unwrap().len(), 2);

        store.set_story_read_state("1:a", true).unwrap();
        assert!(store.unread_story_images().unwrap().is_empty());
        assert!(store.unread_story_thumbnails().unwrap().is_empty());
        assert_eq!(store.all_story_images().unwrap().len(), 2);
    }
}
