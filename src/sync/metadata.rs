use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::SyncEngine;
use crate::api::FeedFolderResponse;
use crate::app::{ApiError, Result};
use crate::domain::feed::{dedupe_folders, prune_folder_tree};
use crate::domain::{Feed, StarredCount, SyncEvent, UpdateFlags};
use crate::store::{keys, now_millis, FeedFolderSnapshot};

/// What a feed/folder listing turns into once orphans are dropped.
pub(crate) struct Reconciled {
    pub snapshot: FeedFolderSnapshot,
    pub orphan_feed_ids: HashSet<String>,
    pub disabled_feed_ids: HashSet<String>,
}

/// Drop feeds that no folder lists and folder entries with no feed, then
/// dedupe and prune the folder tree.
pub(crate) fn reconcile_feeds_folders(response: FeedFolderResponse) -> Reconciled {
    let folder_feed_ids: HashSet<String> = response
        .folders
        .iter()
        .flat_map(|f| f.feed_ids.iter().cloned())
        .collect();
    let listed_feed_ids: HashSet<String> =
        response.feeds.iter().map(|f| f.feed_id.clone()).collect();

    let mut orphan_feed_ids = HashSet::new();
    let mut disabled_feed_ids = HashSet::new();
    let mut feeds = Vec::with_capacity(response.feeds.len() + 1);
    for feed in response.feeds {
        if !folder_feed_ids.contains(&feed.feed_id) {
            warn!(feed_id = %feed.feed_id, "Ignoring orphan feed (in feeds but not folders)");
            orphan_feed_ids.insert(feed.feed_id);
            continue;
        }
        if !feed.active {
            // Hidden feeds keep their row but their unreads are not fetched.
            disabled_feed_ids.insert(feed.feed_id.clone());
        }
        feeds.push(feed);
    }
    feeds.push(Feed::zero());

    for id in &folder_feed_ids {
        if !listed_feed_ids.contains(id) {
            warn!(feed_id = %id, "Ignoring orphan feed (in folders but not feeds)");
            orphan_feed_ids.insert(id.clone());
        }
    }

    let mut folders = dedupe_folders(response.folders);
    for folder in &mut folders {
        folder.remove_orphan_feed_ids(&orphan_feed_ids);
    }
    prune_folder_tree(&mut folders);

    let mut starred_counts = response.starred_counts;
    starred_counts.push(StarredCount::total(response.starred_count));

    Reconciled {
        snapshot: FeedFolderSnapshot {
            feeds,
            social_feeds: response.social_feeds,
            folders,
            starred_counts,
            saved_searches: response.saved_searches,
        },
        orphan_feed_ids,
        disabled_feed_ids,
    }
}

impl SyncEngine {
    /// Refresh feeds, folders, social feeds and saved counts.
    ///
    /// The refresh also resets server-side pagination, so every local
    /// pagination counter is dropped with it.
    pub(crate) async fn sync_metadata(self: &Arc<Self>) -> Result<()> {
        if self.stop_sync() || self.backoff() {
            return Ok(());
        }
        let untried = self.store.call(|s| s.untried_action_count()).await?;
        if untried > 0 {
            info!("{} outstanding actions, yielding metadata sync", untried);
            return Ok(());
        }

        let last_sync = self.store.call(|s| s.sync_timestamp(keys::LAST_SYNC)).await?;
        let interval = self.config.sync.auto_sync_interval().as_millis() as i64;
        let forced = std::mem::take(&mut self.state().do_feeds_folders);
        if !forced && now_millis() - last_sync < interval {
            return Ok(());
        }
        self.store
            .call(|s| s.set_sync_timestamp(keys::LAST_SYNC, now_millis()))
            .await?;

        info!("Ready to sync feed list");
        {
            let mut state = self.state();
            state.ffsync_running = true;
            state.orphan_feed_ids.clear();
            state.disabled_feed_ids.clear();
        }
        self.send_update(UpdateFlags::STATUS);

        let outcome = self.refresh_feeds_folders().await;

        self.state().ffsync_running = false;
        self.send_update(UpdateFlags::METADATA | UpdateFlags::STATUS);
        outcome
    }

    async fn refresh_feeds_folders(self: &Arc<Self>) -> Result<()> {
        let response = match self.api.feeds_and_folders().await {
            Ok(response) => response,
            Err(ApiError::Unauthenticated) => return self.note_auth_failure().await,
            Err(e) => {
                warn!("Feed/folder sync failed: {}", e);
                self.note_hard_api_failure();
                return Ok(());
            }
        };
        self.state().auth_fails = 0;

        if self.state().halt_now {
            return Ok(());
        }

        {
            let mut state = self.state();
            state.clear_pagination();
            state.recount_candidates.clear();
            state.is_premium = response.is_premium;
            state.is_archive = response.is_archive;
            state.is_staff = response.is_staff;
        }
        self.unreads.service().clear();

        let reconciled = reconcile_feeds_folders(response);
        let feed_count = reconciled.snapshot.feeds.len();
        let folder_count = reconciled.snapshot.folders.len();
        {
            let mut state = self.state();
            state.orphan_feed_ids = reconciled.orphan_feed_ids;
            state.disabled_feed_ids = reconciled.disabled_feed_ids;
        }

        let snapshot = reconciled.snapshot;
        self.store.call(move |s| s.set_feeds_folders(&snapshot)).await?;
        info!("Got feed list: {} feeds, {} folders", feed_count, folder_count);

        self.unreads.service().do_metadata();
        self.unreads.start(self);
        self.cleanup.start(self);
        self.starred.start(self);
        Ok(())
    }

    /// The server ignored or rejected the session cookie.
    async fn note_auth_failure(&self) -> Result<()> {
        let fails = {
            let mut state = self.state();
            state.auth_fails += 1;
            state.do_feeds_folders = true;
            state.auth_fails
        };
        warn!(fails, "Server ignored or rejected auth cookie");

        if fails >= self.config.sync.max_auth_failures {
            warn!("Too many auth failures, logging out");
            self.clear_state();
            self.state().do_feeds_folders = true;
            self.store.call(|s| s.wipe()).await?;
            self.send_event(SyncEvent::LoggedOut);
            self.send_update(UpdateFlags::REBUILD | UpdateFlags::METADATA);
        } else {
            debug!("Retrying feed/folder sync on the next pass");
        }
        Ok(())
    }
}
