use std::sync::Arc;

use tracing::{debug, info, warn};

use super::SyncEngine;
use crate::app::{ApiError, Result};
use crate::domain::{FeedSet, StoriesPage, UpdateFlags};
use crate::store::now_millis;

impl SyncEngine {
    /// Page in stories for the feed set the UI is waiting on.
    ///
    /// Pages are fetched until the caller's target is met, the server runs
    /// dry, or something more urgent comes up. The request is cleared only
    /// when it was fully served.
    pub(crate) async fn sync_pending_feed_stories(self: &Arc<Self>) -> Result<()> {
        if let Some(fs) = self.state().take_reset() {
            info!(feed_set = %fs, "Reset fetch state");
        }
        {
            // A page may have landed between the caller's reset and now;
            // forgetting the session makes the next prepare rebuild it.
            let _session = self.session_lock.lock().await;
            self.store.call(|s| s.set_session_feed_set(None)).await?;
        }

        let Some(fs) = self.state().pending_feed.clone() else {
            debug!("No feed set to sync");
            return Ok(());
        };

        let outcome = self.fetch_pending_pages(&fs).await;

        let finished = matches!(outcome, Ok(true));
        {
            let mut state = self.state();
            state.story_sync_running = false;
            if finished && state.pending_feed.as_ref() == Some(&fs) {
                state.clear_pending_story_request();
            }
        }
        self.send_update(UpdateFlags::STATUS);
        outcome.map(|_| ())
    }

    /// Returns whether the request for `fs` is now satisfied.
    async fn fetch_pending_pages(self: &Arc<Self>, fs: &FeedSet) -> Result<bool> {
        self.prepare_reading_session(fs).await?;

        {
            let mut state = self.state();
            state.last_feed_set = Some(fs.clone());
            if state.exhausted.contains(fs) {
                info!(feed_set = %fs, "No more stories for feed set");
                return Ok(true);
            }
            if !state.pages_seen.contains_key(fs) {
                state.pages_seen.insert(fs.clone(), 0);
                state.stories_seen.insert(fs.clone(), 0);
                let now = now_millis();
                state.read_stamp = now;
                state.shared_stamp = now;
            }
            state.story_sync_running = true;
        }
        self.send_update(UpdateFlags::STATUS);

        let prefs = &self.config.reading;
        loop {
            let page_number = {
                let mut state = self.state();
                if state.stop_sync() || state.flush_recounts {
                    return Ok(false);
                }
                // The active view changed under us.
                if state.pending_feed.as_ref() != Some(fs) {
                    return Ok(false);
                }
                let seen = state.stories_seen.get(fs).copied().unwrap_or(0);
                if seen >= state.pending_target {
                    return Ok(true);
                }
                state.pages_seen.get(fs).copied().unwrap_or(0) + 1
            };

            let mut page = match self
                .api
                .stories(fs, page_number, prefs.story_order, prefs.read_filter)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(feed_set = %fs, page = page_number, "Story fetch failed: {}", e);
                    if matches!(e, ApiError::Protocol(_)) {
                        self.note_hard_api_failure();
                    }
                    return Ok(false);
                }
            };
            if self.state().pending_feed.as_ref() != Some(fs) {
                return Ok(false);
            }

            self.apply_listing_fixups(fs, &mut page);
            let count = page.stories.len();
            debug!(feed_set = %fs, page = page_number, "Got {} stories", count);

            let page = {
                let _session = self.session_lock.lock().await;
                let state_filter = prefs.state_filter;
                let saved_tag = matches!(fs.base(), FeedSet::SavedTag { .. });
                self.store
                    .call(move |s| {
                        if saved_tag {
                            s.fix_missing_story_feeds(&page.stories)?;
                        }
                        s.insert_stories(&page, state_filter, true)?;
                        Ok(page)
                    })
                    .await?
            };
            // Re-apply recent actions this page may have overwritten.
            self.finish_actions().await?;
            self.send_update(UpdateFlags::STORY | UpdateFlags::STATUS);

            self.prefetch_original_text(&page).await?;
            self.prefetch_images(&page);

            {
                let mut state = self.state();
                state.pages_seen.insert(fs.clone(), page_number);
                *state.stories_seen.entry(fs.clone()).or_insert(0) += count;
                if count == 0 {
                    state.exhausted.insert(fs.clone());
                    return Ok(true);
                }
            }

            // Paging must not hold up queued actions.
            let untried = self.store.call(|s| s.untried_action_count()).await?;
            if untried > 0 {
                return Ok(false);
            }
        }
    }

    /// Patch up fields some listings leave out or get wrong.
    fn apply_listing_fixups(&self, fs: &FeedSet, page: &mut StoriesPage) {
        let mut state = self.state();
        match fs.base() {
            // Read and global-shared listings come in the right order but
            // without the key they sort by, so hand out falling stamps.
            FeedSet::AllRead => {
                for story in &mut page.stories {
                    state.read_stamp -= 1;
                    story.last_read_timestamp = state.read_stamp;
                }
            }
            FeedSet::GlobalShared => {
                for story in &mut page.stories {
                    state.shared_stamp -= 1;
                    story.shared_timestamp = state.shared_stamp;
                }
            }
            FeedSet::Infrequent => {
                for story in &mut page.stories {
                    story.infrequent = true;
                }
            }
            _ => {}
        }

        // These listings report feed intel one point too high.
        if matches!(fs.base(), FeedSet::AllSaved | FeedSet::AllRead) {
            for story in &mut page.stories {
                story.intelligence.feed -= 1;
            }
        }

        if let Some(query) = fs.search_query() {
            for story in &mut page.stories {
                story.search_hit = Some(query.to_string());
            }
        }
    }
}
