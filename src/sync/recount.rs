use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::SyncEngine;
use crate::app::Result;
use crate::domain::feedset::SOCIAL_FEED_PREFIX;
use crate::domain::{FeedSet, StateFilter, UpdateFlags};

impl SyncEngine {
    /// Bring unread counters of touched feed sets back in line.
    ///
    /// Runs only when the host asked for a flush. Online, fresh counts come
    /// from the server; offline, they are recomputed from local stories.
    pub(crate) async fn check_recounts(&self) -> Result<()> {
        if !self.state().flush_recounts {
            return Ok(());
        }

        let outcome = self.run_recounts().await;

        let was_running = {
            let mut state = self.state();
            state.flush_recounts = false;
            std::mem::replace(&mut state.recounts_running, false)
        };
        if was_running {
            self.send_update(UpdateFlags::METADATA | UpdateFlags::STATUS);
        }
        outcome
    }

    async fn run_recounts(&self) -> Result<()> {
        let candidates: Vec<FeedSet> = self.state().recount_candidates.iter().cloned().collect();
        if candidates.is_empty() {
            return Ok(());
        }

        self.state().recounts_running = true;
        self.send_update(UpdateFlags::STATUS);

        // Only sets whose stored counter disagrees with what is held locally
        // need the server, plus those last recounted offline.
        let (owed, checked): (Vec<FeedSet>, Vec<FeedSet>) = {
            let state = self.state();
            candidates
                .iter()
                .cloned()
                .partition(|fs| state.local_recounts.contains(fs))
        };
        let dirty: Vec<FeedSet> = self
            .store
            .call(move |s| {
                let mut dirty = owed;
                for fs in checked {
                    let stored = s.unread_count(&fs, StateFilter::Some)?;
                    let local = s.local_unread_count(&fs, StateFilter::Some)?;
                    if stored != local || s.is_feed_set_fetch_pending(&fs)? {
                        dirty.push(fs);
                    }
                }
                Ok(dirty)
            })
            .await?;

        if dirty.is_empty() {
            debug!("Recount candidates all agree with local data");
            self.state().recount_candidates.clear();
            return Ok(());
        }

        if !self.state().online {
            info!("Offline, recounting {} feed sets locally", candidates.len());
            let local = candidates.clone();
            self.store
                .call(move |s| {
                    for fs in &local {
                        s.update_local_feed_counts(fs)?;
                    }
                    Ok(())
                })
                .await?;
            // Candidates stay so the server recounts them once back online.
            self.state().local_recounts.extend(candidates);
            return Ok(());
        }

        if self.stop_sync() {
            return Ok(());
        }
        // Queued actions would make the server's counts stale; try again
        // once they are through.
        let untried = self.store.call(|s| s.untried_action_count()).await?;
        if untried > 0 {
            debug!("{} outstanding actions, deferring recount", untried);
            return Ok(());
        }

        let ids: BTreeSet<String> = candidates.iter().flat_map(|fs| fs.flat_feed_ids()).collect();
        info!("Recounting {} feeds", ids.len());
        let response = match self.api.feed_unread_counts(&ids).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Recount failed: {}", e);
                return Ok(());
            }
        };

        self.store
            .call(move |s| {
                for (feed_id, counts) in response.feeds {
                    s.update_feed_counts(&feed_id, counts)?;
                }
                for (key, counts) in response.social_feeds {
                    let user_id = key.strip_prefix(SOCIAL_FEED_PREFIX).unwrap_or(&key);
                    s.update_social_feed_counts(user_id, counts)?;
                }
                Ok(())
            })
            .await?;

        let mut state = self.state();
        for fs in &candidates {
            state.local_recounts.remove(fs);
        }
        state.recount_candidates.clear();
        // Counts moved under these sets, so their pages are no longer trusted.
        for fs in &dirty {
            state.rewind(fs);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::api::UnreadCountsResponse;
    use crate::domain::{FeedCounts, StoriesPage};
    use crate::store::stories::tests::{seed_feeds, story};
    use crate::sync::testing::{engine_with, MockApi};

    fn seed_unread(engine: &SyncEngine, feed_id: &str) {
        let store = engine.store().blocking();
        seed_feeds(store, &[feed_id]);
        let page = StoriesPage {
            stories: vec![story(&format!("{}:a", feed_id), 1)],
            ..Default::default()
        };
        store.insert_stories(&page, StateFilter::Some, false).unwrap();
    }

    #[tokio::test]
    async fn test_online_recount_takes_server_counts_and_rewinds() {
        let api = MockApi::default();
        let counts = FeedCounts {
            positive: 2,
            neutral: 5,
            negative: 1,
        };
        api.set_unread_counts(UnreadCountsResponse {
            feeds: BTreeMap::from([("5".to_string(), counts)]),
            social_feeds: BTreeMap::new(),
        });
        let engine = engine_with(api.clone());
        seed_unread(&engine, "5");

        let fs = FeedSet::single_feed("5");
        {
            let mut state = engine.state();
            state.add_recount_candidate(fs.clone());
            state.stories_seen.insert(fs.clone(), 40);
            state.pages_seen.insert(fs.clone(), 2);
        }
        engine.flush_recounts();
        engine.check_recounts().await.unwrap();

        let feed = engine.store().blocking().feed("5").unwrap().unwrap();
        assert_eq!(feed.counts, counts);
        let state = engine.state();
        assert_eq!(state.stories_seen[&fs], 0);
        assert_eq!(state.pages_seen[&fs], 0);
        assert!(state.recount_candidates.is_empty());
        assert!(!state.flush_recounts);
        assert!(!state.recounts_running);
    }

    #[tokio::test]
    async fn test_offline_recount_uses_local_stories() {
        let api = MockApi::default();
        let engine = engine_with(api.clone());
        seed_unread(&engine, "5");
        engine.set_online(false);

        let fs = FeedSet::single_feed("5");
        engine.state().add_recount_candidate(fs.clone());
        engine.flush_recounts();
        engine.check_recounts().await.unwrap();

        let store = engine.store().blocking();
        assert_eq!(store.unread_count(&fs, StateFilter::Some).unwrap(), 1);
        assert_eq!(api.calls("feed_unread_counts"), 0);
        assert!(engine.state().recount_candidates.contains(&fs));
    }

    #[tokio::test]
    async fn test_offline_recount_is_confirmed_by_server_when_back_online() {
        let api = MockApi::default();
        let counts = FeedCounts {
            positive: 0,
            neutral: 3,
            negative: 0,
        };
        api.set_unread_counts(UnreadCountsResponse {
            feeds: BTreeMap::from([("5".to_string(), counts)]),
            social_feeds: BTreeMap::new(),
        });
        let engine = engine_with(api.clone());
        seed_unread(&engine, "5");
        let fs = FeedSet::single_feed("5");

        engine.set_online(false);
        engine.state().add_recount_candidate(fs.clone());
        engine.flush_recounts();
        engine.check_recounts().await.unwrap();
        assert_eq!(api.calls("feed_unread_counts"), 0);

        // Local counts now agree with local stories, yet the server is asked.
        engine.set_online(true);
        engine.flush_recounts();
        engine.check_recounts().await.unwrap();

        assert_eq!(api.calls("feed_unread_counts"), 1);
        let feed = engine.store().blocking().feed("5").unwrap().unwrap();
        assert_eq!(feed.counts, counts);
        let state = engine.state();
        assert!(state.recount_candidates.is_empty());
        assert!(state.local_recounts.is_empty());
    }

    #[tokio::test]
    async fn test_recount_needs_flush() {
        let api = MockApi::default();
        let engine = engine_with(api.clone());
        seed_unread(&engine, "5");
        engine.state().add_recount_candidate(FeedSet::single_feed("5"));

        engine.check_recounts().await.unwrap();
        assert_eq!(api.calls("feed_unread_counts"), 0);
        assert_eq!(engine.state().recount_candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_recount_waits_for_queued_actions() {
        let api = MockApi::default();
        let engine = engine_with(api.clone());
        seed_unread(&engine, "5");
        engine
            .store()
            .blocking()
            .enqueue_action(&crate::domain::ReadingAction::mark_story_read("5:a"))
            .unwrap();
        engine.state().add_recount_candidate(FeedSet::single_feed("5"));

        engine.flush_recounts();
        engine.check_recounts().await.unwrap();
        assert_eq!(api.calls("feed_unread_counts"), 0);
        assert_eq!(engine.state().recount_candidates.len(), 1);
    }
}
