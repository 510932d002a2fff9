use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::service::SubService;
use super::SyncEngine;
use crate::app::Result;
use crate::domain::{ReadingAction, UpdateFlags};

/// Makes local saved flags match the server's list of saved stories, and
/// fetches saved stories not held locally when offline reading is on.
pub struct StarredService;

#[async_trait]
impl SubService for StarredService {
    fn name(&self) -> &'static str {
        "StarredService"
    }

    async fn exec(&self, engine: &Arc<SyncEngine>) -> Result<()> {
        if engine.stop_sync() || engine.backoff() {
            return Ok(());
        }
        let remote: HashSet<String> = match engine.api.starred_story_hashes().await {
            Ok(hashes) => hashes.into_iter().collect(),
            Err(e) => {
                warn!("Saved story hash fetch failed: {}", e);
                return Ok(());
            }
        };

        let missing: Vec<String> = engine
            .store
            .call(move |s| {
                // A queued save or unsave has not reached the server yet, so
                // the local flag wins for that story.
                let pending: HashSet<String> = s
                    .actions()?
                    .iter()
                    .filter_map(|record| record.decode().ok())
                    .filter_map(|queued| match queued.action {
                        ReadingAction::SaveStory { story_hash, .. }
                        | ReadingAction::UnsaveStory { story_hash } => Some(story_hash),
                        _ => None,
                    })
                    .collect();

                let saved: Vec<String> = remote
                    .iter()
                    .filter(|h| !pending.contains(*h))
                    .cloned()
                    .collect();
                let unsaved: Vec<String> = s
                    .starred_story_hashes()?
                    .into_iter()
                    .filter(|h| !remote.contains(h) && !pending.contains(h))
                    .collect();
                let cleared = s.mark_story_hashes_starred(&unsaved, false)?;
                let marked = s.mark_story_hashes_starred(&saved, true)?;
                debug!(cleared, marked, skipped = pending.len(), "Reconciled saved flags");

                let held: HashSet<String> = s
                    .stories_by_hashes(&saved)?
                    .into_iter()
                    .map(|story| story.story_hash)
                    .collect();
                Ok(saved.into_iter().filter(|h| !held.contains(h)).collect())
            })
            .await?;
        engine.send_update(UpdateFlags::METADATA | UpdateFlags::STORY);

        if missing.is_empty() || !engine.config.reading.offline_enabled {
            return Ok(());
        }
        info!("Fetching {} saved stories missing locally", missing.len());

        let batch_size = engine.config.sync.unread_fetch_batch_size.max(1);
        let state_filter = engine.config.reading.state_filter;
        for batch in missing.chunks(batch_size) {
            if engine.stop_sync() {
                break;
            }
            let page = match engine.api.stories_by_hash(batch).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Saved story fetch failed: {}", e);
                    break;
                }
            };
            engine
                .store
                .call(move |s| s.insert_stories(&page, state_filter, false))
                .await?;
        }
        engine.send_update(UpdateFlags::METADATA);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StateFilter, StoriesPage};
    use crate::store::stories::tests::story;
    use crate::sync::testing::{engine_with, MockApi};

    #[tokio::test]
    async fn test_saved_flags_follow_server() {
        let api = MockApi::default();
        let engine = engine_with(api.clone());
        let store = engine.store().blocking();
        let mut stale = story("1:stale", 1);
        stale.starred = true;
        let page = StoriesPage {
            stories: vec![stale, story("1:new", 2)],
            ..Default::default()
        };
        store.insert_stories(&page, StateFilter::Some, false).unwrap();

        let mut remote_only = story("2:remote", 3);
        remote_only.starred = true;
        api.add_story(remote_only);
        api.set_starred_hashes(vec!["1:new".into(), "2:remote".into()]);

        StarredService.exec(&engine).await.unwrap();

        assert!(!store.story("1:stale").unwrap().unwrap().starred);
        assert!(store.story("1:new").unwrap().unwrap().starred);
        assert!(store.story("2:remote").unwrap().unwrap().starred);
        assert_eq!(api.calls("stories_by_hash"), 1);
    }

    #[tokio::test]
    async fn test_queued_save_and_unsave_keep_local_flags() {
        let api = MockApi::default();
        let engine = engine_with(api.clone());
        let store = engine.store().blocking();
        let mut unsaving = story("1:unsaving", 2);
        unsaving.starred = true;
        let page = StoriesPage {
            stories: vec![story("1:saving", 1), unsaving],
            ..Default::default()
        };
        store.insert_stories(&page, StateFilter::Some, false).unwrap();

        engine
            .perform_action(ReadingAction::save_story("1:saving", vec![]))
            .await
            .unwrap();
        engine
            .perform_action(ReadingAction::unsave_story("1:unsaving"))
            .await
            .unwrap();
        // The server has not seen either action yet.
        api.set_starred_hashes(vec!["1:unsaving".into()]);

        StarredService.exec(&engine).await.unwrap();

        assert!(store.story("1:saving").unwrap().unwrap().starred);
        assert!(!store.story("1:unsaving").unwrap().unwrap().starred);
        assert_eq!(api.calls("stories_by_hash"), 0);
    }

    #[tokio::test]
    async fn test_offline_disabled_skips_fetch() {
        let api = MockApi::default();
        let mut config = crate::config::Config::default();
        config.reading.offline_enabled = false;
        let engine = crate::sync::testing::engine_with_config(api.clone(), config);
        api.set_starred_hashes(vec!["2:remote".into()]);

        StarredService.exec(&engine).await.unwrap();
        assert_eq!(api.calls("stories_by_hash"), 0);
    }
}
