use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::SyncEngine;
use crate::api::ActionPayload;
use crate::app::{ApiError, ApiResult, Result};
use crate::domain::{ActionRecord, FeedSet, ReadingAction, UpdateFlags};
use crate::store::SqliteStore;

/// Outcome of applying an action to the local store.
#[derive(Debug, Default)]
pub(crate) struct LocalEffect {
    pub impact: UpdateFlags,
    /// Feed sets whose counters moved and should be checked against the server.
    pub recount: Vec<FeedSet>,
}

/// Mirror an action's remote effect in the local store.
///
/// A follow-up application runs after the server confirmed the action and
/// only corrects state: counters are left alone and placeholders are not
/// created again. Every branch is idempotent.
pub(crate) fn apply_local(
    store: &SqliteStore,
    action: &ReadingAction,
    user_id: Option<&str>,
    followup: bool,
) -> Result<LocalEffect> {
    let mut effect = LocalEffect::default();
    match action {
        ReadingAction::MarkStoryRead { story_hash } => {
            if followup {
                store.set_story_read_state(story_hash, true)?;
            } else {
                effect.recount = store.set_story_read_state_counted(story_hash, true)?;
            }
            effect.impact = UpdateFlags::METADATA | UpdateFlags::STORY;
        }
        ReadingAction::MarkFeedRead {
            feed_set,
            older_than,
            newer_than,
        } => {
            let marked = store.mark_stories_read(feed_set, *older_than, *newer_than)?;
            debug!(feed_set = %feed_set, marked, "Marked feed set read");
            store.update_local_feed_counts(feed_set)?;
            effect.impact = UpdateFlags::METADATA | UpdateFlags::STORY;
        }
        ReadingAction::MarkStoryUnread { story_hash } => {
            if followup {
                store.set_story_read_state(story_hash, false)?;
            } else {
                effect.recount = store.set_story_read_state_counted(story_hash, false)?;
            }
            effect.impact = UpdateFlags::METADATA;
        }
        ReadingAction::SaveStory {
            story_hash,
            user_tags,
        } => {
            store.set_story_starred(story_hash, Some(user_tags), true)?;
            effect.impact = UpdateFlags::METADATA;
        }
        ReadingAction::UnsaveStory { story_hash } => {
            store.set_story_starred(story_hash, None, false)?;
            effect.impact = UpdateFlags::METADATA;
        }
        ReadingAction::ShareStory {
            story_hash,
            story_id,
            comment,
            ..
        } => {
            if !followup {
                match user_id {
                    Some(uid) => {
                        store.set_story_shared(story_hash, uid, true)?;
                        store.insert_comment_placeholder(story_id, uid, comment.as_deref())?;
                    }
                    None => warn!(story_hash, "No user id configured, skipping local share"),
                }
            }
            effect.impact = UpdateFlags::SOCIAL | UpdateFlags::STORY;
        }
        ReadingAction::UnshareStory {
            story_hash,
            story_id,
            ..
        } => {
            if let Some(uid) = user_id {
                store.set_story_shared(story_hash, uid, false)?;
                store.clear_self_comments(story_id, uid)?;
            }
            effect.impact = UpdateFlags::SOCIAL | UpdateFlags::STORY;
        }
        ReadingAction::LikeComment {
            story_id,
            comment_user_id,
            ..
        } => {
            if let Some(uid) = user_id {
                store.set_comment_liked(story_id, comment_user_id, uid, true)?;
            }
            effect.impact = UpdateFlags::SOCIAL;
        }
        ReadingAction::UnlikeComment {
            story_id,
            comment_user_id,
            ..
        } => {
            if let Some(uid) = user_id {
                store.set_comment_liked(story_id, comment_user_id, uid, false)?;
            }
            effect.impact = UpdateFlags::SOCIAL;
        }
        ReadingAction::ReplyToComment {
            story_id,
            comment_user_id,
            text,
            ..
        } => {
            if !followup {
                match user_id {
                    Some(uid) => {
                        store.insert_reply_placeholder(story_id, uid, comment_user_id, text)?
                    }
                    None => warn!(story_id, "No user id configured, skipping local reply"),
                }
            }
            effect.impact = UpdateFlags::SOCIAL;
        }
        ReadingAction::EditReply { reply_id, text, .. } => {
            store.edit_reply(reply_id, text)?;
            effect.impact = UpdateFlags::SOCIAL;
        }
        ReadingAction::DeleteReply { reply_id, .. } => {
            store.delete_reply(reply_id)?;
            effect.impact = UpdateFlags::SOCIAL;
        }
        ReadingAction::MuteFeeds {
            modified_feed_ids, ..
        } => {
            store.set_feeds_active(modified_feed_ids, false)?;
            effect.impact = UpdateFlags::METADATA;
        }
        ReadingAction::UnmuteFeeds {
            modified_feed_ids, ..
        } => {
            store.set_feeds_active(modified_feed_ids, true)?;
            effect.impact = UpdateFlags::METADATA;
        }
        ReadingAction::SetNotify {
            feed_id,
            types,
            filter,
        } => {
            store.set_feed_notifications(feed_id, types, filter.as_deref())?;
            effect.impact = UpdateFlags::METADATA;
        }
        ReadingAction::InstaFetch { feed_id } => {
            if !followup {
                store.set_feed_fetch_pending(feed_id)?;
            }
            effect.impact = UpdateFlags::METADATA;
        }
        ReadingAction::UpdateIntel {
            feed_id,
            classifier,
            ..
        } => {
            let mut classifier = classifier.clone();
            classifier.feed_id = feed_id.clone();
            store.clear_classifiers_for_feed(feed_id)?;
            store.insert_classifier(&classifier)?;
            effect.impact = UpdateFlags::INTEL;
        }
        ReadingAction::RenameFeed { feed_id, new_name } => {
            store.rename_feed(feed_id, new_name)?;
            effect.impact = UpdateFlags::METADATA;
        }
    }
    Ok(effect)
}

impl SyncEngine {
    /// Record a user action: queue it for the server and apply it locally
    /// right away. Returns what changed.
    pub async fn perform_action(&self, action: ReadingAction) -> Result<UpdateFlags> {
        let user_id = self.config.api.user_id.clone();
        let effect = self
            .store
            .call(move |s| {
                s.enqueue_action(&action)?;
                apply_local(s, &action, user_id.as_deref(), false)
            })
            .await?;

        {
            let mut state = self.state();
            for fs in effect.recount {
                state.add_recount_candidate(fs);
            }
        }
        self.send_update(effect.impact);
        Ok(effect.impact)
    }

    /// Send queued actions to the server, oldest first.
    pub(crate) async fn sync_actions(self: &Arc<Self>) -> Result<()> {
        if self.stop_sync() || self.backoff() {
            return Ok(());
        }

        let records = self.store.call(|s| s.actions()).await?;
        if records.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.state();
            state.last_action_count = records.len();
            state.actions_running = true;
        }

        let outcome = self.replay_actions(records).await;

        self.state().actions_running = false;
        self.send_update(UpdateFlags::STATUS);
        outcome
    }

    async fn replay_actions(&self, records: Vec<ActionRecord>) -> Result<()> {
        debug!("Syncing {} actions", records.len());
        for record in records {
            if self.stop_sync() {
                return Ok(());
            }
            self.send_update(UpdateFlags::STATUS);
            let id = record.id;

            let queued = match record.decode() {
                Ok(queued) => queued,
                Err(e) => {
                    error!(id, "Dropping undecodable action: {}", e);
                    self.store.call(move |s| s.clear_action(id)).await?;
                    continue;
                }
            };

            // A retried action must not hold up stories the UI is waiting on.
            if queued.tried > 0 && self.state().pending_feed.is_some() {
                continue;
            }

            debug!(id, kind = queued.action.kind(), tried = queued.tried, "Attempting action");
            match self.attempt_remote(&queued.action).await {
                Ok(impact) => {
                    self.store.call(move |s| s.clear_action(id)).await?;
                    if !queued.action.skips_followup() {
                        self.state().followups.push(queued.action);
                    }
                    self.send_update(impact);
                }
                Err(ApiError::Protocol(msg)) => {
                    info!(id, "Holding action after network or server error: {}", msg);
                    self.store.call(move |s| s.increment_action_tried(id)).await?;
                    self.note_hard_api_failure();
                    continue;
                }
                Err(ApiError::Unauthenticated) => {
                    info!(id, "Holding action, session not authenticated");
                    self.store.call(move |s| s.increment_action_tried(id)).await?;
                    self.note_hard_api_failure();
                    continue;
                }
                Err(ApiError::Declared(message)) => {
                    info!(id, "Discarding action with server message: {}", message);
                    self.store.call(move |s| s.clear_action(id)).await?;
                    self.send_event(crate::domain::SyncEvent::Error(message));
                }
                Err(ApiError::Rejected(reason)) => {
                    error!(id, "Discarding action with client-side error: {}", reason);
                    self.store.call(move |s| s.clear_action(id)).await?;
                }
            }

            let mut state = self.state();
            state.last_action_count = state.last_action_count.saturating_sub(1);
        }
        Ok(())
    }

    /// Run one action against the server and fold its response into the
    /// store. Returns the impact to broadcast.
    pub(crate) async fn attempt_remote(&self, action: &ReadingAction) -> ApiResult<UpdateFlags> {
        let payload = self.api.execute_action(action).await?;

        {
            let mut state = self.state();
            match action {
                ReadingAction::InstaFetch { feed_id } => {
                    state.add_recount_candidate(FeedSet::single_feed(feed_id));
                    state.flush_recounts = true;
                }
                ReadingAction::UpdateIntel { feed_set, .. } => {
                    state.reset_feed = Some(feed_set.clone());
                    state.add_recount_candidate(feed_set.clone());
                }
                _ => {}
            }
        }

        let mut impact = UpdateFlags::empty();
        let state_filter = self.config.reading.state_filter;
        let merged = match payload {
            ActionPayload::None => Ok(()),
            ActionPayload::Story(page) => {
                impact |= UpdateFlags::SOCIAL;
                self.store
                    .call(move |s| s.update_story(&page, state_filter, true))
                    .await
            }
            ActionPayload::Comment(response) => {
                impact |= UpdateFlags::SOCIAL;
                self.store.call(move |s| s.update_comment(&response)).await
            }
        };
        // The server has the action; a failed local merge is only logged.
        if let Err(e) = merged {
            warn!(kind = action.kind(), "Failed to merge action response: {}", e);
        }
        Ok(impact)
    }

    /// Re-apply confirmed actions so freshly fetched pages can't undo them.
    pub(crate) async fn finish_actions(&self) -> Result<()> {
        let followups = {
            let state = self.state();
            if state.halt_now || state.followups.is_empty() {
                return Ok(());
            }
            state.followups.clone()
        };

        debug!("Double-checking {} actions", followups.len());
        let user_id = self.config.api.user_id.clone();
        let impact = self
            .store
            .call(move |s| {
                let mut impact = UpdateFlags::empty();
                for action in &followups {
                    impact |= apply_local(s, action, user_id.as_deref(), true)?.impact;
                }
                Ok(impact)
            })
            .await?;
        self.send_update(impact);

        let do_metadata = self.unreads.service().is_do_metadata();
        let mut state = self.state();
        // A running story fetch or unread sync may still vend stale state.
        if state.pending_feed.is_some() || do_metadata {
            return Ok(());
        }
        state.followups.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeedCounts, StateFilter, StoriesPage};
    use crate::store::stories::tests::{seed_feeds, story};
    use crate::sync::testing::{engine_with, MockApi};

    fn seed_unread(store: &SqliteStore, hashes: &[&str]) {
        let page = StoriesPage {
            stories: hashes.iter().map(|h| story(h, 1)).collect(),
            ..Default::default()
        };
        store.insert_stories(&page, StateFilter::All, false).unwrap();
    }

    #[test]
    fn test_followup_read_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        seed_feeds(&store, &["1"]);
        seed_unread(&store, &["1:a", "1:b"]);
        store
            .update_feed_counts("1", FeedCounts { positive: 0, neutral: 2, negative: 0 })
            .unwrap();

        let action = ReadingAction::mark_story_read("1:a");
        apply_local(&store, &action, None, false).unwrap();
        let after_first = (store.story("1:a").unwrap(), store.feed("1").unwrap());

        apply_local(&store, &action, None, true).unwrap();
        apply_local(&store, &action, None, true).unwrap();
        let after_replay = (store.story("1:a").unwrap(), store.feed("1").unwrap());

        assert_eq!(after_first, after_replay);
        assert!(after_replay.0.unwrap().read);
        assert_eq!(after_replay.1.unwrap().counts.neutral, 1);
    }

    #[test]
    fn test_followup_star_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        seed_feeds(&store, &["1"]);
        seed_unread(&store, &["1:a"]);

        let action = ReadingAction::save_story("1:a", vec!["later".into()]);
        apply_local(&store, &action, None, false).unwrap();
        let total = store.total_starred_count().unwrap();
        apply_local(&store, &action, None, true).unwrap();
        apply_local(&store, &action, None, true).unwrap();

        let saved = store.story("1:a").unwrap().unwrap();
        assert!(saved.starred);
        assert_eq!(saved.user_tags, vec!["later".to_string()]);
        assert_eq!(store.total_starred_count().unwrap(), total);
    }

    #[test]
    fn test_share_placeholder_only_on_first_application() {
        let store = SqliteStore::in_memory().unwrap();
        seed_feeds(&store, &["1"]);
        seed_unread(&store, &["1:a"]);
        let action = ReadingAction::ShareStory {
            story_hash: "1:a".into(),
            story_id: "id-1:a".into(),
            feed_id: "1".into(),
            source_user_id: None,
            comment: Some("worth it".into()),
        };

        let effect = apply_local(&store, &action, Some("99"), false).unwrap();
        assert!(effect.impact.contains(UpdateFlags::SOCIAL));
        assert_eq!(store.comments_for_story("id-1:a").unwrap().len(), 1);

        store.clear_self_comments("id-1:a", "99").unwrap();
        apply_local(&store, &action, Some("99"), true).unwrap();
        assert!(store.comments_for_story("id-1:a").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_feed_read_round_trip() {
        let api = MockApi::default();
        let engine = engine_with(api.clone());
        let store = engine.store().clone();
        store
            .call(|s| {
                seed_feeds(s, &["42"]);
                seed_unread(s, &["42:a", "42:b", "42:c"]);
                Ok(())
            })
            .await
            .unwrap();

        engine
            .perform_action(ReadingAction::mark_feed_read(FeedSet::single_feed("42"), None, None))
            .await
            .unwrap();
        engine.sync_actions().await.unwrap();

        let fs = FeedSet::single_feed("42");
        let local = store
            .call(move |s| s.local_unread_count(&fs, StateFilter::All))
            .await
            .unwrap();
        assert_eq!(local, 0);
        assert!(store.blocking().actions().unwrap().is_empty());
        assert_eq!(api.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_action_and_counts_try() {
        let api = MockApi::default();
        api.fail_actions_with(ApiError::Protocol("503".into()));
        let engine = engine_with(api.clone());

        engine
            .perform_action(ReadingAction::mark_story_read("1:a"))
            .await
            .unwrap();
        engine.sync_actions().await.unwrap();

        let records = engine.store().blocking().actions().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tried, 1);
        assert!(engine.state().last_api_failure.is_some());
        assert!(engine.state().followups.is_empty());
    }

    #[tokio::test]
    async fn test_declared_error_drops_action_and_reports() {
        let api = MockApi::default();
        api.fail_actions_with(ApiError::Declared("Feed not found".into()));
        let engine = engine_with(api.clone());
        let mut events = engine.subscribe();

        engine
            .perform_action(ReadingAction::mark_story_read("1:a"))
            .await
            .unwrap();
        engine.sync_actions().await.unwrap();

        assert!(engine.store().blocking().actions().unwrap().is_empty());
        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if event == crate::domain::SyncEvent::Error("Feed not found".into()) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_undecodable_action_is_dropped() {
        let engine = engine_with(MockApi::default());
        engine
            .store()
            .blocking()
            .enqueue_action(&ReadingAction::mark_story_read("1:a"))
            .unwrap();
        // Corrupt the stored envelope.
        engine
            .store()
            .call(|s| {
                s.conn()?.execute("UPDATE actions SET params = '{\"v\":7}'", [])?;
                Ok(())
            })
            .await
            .unwrap();

        engine.sync_actions().await.unwrap();
        assert!(engine.store().blocking().actions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insta_fetch_requests_recount_flush() {
        let api = MockApi::default();
        let engine = engine_with(api.clone());
        engine
            .perform_action(ReadingAction::InstaFetch { feed_id: "5".into() })
            .await
            .unwrap();
        engine.sync_actions().await.unwrap();

        let state = engine.state();
        assert!(state.flush_recounts);
        assert!(state.recount_candidates.contains(&FeedSet::single_feed("5")));
        // Insta-fetch has no follow-up step.
        assert!(state.followups.is_empty());
    }
}
