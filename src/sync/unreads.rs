use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::service::SubService;
use super::{lock, SyncEngine};
use crate::app::Result;
use crate::domain::story::infer_feed_id;
use crate::domain::StoryOrder;

/// Keeps the local set of unread stories in line with the server.
///
/// After a feed/folder refresh it diffs the server's unread hashes against
/// local ones, retires stories read elsewhere and queues the missing ones,
/// which are then fetched in batches.
#[derive(Default)]
pub struct UnreadsService {
    do_metadata: AtomicBool,
    /// Hashes to fetch, in the order the user will likely read them.
    queue: Mutex<Vec<String>>,
}

impl UnreadsService {
    /// Diff unread hashes on the next run.
    pub fn do_metadata(&self) {
        self.do_metadata.store(true, Ordering::SeqCst);
    }

    pub fn is_do_metadata(&self) -> bool {
        self.do_metadata.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn clear(&self) {
        lock(&self.queue).clear();
    }

    async fn sync_unread_list(&self, engine: &Arc<SyncEngine>) -> Result<()> {
        if engine.stop_sync() {
            return Ok(());
        }
        let remote = match engine.api.unread_story_hashes().await {
            Ok(remote) => remote,
            Err(e) => {
                error!("Unread hash fetch failed: {}", e);
                return Ok(());
            }
        };
        if engine.stop_sync() {
            return Ok(());
        }

        let mut old_unreads = engine.store.call(|s| s.unread_story_hashes()).await?;
        info!("Starting unread count: {}", old_unreads.len());

        let (orphans, disabled) = {
            let state = engine.state();
            (state.orphan_feed_ids.clone(), state.disabled_feed_ids.clone())
        };

        let mut to_fetch: Vec<(String, i64)> = Vec::new();
        let mut count = 0;
        for (feed_id, unreads) in remote {
            if orphans.contains(&feed_id) || disabled.contains(&feed_id) {
                continue;
            }
            for (hash, timestamp) in unreads {
                if !old_unreads.remove(&hash) {
                    to_fetch.push((hash, timestamp));
                }
                count += 1;
            }
        }
        info!("New unread count: {}", count);
        info!("New unreads found: {}", to_fetch.len());
        info!("Unreads to retire: {}", old_unreads.len());

        let retired: Vec<String> = old_unreads.into_iter().collect();
        engine.store.call(move |s| s.mark_story_hashes_read(&retired)).await?;

        if engine.stop_sync() {
            return Ok(());
        }

        if engine.config.reading.story_order == StoryOrder::Newest {
            to_fetch.sort_by(|a, b| b.1.cmp(&a.1));
        } else {
            to_fetch.sort_by(|a, b| a.1.cmp(&b.1));
        }
        *lock(&self.queue) = to_fetch.into_iter().map(|(hash, _)| hash).collect();
        Ok(())
    }

    async fn fetch_new_unreads(&self, engine: &Arc<SyncEngine>) -> Result<()> {
        let notify_feeds = engine.store.call(|s| s.notify_feed_ids()).await?;
        let prefs = &engine.config.reading;
        let batch_size = engine.config.sync.unread_fetch_batch_size.max(1);

        while self.pending() > 0 {
            if engine.stop_sync() {
                break;
            }
            if !(prefs.offline_enabled || prefs.notifications_enabled) {
                return Ok(());
            }

            let (batch, skips) = {
                let queue = lock(&self.queue);
                let mut batch = Vec::with_capacity(batch_size);
                let mut skips = Vec::new();
                for hash in queue.iter() {
                    let wanted = prefs.offline_enabled
                        || (prefs.notifications_enabled
                            && notify_feeds.contains(infer_feed_id(hash)));
                    if wanted {
                        batch.push(hash.clone());
                    } else {
                        skips.push(hash.clone());
                    }
                    if batch.len() >= batch_size {
                        break;
                    }
                }
                (batch, skips)
            };

            let page = if batch.is_empty() {
                Default::default()
            } else {
                match engine.api.stories_by_hash(&batch).await {
                    Ok(page) => page,
                    Err(e) => {
                        error!("Error fetching unreads batch, abandoning sync: {}", e);
                        break;
                    }
                }
            };

            debug!("Got {} stories from unread sync", page.stories.len());
            let state_filter = prefs.state_filter;
            let page = engine
                .store
                .call(move |s| {
                    s.insert_stories(&page, state_filter, false)?;
                    Ok(page)
                })
                .await?;

            let done: HashSet<String> = batch.into_iter().chain(skips).collect();
            lock(&self.queue).retain(|hash| !done.contains(hash));

            if prefs.text_prefetch_enabled {
                engine.prefetch_original_text(&page).await?;
            }
            engine.prefetch_images(&page);
        }
        Ok(())
    }
}

#[async_trait]
impl SubService for UnreadsService {
    fn name(&self) -> &'static str {
        "UnreadsService"
    }

    async fn exec(&self, engine: &Arc<SyncEngine>) -> Result<()> {
        if self.is_do_metadata() {
            self.sync_unread_list(engine).await?;
            self.do_metadata.store(false, Ordering::SeqCst);
        }

        if self.pending() > 0 {
            self.fetch_new_unreads(engine).await?;
            engine.push_notifications().await?;
        }
        Ok(())
    }
}
