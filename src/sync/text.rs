use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::service::SubService;
use super::{lock, SyncEngine};
use crate::app::Result;
use crate::domain::story::{image_sources, infer_feed_id};
use crate::domain::UpdateFlags;

/// Stored in place of text the server could not extract, so readers can
/// fall back to the story view instead of waiting forever.
pub const NULL_STORY_TEXT: &str = "__NULL_STORY_TEXT__";

#[derive(Default)]
struct TextQueue {
    normal: HashSet<String>,
    /// Hashes a reader is waiting on right now.
    priority: HashSet<String>,
}

/// Fetches extracted article text for stories.
#[derive(Default)]
pub struct OriginalTextService {
    queue: Mutex<TextQueue>,
}

impl OriginalTextService {
    pub fn add_hashes(&self, hashes: impl IntoIterator<Item = String>) {
        lock(&self.queue).normal.extend(hashes);
    }

    pub fn add_priority_hash(&self, hash: impl Into<String>) {
        lock(&self.queue).priority.insert(hash.into());
    }

    pub fn pending(&self) -> usize {
        let queue = lock(&self.queue);
        queue.normal.len() + queue.priority.len()
    }

    pub fn clear(&self) {
        let mut queue = lock(&self.queue);
        queue.normal.clear();
        queue.priority.clear();
    }

    async fn fetch_batch(&self, engine: &Arc<SyncEngine>, priority: bool) -> Result<()> {
        let batch_size = engine.config.reading.text_prefetch_batch_size.max(1);
        let batch: Vec<String> = {
            let queue = lock(&self.queue);
            let set = if priority { &queue.priority } else { &queue.normal };
            set.iter().take(batch_size).cloned().collect()
        };
        if batch.is_empty() {
            return Ok(());
        }

        let max_text_size = engine.config.sync.max_text_size;
        let mut fetched = Vec::with_capacity(batch.len());
        let mut found_images = false;
        for hash in batch {
            if engine.stop_sync() {
                break;
            }
            let text = match engine.api.story_text(infer_feed_id(&hash), &hash).await {
                Ok(Some(text)) if text.len() >= max_text_size => {
                    warn!(story_hash = %hash, size = text.len(), "Discarding too-large story text");
                    Some(NULL_STORY_TEXT.to_string())
                }
                Ok(Some(text)) => Some(text),
                Ok(None) => Some(NULL_STORY_TEXT.to_string()),
                Err(e) => {
                    debug!(story_hash = %hash, "Story text fetch failed: {}", e);
                    None
                }
            };

            if let Some(text) = text {
                let images = image_sources(&text);
                found_images |= !images.is_empty();
                engine.images.service().add_urls(images);
                let key = hash.clone();
                engine.store.call(move |s| s.put_story_text(&key, &text)).await?;
            }
            fetched.push(hash);
        }

        {
            let mut queue = lock(&self.queue);
            let set = if priority { &mut queue.priority } else { &mut queue.normal };
            for hash in &fetched {
                set.remove(hash);
            }
        }
        engine.send_update(UpdateFlags::TEXT);
        if found_images {
            engine.images.start(engine);
        }
        Ok(())
    }
}

#[async_trait]
impl SubService for OriginalTextService {
    fn name(&self) -> &'static str {
        "OriginalTextService"
    }

    async fn exec(&self, engine: &Arc<SyncEngine>) -> Result<()> {
        while self.pending() > 0 {
            if engine.stop_sync() {
                return Ok(());
            }
            self.fetch_batch(engine, true).await?;
            self.fetch_batch(engine, false).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ApiError;
    use crate::sync::testing::{engine_with, MockApi};

    #[tokio::test]
    async fn test_text_stored_and_images_queued() {
        let api = MockApi::default();
        api.set_story_text("1:a", Some(r#"<p>hi <img src="http://x/1.png"></p>"#));
        let engine = engine_with(api.clone());
        let service = engine.text.service();
        service.add_hashes(["1:a".to_string()]);

        service.exec(&engine).await.unwrap();

        let text = engine.store().blocking().story_text("1:a").unwrap();
        assert!(text.unwrap().contains("hi"));
        assert_eq!(service.pending(), 0);
        assert!(engine.images.service().pending() >= 1 || engine.images.is_running());
    }

    #[tokio::test]
    async fn test_missing_or_huge_text_becomes_marker() {
        let api = MockApi::default();
        let mut config = crate::config::Config::default();
        config.sync.max_text_size = 10;
        api.set_story_text("1:none", None);
        api.set_story_text("1:huge", Some("0123456789abcdef"));
        let engine = crate::sync::testing::engine_with_config(api.clone(), config);
        let service = engine.text.service();
        service.add_priority_hash("1:none");
        service.add_hashes(["1:huge".to_string()]);

        service.exec(&engine).await.unwrap();

        let store = engine.store().blocking();
        assert_eq!(store.story_text("1:none").unwrap().as_deref(), Some(NULL_STORY_TEXT));
        assert_eq!(store.story_text("1:huge").unwrap().as_deref(), Some(NULL_STORY_TEXT));
    }

    #[tokio::test]
    async fn test_text_batch_size_is_configurable() {
        let api = MockApi::default();
        let mut config = crate::config::Config::default();
        config.reading.text_prefetch_batch_size = 1;
        config.sync.image_prefetch_batch_size = 50;
        let hashes = ["1:a", "1:b", "1:c"];
        for hash in hashes {
            api.set_story_text(hash, Some("plain"));
        }
        let engine = crate::sync::testing::engine_with_config(api.clone(), config);
        let service = engine.text.service();
        service.add_hashes(hashes.iter().map(|h| h.to_string()));

        // One story per batch, so the first batch leaves two behind.
        service.fetch_batch(&engine, false).await.unwrap();
        assert_eq!(service.pending(), 2);
        assert_eq!(api.calls("story_text"), 1);

        service.exec(&engine).await.unwrap();
        assert_eq!(service.pending(), 0);
        assert_eq!(api.calls("story_text"), 3);
        let store = engine.store().blocking();
        for hash in hashes {
            assert_eq!(store.story_text(hash).unwrap().as_deref(), Some("plain"));
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_stores_nothing_but_dequeues() {
        let api = MockApi::default();
        api.fail_story_text_with(ApiError::Protocol("503".into()));
        let engine = engine_with(api.clone());
        let service = engine.text.service();
        service.add_hashes(["1:a".to_string()]);

        service.exec(&engine).await.unwrap();

        assert_eq!(service.pending(), 0);
        assert!(engine.store().blocking().story_text("1:a").unwrap().is_none());
    }
}
