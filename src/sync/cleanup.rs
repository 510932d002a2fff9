use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::service::SubService;
use super::SyncEngine;
use crate::app::Result;
use crate::cache::ImageCaches;
use crate::store::{keys, now_millis};

/// Periodic pruning of old stories, orphaned text and cached images.
pub struct CleanupService {
    caches: ImageCaches,
}

impl CleanupService {
    pub fn new(caches: ImageCaches) -> Self {
        Self { caches }
    }
}

#[async_trait]
impl SubService for CleanupService {
    fn name(&self) -> &'static str {
        "CleanupService"
    }

    async fn exec(&self, engine: &Arc<SyncEngine>) -> Result<()> {
        let interval = engine.config.sync.cleanup_interval().as_millis() as i64;
        let last = engine.store.call(|s| s.sync_timestamp(keys::LAST_CLEANUP)).await?;
        if now_millis() - last < interval {
            return Ok(());
        }

        debug!("Cleaning up old stories");
        let keep_old = engine.config.reading.keep_old_stories;
        let (very_old, read) = engine
            .store
            .call(move |s| {
                let very_old = s.cleanup_very_old_stories()?;
                let read = if keep_old { 0 } else { s.cleanup_read_stories()? };
                s.set_sync_timestamp(keys::LAST_CLEANUP, now_millis())?;
                Ok((very_old, read))
            })
            .await?;
        debug!(very_old, read, "Removed stories");

        debug!("Cleaning up old story texts and dismissals");
        engine
            .store
            .call(|s| {
                s.cleanup_story_text()?;
                s.cleanup_dismissals()?;
                Ok(())
            })
            .await?;

        let max_age = engine.config.sync.max_cached_image_age();
        debug!("Cleaning up story image cache");
        let images = engine.store.call(|s| s.all_story_images()).await?;
        self.caches.images.cleanup_unused_and_old(&images, max_age).await?;

        debug!("Cleaning up thumbnail cache");
        let thumbnails = engine.store.call(|s| s.all_story_thumbnails()).await?;
        self.caches
            .thumbnails
            .cleanup_unused_and_old(&thumbnails, max_age)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StateFilter, StoriesPage};
    use crate::store::stories::tests::story;
    use crate::sync::testing::{engine_with, engine_with_config, MockApi};

    fn seed(engine: &SyncEngine) {
        let mut read = story("1:read", now_millis());
        read.read = true;
        let mut saved = story("1:saved", now_millis());
        saved.read = true;
        saved.starred = true;
        let page = StoriesPage {
            stories: vec![read, saved, story("1:ancient", 1), story("1:fresh", now_millis())],
            ..Default::default()
        };
        let store = engine.store().blocking();
        store.insert_stories(&page, StateFilter::Some, false).unwrap();
        store.put_story_text("1:read", "text").unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_prunes_read_and_very_old() {
        let engine = engine_with(MockApi::default());
        seed(&engine);

        engine.cleanup.service().exec(&engine).await.unwrap();

        let store = engine.store().blocking();
        assert!(store.story("1:read").unwrap().is_none());
        assert!(store.story("1:ancient").unwrap().is_none());
        assert!(store.story("1:saved").unwrap().is_some());
        assert!(store.story("1:fresh").unwrap().is_some());
        assert!(store.story_text("1:read").unwrap().is_none());
        assert!(store.sync_timestamp(keys::LAST_CLEANUP).unwrap() > 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_read_stories_when_asked_and_waits_interval() {
        let mut config = crate::config::Config::default();
        config.reading.keep_old_stories = true;
        let engine = engine_with_config(MockApi::default(), config);
        seed(&engine);

        engine.cleanup.service().exec(&engine).await.unwrap();
        let store = engine.store().blocking();
        assert!(store.story("1:read").unwrap().is_some());

        // Not due again yet.
        store.put_story_text("1:gone", "orphan").unwrap();
        engine.cleanup.service().exec(&engine).await.unwrap();
        assert!(store.story_text("1:gone").unwrap().is_some());
    }
}
