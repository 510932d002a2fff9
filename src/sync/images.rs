use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use super::service::SubService;
use super::{lock, SyncEngine};
use crate::app::Result;
use crate::cache::{ImageCaches, PrefetchPool};

#[derive(Default)]
struct ImageQueue {
    images: HashSet<String>,
    thumbnails: HashSet<String>,
}

#[derive(Clone, Copy)]
enum Kind {
    Image,
    Thumbnail,
}

/// Downloads images and thumbnails of unread stories for offline reading.
pub struct ImagePrefetchService {
    queue: Mutex<ImageQueue>,
    image_pool: PrefetchPool,
    thumbnail_pool: PrefetchPool,
}

impl ImagePrefetchService {
    pub fn new(caches: &ImageCaches, workers: usize) -> Self {
        Self {
            queue: Mutex::new(ImageQueue::default()),
            image_pool: PrefetchPool::with_workers(caches.images.clone(), workers),
            thumbnail_pool: PrefetchPool::with_workers(caches.thumbnails.clone(), workers),
        }
    }

    pub fn add_urls(&self, urls: impl IntoIterator<Item = String>) {
        lock(&self.queue).images.extend(urls);
    }

    pub fn add_thumbnail_url(&self, url: String) {
        lock(&self.queue).thumbnails.insert(url);
    }

    pub fn pending(&self) -> usize {
        let queue = lock(&self.queue);
        queue.images.len() + queue.thumbnails.len()
    }

    pub fn clear(&self) {
        let mut queue = lock(&self.queue);
        queue.images.clear();
        queue.thumbnails.clear();
    }

    fn allowed(engine: &SyncEngine) -> bool {
        let prefs = &engine.config.reading;
        prefs.image_prefetch_enabled && prefs.background_network_allowed
    }

    fn next_batch(&self, kind: Kind, size: usize) -> Vec<String> {
        let queue = lock(&self.queue);
        let set = match kind {
            Kind::Image => &queue.images,
            Kind::Thumbnail => &queue.thumbnails,
        };
        set.iter().take(size).cloned().collect()
    }

    fn remove(&self, kind: Kind, urls: &[String]) {
        let mut queue = lock(&self.queue);
        let set = match kind {
            Kind::Image => &mut queue.images,
            Kind::Thumbnail => &mut queue.thumbnails,
        };
        for url in urls {
            set.remove(url);
        }
    }

    /// Drain one queue. Returns false if the engine asked to stop.
    async fn drain(&self, engine: &Arc<SyncEngine>, kind: Kind) -> Result<bool> {
        let batch_size = engine.config.sync.image_prefetch_batch_size.max(1);
        loop {
            if !Self::allowed(engine) {
                return Ok(false);
            }
            let batch = self.next_batch(kind, batch_size);
            if batch.is_empty() {
                return Ok(true);
            }

            // Re-read on every batch: stories read or cleaned up in the meantime drop out.
            let wanted = match kind {
                Kind::Image => engine.store.call(|s| s.unread_story_images()).await?,
                Kind::Thumbnail => engine.store.call(|s| s.unread_story_thumbnails()).await?,
            };
            let urls: Vec<String> = batch.iter().filter(|u| wanted.contains(*u)).cloned().collect();
            let pool = match kind {
                Kind::Image => &self.image_pool,
                Kind::Thumbnail => &self.thumbnail_pool,
            };
            let cached = pool.fetch_all(urls).await;
            debug!("Prefetched {} of {} images", cached, batch.len());

            self.remove(kind, &batch);
            if engine.stop_sync() {
                return Ok(false);
            }
        }
    }
}

#[async_trait]
impl SubService for ImagePrefetchService {
    fn name(&self) -> &'static str {
        "ImagePrefetchService"
    }

    async fn exec(&self, engine: &Arc<SyncEngine>) -> Result<()> {
        if !Self::allowed(engine) {
            return Ok(());
        }
        if self.drain(engine, Kind::Image).await? {
            self.drain(engine, Kind::Thumbnail).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StateFilter, StoriesPage};
    use crate::store::stories::tests::story;
    use crate::sync::testing::{engine_with_caches, MockApi, RecordingCache};

    #[tokio::test]
    async fn test_only_images_of_unread_stories_are_fetched() {
        let images = Arc::new(RecordingCache::default());
        let thumbnails = Arc::new(RecordingCache::default());
        let caches = ImageCaches {
            images: images.clone(),
            thumbnails: thumbnails.clone(),
        };
        let engine = engine_with_caches(MockApi::default(), caches, Default::default());

        let mut held = story("1:a", 1);
        held.image_urls = vec!["http://img/a.png".into()];
        held.thumbnail_url = Some("http://img/a-thumb.png".into());
        let mut read = story("1:b", 2);
        read.read = true;
        read.image_urls = vec!["http://img/b.png".into()];
        let page = StoriesPage {
            stories: vec![held, read],
            ..Default::default()
        };
        engine
            .store()
            .blocking()
            .insert_stories(&page, StateFilter::Some, false)
            .unwrap();

        let service = engine.images.service();
        service.add_urls([
            "http://img/a.png".to_string(),
            "http://img/b.png".to_string(),
            "http://img/gone.png".to_string(),
        ]);
        service.add_thumbnail_url("http://img/a-thumb.png".into());
        service.exec(&engine).await.unwrap();

        assert_eq!(images.fetched(), vec!["http://img/a.png"]);
        assert_eq!(thumbnails.fetched(), vec!["http://img/a-thumb.png"]);
        assert_eq!(service.pending(), 0);
    }

    #[tokio::test]
    async fn test_disabled_prefetch_leaves_queue() {
        let mut config = crate::config::Config::default();
        config.reading.image_prefetch_enabled = false;
        let engine = crate::sync::testing::engine_with_config(MockApi::default(), config);
        let service = engine.images.service();
        service.add_urls(["http://img/a.png".to_string()]);

        service.exec(&engine).await.unwrap();
        assert_eq!(service.pending(), 1);
    }
}
