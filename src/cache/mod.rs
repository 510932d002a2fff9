//! Local copies of story images and thumbnails.

mod disk;
mod parallel;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::Result;

pub use disk::DiskImageCache;
pub use parallel::{PrefetchPool, DEFAULT_WORKERS};

#[async_trait]
pub trait ImageCache: Send + Sync {
    /// Download `url` unless a copy is already present.
    ///
    /// Returns the local path, or `None` when the URL is unusable.
    async fn cache_file(&self, url: &str) -> Result<Option<PathBuf>>;

    /// Delete copies of URLs not in `in_use`, and copies older than `max_age`.
    async fn cleanup_unused_and_old(&self, in_use: &HashSet<String>, max_age: Duration)
        -> Result<usize>;
}

/// The two caches the engine prefetches into and trims.
#[derive(Clone)]
pub struct ImageCaches {
    pub images: Arc<dyn ImageCache>,
    pub thumbnails: Arc<dyn ImageCache>,
}

impl ImageCaches {
    /// Disk caches in `images_dir` and `thumbnails_dir` sharing one client.
    pub fn on_disk(client: reqwest::Client, images_dir: PathBuf, thumbnails_dir: PathBuf) -> Self {
        Self {
            images: Arc::new(DiskImageCache::new(client.clone(), images_dir)),
            thumbnails: Arc::new(DiskImageCache::new(client, thumbnails_dir)),
        }
    }
}
