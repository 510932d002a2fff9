use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use super::ImageCache;

pub const DEFAULT_WORKERS: usize = 6;

/// Runs image downloads against a cache with bounded concurrency.
pub struct PrefetchPool {
    cache: Arc<dyn ImageCache>,
    semaphore: Arc<Semaphore>,
}

impl PrefetchPool {
    pub fn with_workers(cache: Arc<dyn ImageCache>, workers: usize) -> Self {
        Self {
            cache,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Download every URL, returning how many are now cached.
    ///
    /// Individual failures are logged and skipped.
    pub async fn fetch_all(&self, urls: Vec<String>) -> usize {
        let handles = urls.into_iter().map(|url| {
            let cache = self.cache.clone();
            let semaphore = self.semaphore.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return false;
                };
                match cache.cache_file(&url).await {
                    Ok(path) => path.is_some(),
                    Err(e) => {
                        tracing::debug!("Image prefetch failed for {}: {}", url, e);
                        false
                    }
                }
            })
        });

        let mut cached = 0;
        for result in join_all(handles).await {
            match result {
                Ok(true) => cached += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("Task join error: {}", e),
            }
        }
        cached
    }
}
