use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{ApiClient, HttpApi};
use crate::app::error::{Result, SyncError};
use crate::cache::ImageCaches;
use crate::config::Config;
use crate::store::sqlite::SqliteStore;
use crate::store::LocalStore;
use crate::sync::SyncEngine;

/// Wires the store, the API client, the image caches and the engine.
pub struct AppContext {
    pub config: Config,
    pub store: LocalStore,
    pub api: Arc<dyn ApiClient>,
    pub engine: Arc<SyncEngine>,
}

impl AppContext {
    pub fn new(db_path: Option<PathBuf>, config: Config) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };
        let store = LocalStore::new(SqliteStore::new(&db_path)?);

        let (images_dir, thumbnails_dir) =
            Config::default_cache_dirs().map_err(|e| SyncError::Config(e.to_string()))?;
        std::fs::create_dir_all(&images_dir)?;
        std::fs::create_dir_all(&thumbnails_dir)?;
        let caches = ImageCaches::on_disk(Self::image_client(&config)?, images_dir, thumbnails_dir);

        Self::assemble(store, caches, config)
    }

    /// A context over an in-memory database. Images still go to disk.
    pub fn in_memory(config: Config, cache_root: PathBuf) -> Result<Self> {
        let store = LocalStore::in_memory()?;
        let caches = ImageCaches::on_disk(
            Self::image_client(&config)?,
            cache_root.join("images"),
            cache_root.join("thumbs"),
        );
        Self::assemble(store, caches, config)
    }

    fn assemble(store: LocalStore, caches: ImageCaches, config: Config) -> Result<Self> {
        let api: Arc<dyn ApiClient> = Arc::new(HttpApi::new(&config.api)?);
        let engine = SyncEngine::new(store.clone(), api.clone(), caches, config.clone());
        Ok(Self {
            config,
            store,
            api,
            engine,
        })
    }

    fn image_client(config: &Config) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.api.connect_timeout_secs))
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .user_agent(config.api.user_agent.as_str())
            .build()?)
    }

    fn default_db_path() -> Result<PathBuf> {
        let db_path = Config::default_db_path().map_err(|e| SyncError::Config(e.to_string()))?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_context_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::in_memory(Config::default(), dir.path().to_path_buf()).unwrap();

        let feeds = ctx.store.call(|s| s.feeds()).await.unwrap();
        assert!(feeds.is_empty());
        assert!(ctx.engine.status().is_none());
    }
}
