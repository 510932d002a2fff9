use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use super::ImageCache;
use crate::app::Result;

const MAX_EXTENSION_LEN: usize = 4;

/// Image cache in a directory of files named by the SHA256 of their URL.
pub struct DiskImageCache {
    client: Client,
    dir: PathBuf,
}

impl DiskImageCache {
    pub fn new(client: Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a URL: hex SHA256 plus the URL's extension if it has a
    /// short one.
    pub fn file_name(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = hex::encode(hasher.finalize());

        let extension = Url::parse(url).ok().and_then(|u| {
            Path::new(u.path())
                .extension()
                .and_then(|e| e.to_str())
                .filter(|e| e.len() <= MAX_EXTENSION_LEN && e.chars().all(|c| c.is_ascii_alphanumeric()))
                .map(str::to_ascii_lowercase)
        });
        match extension {
            Some(ext) => format!("{}.{}", digest, ext),
            None => digest,
        }
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(Self::file_name(url))
    }
}

fn is_older_than(modified: std::io::Result<SystemTime>, max_age: Duration) -> bool {
    modified
        .ok()
        .and_then(|m| m.elapsed().ok())
        .is_some_and(|age| age > max_age)
}

#[async_trait]
impl ImageCache for DiskImageCache {
    async fn cache_file(&self, url: &str) -> Result<Option<PathBuf>> {
        if Url::parse(url).is_err() {
            debug!("Skipping unusable image URL {}", url);
            return Ok(None);
        }
        let path = self.path_for(url);
        if tokio::fs::try_exists(&path).await? {
            return Ok(Some(path));
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            debug!("Image {} answered {}", url, response.status());
            return Ok(None);
        }
        let body = response.bytes().await?;

        tokio::fs::create_dir_all(&self.dir).await?;
        // Write then rename so a half-written file is never picked up.
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, &body).await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(Some(path))
    }

    async fn cleanup_unused_and_old(
        &self,
        in_use: &HashSet<String>,
        max_age: Duration,
    ) -> Result<usize> {
        let keep: HashSet<String> = in_use.iter().map(|u| Self::file_name(u)).collect();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stale = match entry.metadata().await {
                Ok(meta) => is_older_than(meta.modified(), max_age),
                Err(_) => true,
            };
            if keep.contains(&name) && !stale {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove cached image {}: {}", name, e),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_hex_sha256_with_extension() {
        let name = DiskImageCache::file_name("https://example.com/a/pic.JPG?size=2");
        let (digest, ext) = name.split_once('.').unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ext, "jpg");

        let bare = DiskImageCache::file_name("https://example.com/image");
        assert_eq!(bare.len(), 64);
        assert_ne!(bare, digest);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_only_referenced_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskImageCache::new(Client::new(), dir.path());
        let kept = "https://example.com/kept.png";
        let dropped = "https://example.com/dropped.png";
        std::fs::write(cache.path_for(kept), b"png").unwrap();
        std::fs::write(cache.path_for(dropped), b"png").unwrap();

        let in_use = HashSet::from([kept.to_string()]);
        let removed = cache
            .cleanup_unused_and_old(&in_use, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(cache.path_for(kept).exists());
        assert!(!cache.path_for(dropped).exists());

        // Already cached files are returned without a download.
        let path = cache.cache_file(kept).await.unwrap();
        assert_eq!(path, Some(cache.path_for(kept)));
    }

    #[tokio::test]
    async fn test_cleanup_of_missing_dir_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskImageCache::new(Client::new(), dir.path().join("absent"));
        let removed = cache
            .cleanup_unused_and_old(&HashSet::new(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(cache.cache_file("not a url").await.unwrap(), None);
    }
}
