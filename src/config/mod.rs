//! Configuration management for feedsync.
//!
//! Configuration is read from `~/.config/feedsync/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::DEFAULT_WORKERS;
use crate::domain::{CursorFilters, ReadFilter, StateFilter, StoryOrder};

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub sync: SyncConfig,
    pub reading: ReadingPrefs,
}

/// How to reach the NewsBlur API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Value of the `newsblur_sessionid` cookie of a logged-in session.
    pub session_cookie: Option<String>,
    /// Numeric id of the logged-in user, needed for local share and reply
    /// placeholders.
    pub user_id: Option<String>,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.newsblur.com".to_string(),
            session_cookie: None,
            user_id: None,
            connect_timeout_secs: 10,
            timeout_secs: 30,
            user_agent: format!("feedsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Timing and batching of the sync engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum spacing of feed/folder refreshes unless one is forced.
    pub auto_sync_interval_secs: u64,
    /// No background pass within this long of a hard API failure.
    pub background_backoff_secs: u64,
    /// Consecutive unauthenticated refreshes before the session is dropped.
    pub max_auth_failures: u32,
    pub unread_fetch_batch_size: usize,
    pub image_prefetch_batch_size: usize,
    pub cleanup_interval_secs: u64,
    pub vacuum_interval_secs: u64,
    /// Larger original texts are not stored.
    pub max_text_size: usize,
    pub max_cached_image_age_secs: u64,
    /// Concurrent image downloads.
    pub workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_interval_secs: 15 * 60,
            background_backoff_secs: 5 * 60,
            max_auth_failures: 3,
            unread_fetch_batch_size: 50,
            image_prefetch_batch_size: 6,
            cleanup_interval_secs: 12 * 60 * 60,
            vacuum_interval_secs: 48 * 60 * 60,
            max_text_size: 1024 * 1024,
            max_cached_image_age_secs: 30 * 24 * 60 * 60,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl SyncConfig {
    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_secs)
    }

    pub fn background_backoff(&self) -> Duration {
        Duration::from_secs(self.background_backoff_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn vacuum_interval(&self) -> Duration {
        Duration::from_secs(self.vacuum_interval_secs)
    }

    pub fn max_cached_image_age(&self) -> Duration {
        Duration::from_secs(self.max_cached_image_age_secs)
    }
}

/// User preferences that steer what gets fetched and shown.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadingPrefs {
    pub state_filter: StateFilter,
    pub read_filter: ReadFilter,
    pub story_order: StoryOrder,
    /// Keep read stories through cleanup.
    pub keep_old_stories: bool,
    /// Fetch unread stories ahead of time.
    pub offline_enabled: bool,
    pub text_prefetch_enabled: bool,
    /// Original texts fetched per batch.
    pub text_prefetch_batch_size: usize,
    pub image_prefetch_enabled: bool,
    pub notifications_enabled: bool,
    /// Whether background passes may use the network.
    pub background_network_allowed: bool,
    pub background_sync_enabled: bool,
    /// Feeds read in text mode; their unread stories get original text.
    pub text_mode_feeds: BTreeSet<String>,
}

impl Default for ReadingPrefs {
    fn default() -> Self {
        Self {
            state_filter: StateFilter::default(),
            read_filter: ReadFilter::default(),
            story_order: StoryOrder::default(),
            keep_old_stories: false,
            offline_enabled: true,
            text_prefetch_enabled: true,
            text_prefetch_batch_size: 6,
            image_prefetch_enabled: true,
            notifications_enabled: false,
            background_network_allowed: true,
            background_sync_enabled: true,
            text_mode_feeds: BTreeSet::new(),
        }
    }
}

impl ReadingPrefs {
    pub fn cursor_filters(&self) -> CursorFilters {
        CursorFilters {
            state_filter: self.state_filter,
            read_filter: self.read_filter,
            story_order: self.story_order,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &PathBuf) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.clone(),
            source: e,
        })?;

        Ok(config)
    }

    /// Get the default config file path: `~/.config/feedsync/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("feedsync").join("config.toml"))
    }

    /// `~/.local/share/feedsync/feedsync.db` or the platform equivalent.
    pub fn default_db_path() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join("feedsync").join("feedsync.db"))
    }

    /// Story images and thumbnails are cached in separate directories.
    pub fn default_cache_dirs() -> Result<(PathBuf, PathBuf), ConfigError> {
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoDataDir)?;
        let root = cache_dir.join("feedsync");
        Ok((root.join("images"), root.join("thumbs")))
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# feedsync configuration
#
# Durations are in seconds.

[api]
base_url = "https://www.newsblur.com"

# Session cookie of a logged-in NewsBlur session (newsblur_sessionid)
# session_cookie = ""

# Your NewsBlur user id, used for local share and reply placeholders
# user_id = ""

connect_timeout_secs = 10
timeout_secs = 30

[sync]
# Minimum time between feed/folder refreshes
auto_sync_interval_secs = 900

# No background sync this soon after a hard API failure
background_backoff_secs = 300

# Consecutive authentication failures before logging out
max_auth_failures = 3

# Stories fetched per unread batch, images per prefetch batch
unread_fetch_batch_size = 50
image_prefetch_batch_size = 6

cleanup_interval_secs = 43200
vacuum_interval_secs = 172800

# Original texts above this many bytes are not kept
max_text_size = 1048576

max_cached_image_age_secs = 2592000

# Concurrent image downloads
workers = 6

[reading]
# all, some, neut, best, neg or saved
state_filter = "some"
# all or unread
read_filter = "unread"
# newest or oldest
story_order = "newest"

keep_old_stories = false
offline_enabled = true
text_prefetch_enabled = true
# Original texts fetched per batch
text_prefetch_batch_size = 6
image_prefetch_enabled = true
notifications_enabled = false
background_network_allowed = true
background_sync_enabled = true

# Feeds whose unread stories get their original text fetched
text_mode_feeds = []
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(&content).expect("Default config should be valid TOML");

        assert_eq!(config.api.base_url, "https://www.newsblur.com");
        assert_eq!(config.sync.max_auth_failures, 3);
        assert_eq!(config.reading.state_filter, StateFilter::Some);
        assert!(config.reading.text_mode_feeds.is_empty());
        assert_eq!(config.reading.text_prefetch_batch_size, 6);
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
[sync]
unread_fetch_batch_size = 10

[reading]
story_order = "oldest"
text_mode_feeds = ["42"]
text_prefetch_batch_size = 2
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.sync.unread_fetch_batch_size, 10);
        assert_eq!(config.reading.story_order, StoryOrder::Oldest);
        assert!(config.reading.text_mode_feeds.contains("42"));
        assert_eq!(config.reading.text_prefetch_batch_size, 2);
        // Defaults
        assert_eq!(config.sync.auto_sync_interval(), Duration::from_secs(900));
        assert!(config.reading.offline_enabled);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert!(config.api.session_cookie.is_none());
        assert_eq!(config.sync.workers, 6);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.sync.max_text_size, 1024 * 1024);

        fs::write(&path, "[api]\nsession_cookie = \"abc\"\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api.session_cookie.as_deref(), Some("abc"));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sync\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
