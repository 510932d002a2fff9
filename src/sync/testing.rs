//! Scripted API and caches for engine tests.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{lock, SyncEngine};
use crate::api::{ActionPayload, ApiClient, FeedFolderResponse, UnreadCountsResponse, UnreadHashes};
use crate::app::{ApiError, ApiResult, Result};
use crate::cache::{ImageCache, ImageCaches};
use crate::config::Config;
use crate::domain::{FeedSet, ReadFilter, ReadingAction, StoriesPage, Story, StoryOrder};
use crate::store::LocalStore;

#[derive(Default)]
struct Script {
    calls: HashMap<&'static str, usize>,
    feeds_folders: Option<ApiResult<FeedFolderResponse>>,
    story_pages: VecDeque<StoriesPage>,
    stories_error: Option<ApiError>,
    pages_requested: Vec<u32>,
    library: HashMap<String, Story>,
    unread_hashes: UnreadHashes,
    starred_hashes: Vec<String>,
    unread_counts: UnreadCountsResponse,
    texts: HashMap<String, Option<String>>,
    text_error: Option<ApiError>,
    action_error: Option<ApiError>,
    executed: Vec<ReadingAction>,
}

/// An [`ApiClient`] answering from canned data. Clones share the script.
#[derive(Clone, Default)]
pub(crate) struct MockApi {
    script: Arc<Mutex<Script>>,
}

impl MockApi {
    fn record(&self, call: &'static str) -> std::sync::MutexGuard<'_, Script> {
        let mut script = lock(&self.script);
        *script.calls.entry(call).or_insert(0) += 1;
        script
    }

    pub fn calls(&self, call: &str) -> usize {
        lock(&self.script).calls.get(call).copied().unwrap_or(0)
    }

    pub fn set_feeds_folders(&self, response: FeedFolderResponse) {
        lock(&self.script).feeds_folders = Some(Ok(response));
    }

    pub fn fail_feeds_folders_with(&self, error: ApiError) {
        lock(&self.script).feeds_folders = Some(Err(error));
    }

    /// Pages are served in order; once they run out every page is empty.
    pub fn push_story_page(&self, page: StoriesPage) {
        lock(&self.script).story_pages.push_back(page);
    }

    pub fn fail_stories_with(&self, error: ApiError) {
        lock(&self.script).stories_error = Some(error);
    }

    pub fn pages_requested(&self) -> Vec<u32> {
        lock(&self.script).pages_requested.clone()
    }

    /// Make a story available to fetch-by-hash.
    pub fn add_story(&self, story: Story) {
        lock(&self.script).library.insert(story.story_hash.clone(), story);
    }

    pub fn set_unread_hashes(&self, hashes: UnreadHashes) {
        lock(&self.script).unread_hashes = hashes;
    }

    pub fn set_starred_hashes(&self, hashes: Vec<String>) {
        lock(&self.script).starred_hashes = hashes;
    }

    pub fn set_unread_counts(&self, counts: UnreadCountsResponse) {
        lock(&self.script).unread_counts = counts;
    }

    pub fn set_story_text(&self, hash: &str, text: Option<&str>) {
        lock(&self.script)
            .texts
            .insert(hash.to_string(), text.map(str::to_string));
    }

    pub fn fail_story_text_with(&self, error: ApiError) {
        lock(&self.script).text_error = Some(error);
    }

    pub fn fail_actions_with(&self, error: ApiError) {
        lock(&self.script).action_error = Some(error);
    }

    /// Actions the server accepted.
    pub fn executed(&self) -> Vec<ReadingAction> {
        lock(&self.script).executed.clone()
    }
}

#[async_trait]
impl ApiClient for MockApi {
    async fn feeds_and_folders(&self) -> ApiResult<FeedFolderResponse> {
        let script = self.record("feeds_and_folders");
        script.feeds_folders.clone().unwrap_or_else(|| Ok(FeedFolderResponse::default()))
    }

    async fn stories(
        &self,
        _feed_set: &FeedSet,
        page: u32,
        _order: StoryOrder,
        _read_filter: ReadFilter,
    ) -> ApiResult<StoriesPage> {
        let mut script = self.record("stories");
        if let Some(error) = script.stories_error.clone() {
            return Err(error);
        }
        script.pages_requested.push(page);
        Ok(script.story_pages.pop_front().unwrap_or_default())
    }

    async fn stories_by_hash(&self, story_hashes: &[String]) -> ApiResult<StoriesPage> {
        let script = self.record("stories_by_hash");
        let stories = story_hashes
            .iter()
            .filter_map(|h| script.library.get(h).cloned())
            .collect();
        Ok(StoriesPage {
            stories,
            ..Default::default()
        })
    }

    async fn unread_story_hashes(&self) -> ApiResult<UnreadHashes> {
        Ok(self.record("unread_story_hashes").unread_hashes.clone())
    }

    async fn starred_story_hashes(&self) -> ApiResult<Vec<String>> {
        Ok(self.record("starred_story_hashes").starred_hashes.clone())
    }

    async fn feed_unread_counts(&self, _feed_ids: &BTreeSet<String>) -> ApiResult<UnreadCountsResponse> {
        Ok(self.record("feed_unread_counts").unread_counts.clone())
    }

    async fn story_text(&self, _feed_id: &str, story_hash: &str) -> ApiResult<Option<String>> {
        let script = self.record("story_text");
        if let Some(error) = script.text_error.clone() {
            return Err(error);
        }
        Ok(script.texts.get(story_hash).cloned().flatten())
    }

    async fn execute_action(&self, action: &ReadingAction) -> ApiResult<ActionPayload> {
        let mut script = self.record("execute_action");
        if let Some(error) = script.action_error.clone() {
            return Err(error);
        }
        script.executed.push(action.clone());
        Ok(ActionPayload::None)
    }
}

/// Image cache that records what it was asked to fetch.
#[derive(Default)]
pub(crate) struct RecordingCache {
    fetched: Mutex<Vec<String>>,
}

impl RecordingCache {
    pub fn fetched(&self) -> Vec<String> {
        let mut fetched = lock(&self.fetched).clone();
        fetched.sort();
        fetched
    }
}

#[async_trait]
impl ImageCache for RecordingCache {
    async fn cache_file(&self, url: &str) -> Result<Option<PathBuf>> {
        lock(&self.fetched).push(url.to_string());
        Ok(Some(PathBuf::from(url)))
    }

    async fn cleanup_unused_and_old(&self, _: &HashSet<String>, _: Duration) -> Result<usize> {
        Ok(0)
    }
}

pub(crate) fn recording_caches() -> ImageCaches {
    ImageCaches {
        images: Arc::new(RecordingCache::default()),
        thumbnails: Arc::new(RecordingCache::default()),
    }
}

pub(crate) fn engine_with(api: MockApi) -> Arc<SyncEngine> {
    engine_with_config(api, Config::default())
}

pub(crate) fn engine_with_config(api: MockApi, config: Config) -> Arc<SyncEngine> {
    engine_with_caches(api, recording_caches(), config)
}

pub(crate) fn engine_with_caches(api: MockApi, caches: ImageCaches, config: Config) -> Arc<SyncEngine> {
    let store = LocalStore::in_memory().unwrap();
    SyncEngine::new(store, Arc::new(api), caches, config)
}
