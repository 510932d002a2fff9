mod http;
pub mod wire;

use std::collections::BTreeSet;

use async_trait::async_trait;

pub use http::HttpApi;
pub use wire::{FeedFolderResponse, UnreadCountsResponse, UnreadHashes};

use crate::app::ApiResult;
use crate::domain::{
    CommentResponse, FeedSet, ReadFilter, ReadingAction, StoriesPage, StoryOrder,
};

/// What the server sent back for a mutating action.
#[derive(Debug, Clone, Default)]
pub enum ActionPayload {
    /// Plain acknowledgement.
    #[default]
    None,
    /// The updated story, for share and unshare.
    Story(StoriesPage),
    /// The updated comment, for reply create/edit/delete.
    Comment(CommentResponse),
}

/// The remote NewsBlur API as seen by the sync engine.
///
/// Every call classifies its failure with [`crate::app::ApiError`] so the
/// engine can decide between retrying, surfacing and dropping.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn feeds_and_folders(&self) -> ApiResult<FeedFolderResponse>;

    /// One page (1-based) of stories for a feed set.
    async fn stories(
        &self,
        feed_set: &FeedSet,
        page: u32,
        order: StoryOrder,
        read_filter: ReadFilter,
    ) -> ApiResult<StoriesPage>;

    async fn stories_by_hash(&self, story_hashes: &[String]) -> ApiResult<StoriesPage>;

    async fn unread_story_hashes(&self) -> ApiResult<UnreadHashes>;

    async fn starred_story_hashes(&self) -> ApiResult<Vec<String>>;

    /// Fresh counts for feed ids, social ones carrying the `social:` prefix.
    async fn feed_unread_counts(&self, feed_ids: &BTreeSet<String>)
        -> ApiResult<UnreadCountsResponse>;

    /// Extracted article text, `None` when the server has none.
    async fn story_text(&self, feed_id: &str, story_hash: &str) -> ApiResult<Option<String>>;

    async fn execute_action(&self, action: &ReadingAction) -> ApiResult<ActionPayload>;
}
