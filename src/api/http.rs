use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE, COOKIE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::form_urlencoded::Serializer;
use url::Url;

use super::wire::{
    self, RawCommentResponse, RawFeedFolderResponse, RawStarredHashes, RawStoriesResponse,
    RawStoryText, RawUnreadCounts, RawUnreadHashes,
};
use super::{ActionPayload, ApiClient, FeedFolderResponse, UnreadCountsResponse, UnreadHashes};
use crate::app::{ApiError, ApiResult, Result};
use crate::config::ApiConfig;
use crate::domain::feedset::SOCIAL_FEED_PREFIX;
use crate::domain::{
    ClassifierKind, FeedSet, ReadFilter, ReadingAction, StoriesPage, StoryOrder,
};

type Params = Vec<(&'static str, String)>;

/// Which shape a successful action response carries.
enum Expected {
    Ack,
    Story,
    Comment(String),
}

/// `ApiClient` over the NewsBlur REST endpoints.
pub struct HttpApi {
    client: Client,
    base: Url,
    session_cookie: Option<String>,
}

impl HttpApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base: Url::parse(&config.base_url)?,
            session_cookie: config.session_cookie.clone(),
        })
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> ApiResult<Url> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| ApiError::Rejected(format!("bad path {}: {}", path, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Vec<u8>> {
        let request = match &self.session_cookie {
            Some(cookie) => {
                let value = HeaderValue::from_str(&format!("newsblur_sessionid={}", cookie))
                    .map_err(|e| ApiError::Rejected(format!("bad session cookie: {}", e)))?;
                request.header(COOKIE, value)
            }
            None => request,
        };

        let response = request.send().await?;
        if response.status() == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthenticated);
        }
        response.error_for_status_ref()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ApiResult<T> {
        let url = self.url(path, query)?;
        debug!("GET {}", url);
        let body = self.send(self.client.get(url)).await?;
        wire::parse(&body)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &[(&str, String)]) -> ApiResult<T> {
        let url = self.url(path, &[])?;
        debug!("POST {}", url);
        let body = {
            let mut body = Serializer::new(String::new());
            for (key, value) in form {
                body.append_pair(key, value);
            }
            body.finish()
        };
        let request = self
            .client
            .post(url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .body(body);
        let body = self.send(request).await?;
        wire::parse(&body)
    }
}

/// Path and query for one page of a feed set.
fn stories_request(
    fs: &FeedSet,
    page: u32,
    order: StoryOrder,
    read_filter: ReadFilter,
) -> ApiResult<(String, Params)> {
    let mut query: Params = vec![
        ("page", page.to_string()),
        ("order", order.as_param().to_string()),
        ("read_filter", read_filter.as_param().to_string()),
    ];
    if let Some(q) = fs.search_query() {
        query.push(("query", q.to_string()));
    }

    let path = match fs.base() {
        FeedSet::SingleFeed { feed_id } => format!("/reader/feed/{}", feed_id),
        FeedSet::MultipleFeeds { feed_ids } | FeedSet::Folder { feed_ids, .. } => {
            query.extend(feed_ids.iter().map(|id| ("feeds", id.clone())));
            "/reader/river_stories".to_string()
        }
        FeedSet::AllStories => "/reader/river_stories".to_string(),
        FeedSet::Infrequent => {
            query.push(("infrequent", "30".to_string()));
            "/reader/river_stories".to_string()
        }
        FeedSet::SingleSocialFeed { user_id, username } => {
            format!("/social/stories/{}/{}", user_id, username)
        }
        FeedSet::MultipleSocialFeeds { user_ids } => {
            query.extend(user_ids.iter().map(|id| ("social_user_ids", id.clone())));
            "/social/river_stories".to_string()
        }
        FeedSet::AllSocial => "/social/river_stories".to_string(),
        FeedSet::GlobalShared => {
            query.push(("global_feed", "true".to_string()));
            "/social/river_stories".to_string()
        }
        FeedSet::AllRead => "/reader/read_stories".to_string(),
        FeedSet::AllSaved => "/reader/starred_stories".to_string(),
        FeedSet::SavedTag { tag } => {
            query.push(("tag", tag.clone()));
            "/reader/starred_stories".to_string()
        }
        FeedSet::Search { .. } => {
            return Err(ApiError::Rejected("nested search feed set".to_string()));
        }
    };
    Ok((path, query))
}

fn millis_to_secs(ms: i64) -> String {
    (ms / 1000).to_string()
}

/// Endpoint, form and expected reply for an action.
fn action_request(action: &ReadingAction) -> ApiResult<(&'static str, Params, Expected)> {
    let request = match action {
        ReadingAction::MarkStoryRead { story_hash } => (
            "/reader/mark_story_hashes_as_read",
            vec![("story_hash", story_hash.clone())],
            Expected::Ack,
        ),
        ReadingAction::MarkFeedRead {
            feed_set,
            older_than,
            newer_than,
        } => {
            let mut form: Params = Vec::new();
            match feed_set.base() {
                FeedSet::AllStories if older_than.is_none() && newer_than.is_none() => {
                    return Ok(("/reader/mark_all_as_read", form, Expected::Ack));
                }
                FeedSet::AllStories => form.push(("feed_id", "river:".to_string())),
                FeedSet::AllSocial => form.push(("feed_id", "river:blurblogs".to_string())),
                FeedSet::GlobalShared => form.push(("feed_id", "river:global".to_string())),
                FeedSet::Infrequent => form.push(("feed_id", "river:infrequent".to_string())),
                FeedSet::AllRead | FeedSet::AllSaved | FeedSet::SavedTag { .. } => {
                    return Err(ApiError::Rejected(format!(
                        "cannot mark {} as read",
                        feed_set
                    )));
                }
                _ => {
                    form.extend(feed_set.flat_feed_ids().into_iter().map(|id| ("feed_id", id)));
                }
            }
            if let Some(ts) = older_than {
                form.push(("cutoff_timestamp", millis_to_secs(*ts)));
                form.push(("direction", "older".to_string()));
            }
            if let Some(ts) = newer_than {
                form.push(("cutoff_timestamp", millis_to_secs(*ts)));
                form.push(("direction", "newer".to_string()));
            }
            ("/reader/mark_feed_as_read", form, Expected::Ack)
        }
        ReadingAction::MarkStoryUnread { story_hash } => (
            "/reader/mark_story_hash_as_unread",
            vec![("story_hash", story_hash.clone())],
            Expected::Ack,
        ),
        ReadingAction::SaveStory {
            story_hash,
            user_tags,
        } => {
            let mut form = vec![("story_hash", story_hash.clone())];
            form.extend(user_tags.iter().map(|t| ("user_tags", t.clone())));
            ("/reader/mark_story_hash_as_starred", form, Expected::Ack)
        }
        ReadingAction::UnsaveStory { story_hash } => (
            "/reader/mark_story_hash_as_unstarred",
            vec![("story_hash", story_hash.clone())],
            Expected::Ack,
        ),
        ReadingAction::ShareStory {
            story_id,
            feed_id,
            source_user_id,
            comment,
            ..
        } => {
            let mut form = vec![
                ("story_id", story_id.clone()),
                ("feed_id", feed_id.clone()),
                ("comments", comment.clone().unwrap_or_default()),
            ];
            if let Some(source) = source_user_id {
                form.push(("source_user_id", source.clone()));
            }
            ("/social/share_story", form, Expected::Story)
        }
        ReadingAction::UnshareStory {
            story_id, feed_id, ..
        } => (
            "/social/unshare_story",
            vec![("story_id", story_id.clone()), ("story_feed_id", feed_id.clone())],
            Expected::Story,
        ),
        ReadingAction::LikeComment {
            story_id,
            comment_user_id,
            feed_id,
        }
        | ReadingAction::UnlikeComment {
            story_id,
            comment_user_id,
            feed_id,
        } => {
            let path = if matches!(action, ReadingAction::LikeComment { .. }) {
                "/social/like_comment"
            } else {
                "/social/remove_like_comment"
            };
            (
                path,
                vec![
                    ("story_id", story_id.clone()),
                    ("story_feed_id", feed_id.clone()),
                    ("comment_user_id", comment_user_id.clone()),
                ],
                Expected::Ack,
            )
        }
        ReadingAction::ReplyToComment {
            story_id,
            feed_id,
            comment_user_id,
            text,
        } => (
            "/social/save_comment_reply",
            vec![
                ("story_id", story_id.clone()),
                ("story_feed_id", feed_id.clone()),
                ("comment_user_id", comment_user_id.clone()),
                ("reply_comments", text.clone()),
            ],
            Expected::Comment(story_id.clone()),
        ),
        ReadingAction::EditReply {
            story_id,
            feed_id,
            comment_user_id,
            reply_id,
            text,
        } => (
            "/social/save_comment_reply",
            vec![
                ("story_id", story_id.clone()),
                ("story_feed_id", feed_id.clone()),
                ("comment_user_id", comment_user_id.clone()),
                ("reply_comments", text.clone()),
                ("reply_id", reply_id.clone()),
            ],
            Expected::Comment(story_id.clone()),
        ),
        ReadingAction::DeleteReply {
            story_id,
            feed_id,
            comment_user_id,
            reply_id,
        } => (
            "/social/remove_comment_reply",
            vec![
                ("story_id", story_id.clone()),
                ("story_feed_id", feed_id.clone()),
                ("comment_user_id", comment_user_id.clone()),
                ("reply_id", reply_id.clone()),
            ],
            Expected::Comment(story_id.clone()),
        ),
        ReadingAction::MuteFeeds {
            active_feed_ids,
            modified_feed_ids,
        } => (
            "/reader/save_feed_chooser",
            active_feed_ids
                .difference(modified_feed_ids)
                .map(|id| ("approved_feeds", id.clone()))
                .collect(),
            Expected::Ack,
        ),
        ReadingAction::UnmuteFeeds {
            active_feed_ids,
            modified_feed_ids,
        } => (
            "/reader/save_feed_chooser",
            active_feed_ids
                .union(modified_feed_ids)
                .map(|id| ("approved_feeds", id.clone()))
                .collect(),
            Expected::Ack,
        ),
        ReadingAction::SetNotify {
            feed_id,
            types,
            filter,
        } => {
            let mut form = vec![("feed_id", feed_id.clone())];
            form.extend(types.iter().map(|t| ("notification_types", t.clone())));
            if let Some(filter) = filter {
                form.push(("notification_filter", filter.clone()));
            }
            ("/notifications/feed/", form, Expected::Ack)
        }
        ReadingAction::InstaFetch { feed_id } => (
            "/rss_feeds/exception_retry",
            vec![("feed_id", feed_id.clone()), ("reset_fetch", "1".to_string())],
            Expected::Ack,
        ),
        ReadingAction::UpdateIntel {
            feed_id,
            classifier,
            ..
        } => {
            let mut form = vec![("feed_id", feed_id.clone())];
            for (kind, key, score) in classifier.entries() {
                let field = match (kind, score.signum()) {
                    (ClassifierKind::Title, 1) => "like_title",
                    (ClassifierKind::Title, -1) => "dislike_title",
                    (ClassifierKind::Title, _) => "remove_like_title",
                    (ClassifierKind::Author, 1) => "like_author",
                    (ClassifierKind::Author, -1) => "dislike_author",
                    (ClassifierKind::Author, _) => "remove_like_author",
                    (ClassifierKind::Tag, 1) => "like_tag",
                    (ClassifierKind::Tag, -1) => "dislike_tag",
                    (ClassifierKind::Tag, _) => "remove_like_tag",
                    (ClassifierKind::Feed, 1) => "like_feed",
                    (ClassifierKind::Feed, -1) => "dislike_feed",
                    (ClassifierKind::Feed, _) => "remove_like_feed",
                };
                form.push((field, key.to_string()));
            }
            ("/classifier/save", form, Expected::Ack)
        }
        ReadingAction::RenameFeed { feed_id, new_name } => (
            "/reader/rename_feed",
            vec![("feed_id", feed_id.clone()), ("feed_title", new_name.clone())],
            Expected::Ack,
        ),
    };
    Ok(request)
}

#[async_trait]
impl ApiClient for HttpApi {
    async fn feeds_and_folders(&self) -> ApiResult<FeedFolderResponse> {
        let raw: RawFeedFolderResponse = self
            .get(
                "/reader/feeds",
                &[("flat", "false".to_string()), ("update_counts", "false".to_string())],
            )
            .await?;
        Ok(raw.into())
    }

    async fn stories(
        &self,
        feed_set: &FeedSet,
        page: u32,
        order: StoryOrder,
        read_filter: ReadFilter,
    ) -> ApiResult<StoriesPage> {
        let (path, query) = stories_request(feed_set, page, order, read_filter)?;
        let raw: RawStoriesResponse = self.get(&path, &query).await?;
        Ok(raw.into())
    }

    async fn stories_by_hash(&self, story_hashes: &[String]) -> ApiResult<StoriesPage> {
        let mut query: Params = story_hashes.iter().map(|h| ("h", h.clone())).collect();
        query.push(("include_hidden", "true".to_string()));
        let raw: RawStoriesResponse = self.get("/reader/river_stories", &query).await?;
        Ok(raw.into())
    }

    async fn unread_story_hashes(&self) -> ApiResult<UnreadHashes> {
        let raw: RawUnreadHashes = self
            .get(
                "/reader/unread_story_hashes",
                &[("include_timestamps", "true".to_string())],
            )
            .await?;
        Ok(raw.into())
    }

    async fn starred_story_hashes(&self) -> ApiResult<Vec<String>> {
        let raw: RawStarredHashes = self.get("/reader/starred_story_hashes", &[]).await?;
        Ok(raw.starred_story_hashes)
    }

    async fn feed_unread_counts(
        &self,
        feed_ids: &BTreeSet<String>,
    ) -> ApiResult<UnreadCountsResponse> {
        let query: Params = feed_ids.iter().map(|id| ("feed_id", id.clone())).collect();
        let raw: RawUnreadCounts = self.get("/reader/feed_unread_count", &query).await?;
        let mut counts = UnreadCountsResponse::from(raw);
        // Social counts sometimes come back without their prefix.
        counts.social_feeds = std::mem::take(&mut counts.social_feeds)
            .into_iter()
            .map(|(id, c)| {
                if id.starts_with(SOCIAL_FEED_PREFIX) {
                    (id, c)
                } else {
                    (format!("{}{}", SOCIAL_FEED_PREFIX, id), c)
                }
            })
            .collect();
        Ok(counts)
    }

    async fn story_text(&self, feed_id: &str, story_hash: &str) -> ApiResult<Option<String>> {
        let raw: RawStoryText = self
            .get(
                "/rss_feeds/original_text",
                &[
                    ("story_hash", story_hash.to_string()),
                    ("feed_id", feed_id.to_string()),
                ],
            )
            .await?;
        Ok(raw.original_text)
    }

    async fn execute_action(&self, action: &ReadingAction) -> ApiResult<ActionPayload> {
        let (path, form, reply) = action_request(action)?;
        match reply {
            Expected::Ack => {
                let _: serde_json::Value = self.post(path, &form).await?;
                Ok(ActionPayload::None)
            }
            Expected::Story => {
                let raw: RawStoriesResponse = self.post(path, &form).await?;
                Ok(ActionPayload::Story(raw.into()))
            }
            Expected::Comment(story_id) => {
                let raw: RawCommentResponse = self.post(path, &form).await?;
                Ok(ActionPayload::Comment(raw.into_response(&story_id)))
            }
        }
    }
}
