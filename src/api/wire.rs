//! JSON shapes returned by the NewsBlur API and their conversion into
//! domain types.
//!
//! The server is loose about types: ids arrive as numbers or strings,
//! booleans as `0`/`1`, timestamps as strings of epoch seconds. The
//! `lenient` helpers absorb that so the rest of the crate never sees it.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;

use crate::app::{ApiError, ApiResult};
use crate::domain::feed::ROOT_FOLDER;
use crate::domain::story::infer_feed_id;
use crate::domain::{
    Classifier, ClassifierKind, Comment, CommentResponse, Feed, FeedCounts, Folder, Intelligence,
    Reply, SavedSearch, SocialFeed, StarredCount, StoriesPage, Story, UserProfile,
};

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn to_string(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn to_i64(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(to_string(&Value::deserialize(d)?).unwrap_or_default())
    }

    pub fn opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(to_string(&Value::deserialize(d)?).filter(|s| !s.is_empty()))
    }

    pub fn ids<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items.iter().filter_map(to_string).collect(),
            _ => Vec::new(),
        })
    }

    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(to_i64(&Value::deserialize(d)?).unwrap_or(0))
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(to_i64(&Value::deserialize(d)?).unwrap_or(0) != 0)
    }

    /// Epoch seconds to milliseconds.
    pub fn seconds<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(to_i64(&Value::deserialize(d)?).unwrap_or(0) * 1000)
    }

    pub fn strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        ids(d)
    }
}

/// Map the server's error conventions onto [`ApiError`].
pub fn check_envelope(value: &Value) -> ApiResult<()> {
    if value.get("authenticated").and_then(Value::as_bool) == Some(false) {
        return Err(ApiError::Unauthenticated);
    }
    let failed = value.get("result").and_then(Value::as_str) == Some("error")
        || value
            .get("code")
            .and_then(lenient::to_i64)
            .is_some_and(|c| c < 0);
    if failed {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| {
                value
                    .get("errors")
                    .and_then(Value::as_array)
                    .and_then(|e| e.first())
                    .and_then(lenient::to_string)
            })
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(ApiError::Declared(message));
    }
    Ok(())
}

pub fn parse<T: for<'de> Deserialize<'de>>(body: &[u8]) -> ApiResult<T> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ApiError::Protocol(format!("bad JSON: {}", e)))?;
    check_envelope(&value)?;
    serde_json::from_value(value).map_err(|e| ApiError::Protocol(format!("unexpected shape: {}", e)))
}

// Stories

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIntelligence {
    #[serde(deserialize_with = "lenient::int")]
    feed: i64,
    #[serde(deserialize_with = "lenient::int")]
    author: i64,
    #[serde(deserialize_with = "lenient::int")]
    tags: i64,
    #[serde(deserialize_with = "lenient::int")]
    title: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReply {
    #[serde(alias = "reply_id", deserialize_with = "lenient::id")]
    id: String,
    #[serde(deserialize_with = "lenient::id")]
    user_id: String,
    comments: String,
    #[serde(alias = "publish_date", deserialize_with = "lenient::seconds")]
    date: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawComment {
    #[serde(deserialize_with = "lenient::id")]
    id: String,
    #[serde(deserialize_with = "lenient::id")]
    story_id: String,
    #[serde(deserialize_with = "lenient::id")]
    user_id: String,
    comments: String,
    #[serde(alias = "shared_date", deserialize_with = "lenient::seconds")]
    date: i64,
    #[serde(alias = "likes_user_ids", deserialize_with = "lenient::ids")]
    liking_users: Vec<String>,
    #[serde(deserialize_with = "lenient::opt_id")]
    source_user_id: Option<String>,
    replies: Vec<RawReply>,
}

impl RawComment {
    pub(crate) fn into_comment(self, story_id: &str) -> Comment {
        let story_id = if self.story_id.is_empty() {
            story_id.to_string()
        } else {
            self.story_id
        };
        let id = if self.id.is_empty() {
            format!("{}{}", story_id, self.user_id)
        } else {
            self.id
        };
        let replies = self
            .replies
            .into_iter()
            .map(|r| Reply {
                id: r.id,
                comment_id: id.clone(),
                user_id: r.user_id,
                text: r.comments,
                date: r.date,
                is_placeholder: false,
            })
            .collect();
        Comment {
            is_pseudo: self.comments.is_empty(),
            id,
            story_id,
            user_id: self.user_id,
            text: self.comments,
            date: self.date,
            liking_users: self.liking_users,
            source_user_id: self.source_user_id,
            by_friend: false,
            is_placeholder: false,
            replies,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStory {
    #[serde(deserialize_with = "lenient::id")]
    story_hash: String,
    #[serde(rename = "id", deserialize_with = "lenient::id")]
    story_id: String,
    #[serde(deserialize_with = "lenient::id")]
    story_feed_id: String,
    story_title: String,
    story_authors: String,
    story_content: Option<String>,
    story_permalink: Option<String>,
    #[serde(deserialize_with = "lenient::seconds")]
    story_timestamp: i64,
    #[serde(deserialize_with = "lenient::flag")]
    read_status: bool,
    #[serde(deserialize_with = "lenient::flag")]
    starred: bool,
    #[serde(deserialize_with = "lenient::seconds")]
    starred_timestamp: i64,
    #[serde(deserialize_with = "lenient::seconds")]
    shared_timestamp: i64,
    #[serde(deserialize_with = "lenient::strings")]
    user_tags: Vec<String>,
    #[serde(deserialize_with = "lenient::strings")]
    story_tags: Vec<String>,
    #[serde(deserialize_with = "lenient::strings")]
    image_urls: Vec<String>,
    #[serde(alias = "image_thumbnail", deserialize_with = "lenient::opt_id")]
    thumbnail_url: Option<String>,
    #[serde(alias = "share_user_ids", deserialize_with = "lenient::ids")]
    shared_user_ids: Vec<String>,
    #[serde(deserialize_with = "lenient::ids")]
    friend_user_ids: Vec<String>,
    #[serde(deserialize_with = "lenient::opt_id")]
    social_user_id: Option<String>,
    intelligence: RawIntelligence,
    public_comments: Vec<RawComment>,
    friend_comments: Vec<RawComment>,
    friend_shares: Vec<RawComment>,
}

fn clamp(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

impl From<RawStory> for Story {
    fn from(raw: RawStory) -> Self {
        let feed_id = if raw.story_feed_id.is_empty() {
            infer_feed_id(&raw.story_hash).to_string()
        } else {
            raw.story_feed_id
        };
        let story_id = raw.story_id;
        let comments = |list: Vec<RawComment>| -> Vec<Comment> {
            list.into_iter().map(|c| c.into_comment(&story_id)).collect()
        };
        let public_comments = comments(raw.public_comments);
        let friends_comments = comments(raw.friend_comments);
        let friends_shares = comments(raw.friend_shares);

        Story {
            story_hash: raw.story_hash,
            story_id,
            feed_id,
            title: raw.story_title,
            authors: raw.story_authors,
            content: raw.story_content,
            permalink: raw.story_permalink,
            timestamp: raw.story_timestamp,
            read: raw.read_status,
            starred: raw.starred,
            starred_timestamp: raw.starred_timestamp,
            last_read_timestamp: 0,
            shared_timestamp: raw.shared_timestamp,
            user_tags: raw.user_tags,
            tags: raw.story_tags,
            image_urls: raw.image_urls,
            thumbnail_url: raw.thumbnail_url,
            shared_user_ids: raw.shared_user_ids,
            friend_user_ids: raw.friend_user_ids,
            social_user_id: raw.social_user_id,
            intelligence: Intelligence {
                feed: clamp(raw.intelligence.feed),
                author: clamp(raw.intelligence.author),
                tags: clamp(raw.intelligence.tags),
                title: clamp(raw.intelligence.title),
            },
            infrequent: false,
            search_hit: None,
            public_comments,
            friends_comments,
            friends_shares,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawUser {
    #[serde(deserialize_with = "lenient::id")]
    user_id: String,
    username: String,
    photo_url: Option<String>,
    location: Option<String>,
}

impl From<RawUser> for UserProfile {
    fn from(raw: RawUser) -> Self {
        UserProfile {
            user_id: raw.user_id,
            username: raw.username,
            photo_url: raw.photo_url,
            location: raw.location,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFeed {
    #[serde(deserialize_with = "lenient::id")]
    id: String,
    feed_title: String,
    feed_address: Option<String>,
    favicon_url: Option<String>,
    active: Option<bool>,
    #[serde(deserialize_with = "lenient::int")]
    ps: i64,
    #[serde(deserialize_with = "lenient::int")]
    nt: i64,
    #[serde(deserialize_with = "lenient::int")]
    ng: i64,
    notification_filter: Option<String>,
    #[serde(deserialize_with = "lenient::strings")]
    notification_types: Vec<String>,
}

impl RawFeed {
    fn into_feed(self, fallback_id: &str) -> Feed {
        Feed {
            feed_id: if self.id.is_empty() {
                fallback_id.to_string()
            } else {
                self.id
            },
            title: self.feed_title,
            address: self.feed_address,
            favicon_url: self.favicon_url,
            active: self.active.unwrap_or(true),
            counts: FeedCounts {
                positive: self.ps,
                neutral: self.nt,
                negative: self.ng,
            },
            fetch_pending: false,
            notification_filter: self.notification_filter,
            notification_types: self.notification_types,
        }
    }
}

fn parse_classifier(value: &Value) -> Classifier {
    let mut classifier = Classifier::default();
    for (field, kind) in [
        ("titles", ClassifierKind::Title),
        ("authors", ClassifierKind::Author),
        ("tags", ClassifierKind::Tag),
        ("feeds", ClassifierKind::Feed),
    ] {
        if let Some(rules) = value.get(field).and_then(Value::as_object) {
            for (key, score) in rules {
                if let Some(score) = lenient::to_i64(score) {
                    classifier.set(kind, key.clone(), clamp(score));
                }
            }
        }
    }
    classifier
}

/// Classifiers come either keyed by feed id, or as a single bare
/// classifier for the requested feed, which is filed under `"-1"`.
fn parse_classifiers(value: &Value) -> HashMap<String, Classifier> {
    let Some(object) = value.as_object() else {
        return HashMap::new();
    };
    let bare = ["titles", "authors", "tags", "feeds"]
        .iter()
        .any(|k| object.contains_key(*k));
    if bare {
        return HashMap::from([("-1".to_string(), parse_classifier(value))]);
    }
    object
        .iter()
        .map(|(feed_id, v)| {
            let mut classifier = parse_classifier(v);
            classifier.feed_id = feed_id.clone();
            (feed_id.clone(), classifier)
        })
        .collect()
}

/// `[["tag", 3], ["other", 1]]` keeps the first element of each pair.
fn first_elements(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Array(pair) => pair.first().and_then(lenient::to_string),
                    other => lenient::to_string(other),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawStoriesResponse {
    stories: Vec<RawStory>,
    story: Option<RawStory>,
    user_profiles: Vec<RawUser>,
    feeds: Value,
    classifiers: Value,
    feed_tags: Value,
    feed_authors: Value,
}

impl From<RawStoriesResponse> for StoriesPage {
    fn from(raw: RawStoriesResponse) -> Self {
        let feeds = match raw.feeds {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| serde_json::from_value::<RawFeed>(v).ok())
                .map(|f| f.into_feed(""))
                .filter(|f| !f.feed_id.is_empty())
                .collect(),
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(id, v)| {
                    serde_json::from_value::<RawFeed>(v)
                        .ok()
                        .map(|f| f.into_feed(&id))
                })
                .collect(),
            _ => Vec::new(),
        };
        StoriesPage {
            stories: raw.stories.into_iter().map(Story::from).collect(),
            story: raw.story.map(Story::from),
            users: raw.user_profiles.into_iter().map(UserProfile::from).collect(),
            feeds,
            classifiers: parse_classifiers(&raw.classifiers),
            feed_tags: first_elements(&raw.feed_tags),
            feed_authors: first_elements(&raw.feed_authors),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawCommentResponse {
    comment: RawComment,
    user_profiles: Vec<RawUser>,
}

impl RawCommentResponse {
    pub(crate) fn into_response(self, story_id: &str) -> CommentResponse {
        CommentResponse {
            comment: self.comment.into_comment(story_id),
            users: self.user_profiles.into_iter().map(UserProfile::from).collect(),
        }
    }
}

// Feeds and folders

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSocialFeed {
    #[serde(deserialize_with = "lenient::id")]
    user_id: String,
    username: String,
    feed_title: String,
    photo_url: Option<String>,
    #[serde(deserialize_with = "lenient::int")]
    ps: i64,
    #[serde(deserialize_with = "lenient::int")]
    nt: i64,
    #[serde(deserialize_with = "lenient::int")]
    ng: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStarredCount {
    #[serde(deserialize_with = "lenient::opt_id")]
    tag: Option<String>,
    #[serde(deserialize_with = "lenient::opt_id")]
    feed_id: Option<String>,
    #[serde(deserialize_with = "lenient::int")]
    count: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSavedSearch {
    #[serde(deserialize_with = "lenient::id")]
    feed_id: String,
    query: String,
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawFeedFolderResponse {
    feeds: BTreeMap<String, RawFeed>,
    social_feeds: Vec<RawSocialFeed>,
    folders: Vec<Value>,
    starred_counts: Vec<RawStarredCount>,
    #[serde(deserialize_with = "lenient::int")]
    starred_count: i64,
    saved_searches: Vec<RawSavedSearch>,
    is_premium: bool,
    is_archive: bool,
    is_staff: bool,
}

/// Account-wide feed and folder listing.
#[derive(Debug, Clone, Default)]
pub struct FeedFolderResponse {
    pub feeds: Vec<Feed>,
    pub social_feeds: Vec<SocialFeed>,
    pub folders: Vec<Folder>,
    pub starred_counts: Vec<StarredCount>,
    pub starred_count: i64,
    pub saved_searches: Vec<SavedSearch>,
    pub is_premium: bool,
    pub is_archive: bool,
    pub is_staff: bool,
}

impl From<RawFeedFolderResponse> for FeedFolderResponse {
    fn from(raw: RawFeedFolderResponse) -> Self {
        let mut folders = Vec::new();
        flatten_folders(ROOT_FOLDER, None, &raw.folders, &mut folders);
        FeedFolderResponse {
            feeds: raw
                .feeds
                .into_iter()
                .map(|(id, f)| f.into_feed(&id))
                .collect(),
            social_feeds: raw
                .social_feeds
                .into_iter()
                .map(|s| SocialFeed {
                    user_id: s.user_id,
                    username: s.username,
                    title: s.feed_title,
                    photo_url: s.photo_url,
                    counts: FeedCounts {
                        positive: s.ps,
                        neutral: s.nt,
                        negative: s.ng,
                    },
                })
                .collect(),
            folders,
            starred_counts: raw
                .starred_counts
                .into_iter()
                .map(|c| StarredCount {
                    tag: c.tag,
                    feed_id: c.feed_id,
                    count: c.count,
                })
                .collect(),
            starred_count: raw.starred_count,
            saved_searches: raw
                .saved_searches
                .into_iter()
                .map(|s| SavedSearch {
                    feed_id: s.feed_id,
                    query: s.query,
                    title: s.title,
                })
                .collect(),
            is_premium: raw.is_premium,
            is_archive: raw.is_archive,
            is_staff: raw.is_staff,
        }
    }
}

/// Flatten the nested folder JSON into named folders.
///
/// Entries are feed ids or single-key objects naming a subfolder. Nested
/// folders are named `Parent - Child`; top-level ones keep their own name.
/// Folders are emitted parent first.
pub fn flatten_folders(name: &str, parent: Option<&str>, entries: &[Value], out: &mut Vec<Folder>) {
    let mut folder = Folder::new(name);
    let index = out.len();
    out.push(Folder::default());

    for entry in entries {
        match entry {
            Value::Object(children) => {
                for (child_name, child_entries) in children {
                    let full_name = match parent {
                        Some(_) => format!("{} - {}", name, child_name),
                        None => child_name.clone(),
                    };
                    folder.children.push(full_name.clone());
                    let child_entries = child_entries.as_array().map(Vec::as_slice).unwrap_or(&[]);
                    flatten_folders(&full_name, Some(name), child_entries, out);
                }
            }
            other => {
                if let Some(id) = lenient::to_string(other) {
                    folder.feed_ids.push(id);
                }
            }
        }
    }
    out[index] = folder;
}

// Hashes and counts

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawUnreadHashes {
    unread_feed_story_hashes: BTreeMap<String, Vec<Value>>,
}

/// Unread story hashes per feed with their timestamps in milliseconds.
pub type UnreadHashes = BTreeMap<String, Vec<(String, i64)>>;

impl From<RawUnreadHashes> for UnreadHashes {
    fn from(raw: RawUnreadHashes) -> Self {
        raw.unread_feed_story_hashes
            .into_iter()
            .map(|(feed_id, entries)| {
                let hashes = entries
                    .iter()
                    .filter_map(|entry| match entry {
                        Value::Array(pair) => {
                            let hash = pair.first().and_then(lenient::to_string)?;
                            let ts = pair.get(1).and_then(lenient::to_i64).unwrap_or(0);
                            Some((hash, ts * 1000))
                        }
                        other => lenient::to_string(other).map(|h| (h, 0)),
                    })
                    .collect();
                (feed_id, hashes)
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawStarredHashes {
    #[serde(deserialize_with = "lenient::ids")]
    pub starred_story_hashes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCounts {
    #[serde(deserialize_with = "lenient::int")]
    ps: i64,
    #[serde(deserialize_with = "lenient::int")]
    nt: i64,
    #[serde(deserialize_with = "lenient::int")]
    ng: i64,
}

impl From<RawCounts> for FeedCounts {
    fn from(raw: RawCounts) -> Self {
        FeedCounts {
            positive: raw.ps,
            neutral: raw.nt,
            negative: raw.ng,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawUnreadCounts {
    feeds: BTreeMap<String, RawCounts>,
    social_feeds: BTreeMap<String, RawCounts>,
}

/// Fresh server counts; social feed keys keep their `social:` prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnreadCountsResponse {
    pub feeds: BTreeMap<String, FeedCounts>,
    pub social_feeds: BTreeMap<String, FeedCounts>,
}

impl From<RawUnreadCounts> for UnreadCountsResponse {
    fn from(raw: RawUnreadCounts) -> Self {
        UnreadCountsResponse {
            feeds: raw.feeds.into_iter().map(|(k, v)| (k, v.into())).collect(),
            social_feeds: raw
                .social_feeds
                .into_iter()
                .map(|(k, v)| (k, v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawStoryText {
    pub original_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_story_conversion_is_lenient() {
        let raw: RawStoriesResponse = serde_json::from_value(json!({
            "stories": [{
                "story_hash": "42:abc",
                "id": "guid-1",
                "story_feed_id": 42,
                "story_title": "Hello",
                "story_timestamp": "1700000000",
                "read_status": 1,
                "starred": false,
                "intelligence": {"feed": 1, "author": 0, "tags": "0", "title": -1},
                "share_user_ids": [7, "8"],
                "friend_comments": [{"user_id": 7, "comments": "great", "replies": [{"reply_id": "r1", "user_id": 3, "comments": "yes"}]}]
            }],
            "user_profiles": [{"user_id": 7, "username": "seven"}],
            "classifiers": {"titles": {"rust": 1}},
            "feed_tags": [["lang", 4], ["rust", 2]]
        }))
        .unwrap();
        let page = StoriesPage::from(raw);

        let story = &page.stories[0];
        assert_eq!(story.feed_id, "42");
        assert_eq!(story.timestamp, 1_700_000_000_000);
        assert!(story.read);
        assert_eq!(story.intelligence.total(), -1);
        assert_eq!(story.shared_user_ids, vec!["7", "8"]);
        let comment = &story.friends_comments[0];
        assert_eq!(comment.story_id, "guid-1");
        assert_eq!(comment.replies[0].comment_id, comment.id);

        assert_eq!(page.users[0].user_id, "7");
        assert!(page.classifiers.contains_key("-1"));
        assert_eq!(page.feed_tags, vec!["lang", "rust"]);
    }

    #[test]
    fn test_flatten_nested_folders() {
        let entries = json!([1, 2, {"Tech": [3, {"Rust": [4]}]}, {"News": []}]);
        let mut folders = Vec::new();
        flatten_folders(ROOT_FOLDER, None, entries.as_array().unwrap(), &mut folders);

        let names: Vec<&str> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec![ROOT_FOLDER, "Tech", "Tech - Rust", "News"]);
        assert_eq!(folders[0].feed_ids, vec!["1", "2"]);
        assert_eq!(folders[0].children, vec!["Tech", "News"]);
        assert_eq!(folders[1].children, vec!["Tech - Rust"]);
        assert_eq!(folders[2].feed_ids, vec!["4"]);
    }

    #[test]
    fn test_envelope_errors() {
        assert_eq!(
            check_envelope(&json!({"authenticated": false})),
            Err(ApiError::Unauthenticated)
        );
        assert_eq!(
            check_envelope(&json!({"code": -1, "message": "Nope"})),
            Err(ApiError::Declared("Nope".into()))
        );
        assert_eq!(
            check_envelope(&json!({"result": "error", "errors": ["Bad"]})),
            Err(ApiError::Declared("Bad".into()))
        );
        assert!(check_envelope(&json!({"result": "ok"})).is_ok());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse::<RawStoryText>(b"<html>").unwrap_err();
        assert!(matches!(err, ApiError::Protocol(_)));
    }

    #[test]
    fn test_unread_hashes_with_and_without_timestamps() {
        let raw: RawUnreadHashes = serde_json::from_value(json!({
            "unread_feed_story_hashes": {"1": [["1:a", 10]], "2": ["2:b"]}
        }))
        .unwrap();
        let hashes = UnreadHashes::from(raw);
        assert_eq!(hashes["1"], vec![("1:a".to_string(), 10_000)]);
        assert_eq!(hashes["2"], vec![("2:b".to_string(), 0)]);
    }

    #[test]
    fn test_feed_folder_response() {
        let raw: RawFeedFolderResponse = serde_json::from_value(json!({
            "feeds": {"1": {"id": 1, "feed_title": "One", "ps": 1, "nt": 2, "ng": 0, "active": false}},
            "social_feeds": [{"user_id": 9, "username": "nine", "feed_title": "Nine"}],
            "folders": [1],
            "starred_count": 3,
            "is_premium": true
        }))
        .unwrap();
        let resp = FeedFolderResponse::from(raw);
        assert_eq!(resp.feeds[0].feed_id, "1");
        assert!(!resp.feeds[0].active);
        assert_eq!(resp.feeds[0].counts.neutral, 2);
        assert_eq!(resp.social_feeds[0].user_id, "9");
        assert_eq!(resp.folders[0].feed_ids, vec!["1"]);
        assert_eq!(resp.starred_count, 3);
        assert!(resp.is_premium);
    }
}
