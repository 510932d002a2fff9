use serde::{Deserialize, Serialize};

/// Prefix marking locally fabricated comments and replies.
pub const PLACEHOLDER_PREFIX: &str = "PLACEHOLDER";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub story_id: String,
    pub user_id: String,
    pub text: String,
    /// Milliseconds since the epoch.
    pub date: i64,
    pub liking_users: Vec<String>,
    pub source_user_id: Option<String>,
    pub by_friend: bool,
    /// A share without comment text.
    pub is_pseudo: bool,
    pub is_placeholder: bool,
    #[serde(default)]
    pub replies: Vec<Reply>,
}

impl Comment {
    /// A local stand-in shown until the server's version arrives.
    pub fn placeholder(story_id: &str, user_id: &str, text: Option<&str>, now: i64) -> Self {
        let text = text.unwrap_or_default().to_string();
        Self {
            id: format!("{}{}{}", PLACEHOLDER_PREFIX, story_id, user_id),
            story_id: story_id.to_string(),
            user_id: user_id.to_string(),
            is_pseudo: text.is_empty(),
            text,
            date: now,
            by_friend: true,
            is_placeholder: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub comment_id: String,
    pub user_id: String,
    pub text: String,
    pub date: i64,
    pub is_placeholder: bool,
}

impl Reply {
    pub fn placeholder(
        story_id: &str,
        comment_id: &str,
        user_id: &str,
        text: &str,
        now: i64,
    ) -> Self {
        Self {
            id: format!("{}{}{}{}", PLACEHOLDER_PREFIX, story_id, comment_id, user_id),
            comment_id: comment_id.to_string(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            date: now,
            is_placeholder: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub photo_url: Option<String>,
    pub location: Option<String>,
}

/// Answer to a reply create/edit/delete: the whole updated comment.
#[derive(Debug, Clone, Default)]
pub struct CommentResponse {
    pub comment: Comment,
    pub users: Vec<UserProfile>,
}
