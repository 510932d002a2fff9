use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::classifier::Classifier;
use crate::domain::feedset::FeedSet;

/// Version stamped on every persisted action.
pub const ACTION_SCHEMA_VERSION: u32 = 1;

/// A user intent that must reach the server.
///
/// Each action is applied to the local store as soon as it is queued and
/// applied again after the server confirms it, so every local effect here
/// is idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadingAction {
    MarkStoryRead {
        story_hash: String,
    },
    MarkFeedRead {
        feed_set: FeedSet,
        older_than: Option<i64>,
        newer_than: Option<i64>,
    },
    MarkStoryUnread {
        story_hash: String,
    },
    SaveStory {
        story_hash: String,
        #[serde(default)]
        user_tags: Vec<String>,
    },
    UnsaveStory {
        story_hash: String,
    },
    ShareStory {
        story_hash: String,
        story_id: String,
        feed_id: String,
        source_user_id: Option<String>,
        comment: Option<String>,
    },
    UnshareStory {
        story_hash: String,
        story_id: String,
        feed_id: String,
    },
    LikeComment {
        story_id: String,
        comment_user_id: String,
        feed_id: String,
    },
    UnlikeComment {
        story_id: String,
        comment_user_id: String,
        feed_id: String,
    },
    ReplyToComment {
        story_id: String,
        feed_id: String,
        comment_user_id: String,
        text: String,
    },
    EditReply {
        story_id: String,
        feed_id: String,
        comment_user_id: String,
        reply_id: String,
        text: String,
    },
    DeleteReply {
        story_id: String,
        feed_id: String,
        comment_user_id: String,
        reply_id: String,
    },
    MuteFeeds {
        active_feed_ids: BTreeSet<String>,
        modified_feed_ids: BTreeSet<String>,
    },
    UnmuteFeeds {
        active_feed_ids: BTreeSet<String>,
        modified_feed_ids: BTreeSet<String>,
    },
    SetNotify {
        feed_id: String,
        types: Vec<String>,
        filter: Option<String>,
    },
    InstaFetch {
        feed_id: String,
    },
    UpdateIntel {
        feed_id: String,
        classifier: Classifier,
        feed_set: FeedSet,
    },
    RenameFeed {
        feed_id: String,
        new_name: String,
    },
}

impl ReadingAction {
    pub fn mark_story_read(story_hash: impl Into<String>) -> Self {
        ReadingAction::MarkStoryRead {
            story_hash: story_hash.into(),
        }
    }

    pub fn mark_story_unread(story_hash: impl Into<String>) -> Self {
        ReadingAction::MarkStoryUnread {
            story_hash: story_hash.into(),
        }
    }

    pub fn mark_feed_read(feed_set: FeedSet, older_than: Option<i64>, newer_than: Option<i64>) -> Self {
        ReadingAction::MarkFeedRead {
            feed_set,
            older_than,
            newer_than,
        }
    }

    pub fn save_story(story_hash: impl Into<String>, user_tags: Vec<String>) -> Self {
        ReadingAction::SaveStory {
            story_hash: story_hash.into(),
            user_tags,
        }
    }

    pub fn unsave_story(story_hash: impl Into<String>) -> Self {
        ReadingAction::UnsaveStory {
            story_hash: story_hash.into(),
        }
    }

    /// Short machine name used in logs and listings.
    pub fn kind(&self) -> &'static str {
        match self {
            ReadingAction::MarkStoryRead { .. } | ReadingAction::MarkFeedRead { .. } => "mark_read",
            ReadingAction::MarkStoryUnread { .. } => "mark_unread",
            ReadingAction::SaveStory { .. } => "save",
            ReadingAction::UnsaveStory { .. } => "unsave",
            ReadingAction::ShareStory { .. } => "share",
            ReadingAction::UnshareStory { .. } => "unshare",
            ReadingAction::LikeComment { .. } => "like_comment",
            ReadingAction::UnlikeComment { .. } => "unlike_comment",
            ReadingAction::ReplyToComment { .. } => "reply",
            ReadingAction::EditReply { .. } => "edit_reply",
            ReadingAction::DeleteReply { .. } => "delete_reply",
            ReadingAction::MuteFeeds { .. } => "mute_feeds",
            ReadingAction::UnmuteFeeds { .. } => "unmute_feeds",
            ReadingAction::SetNotify { .. } => "set_notify",
            ReadingAction::InstaFetch { .. } => "insta_fetch",
            ReadingAction::UpdateIntel { .. } => "update_intel",
            ReadingAction::RenameFeed { .. } => "rename_feed",
        }
    }

    /// Actions whose local effect must not be re-applied after the server
    /// confirms them, because the confirmed payload supersedes it.
    pub fn skips_followup(&self) -> bool {
        matches!(
            self,
            ReadingAction::ShareStory { .. }
                | ReadingAction::ReplyToComment { .. }
                | ReadingAction::InstaFetch { .. }
        )
    }

    /// Serialize into the versioned envelope stored in the queue.
    pub fn encode(&self) -> Result<String, ActionCodecError> {
        let envelope = Envelope {
            v: ACTION_SCHEMA_VERSION,
            action: self.clone(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    pub fn decode(params: &str) -> Result<Self, ActionCodecError> {
        let value: serde_json::Value = serde_json::from_str(params)?;
        let version = value
            .get("v")
            .and_then(|v| v.as_u64())
            .ok_or(ActionCodecError::MissingVersion)?;
        if version != u64::from(ACTION_SCHEMA_VERSION) {
            return Err(ActionCodecError::UnknownVersion(version));
        }
        let envelope: Envelope = serde_json::from_value(value)?;
        Ok(envelope.action)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u32,
    action: ReadingAction,
}

#[derive(Debug, thiserror::Error)]
pub enum ActionCodecError {
    #[error("malformed action: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("action has no schema version")]
    MissingVersion,

    #[error("unknown action schema version {0}")]
    UnknownVersion(u64),
}

/// A raw row from the durable action queue.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub id: i64,
    /// Enqueue time, milliseconds since the epoch.
    pub time: i64,
    pub tried: u32,
    pub params: String,
}

impl ActionRecord {
    pub fn decode(&self) -> Result<QueuedAction, ActionCodecError> {
        Ok(QueuedAction {
            id: self.id,
            time: self.time,
            tried: self.tried,
            action: ReadingAction::decode(&self.params)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAction {
    pub id: i64,
    pub time: i64,
    pub tried: u32,
    pub action: ReadingAction,
}
