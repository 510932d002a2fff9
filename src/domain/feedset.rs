use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix used when social feeds share an id space with normal feeds.
pub const SOCIAL_FEED_PREFIX: &str = "social:";

/// A selector naming a logical set of stories.
///
/// Every reading surface (a single feed, a folder, the global river, saved
/// stories, ...) is described by one of these. Two sets are the same
/// selector exactly when they compare equal, which is what pagination and
/// session bookkeeping rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedSet {
    SingleFeed {
        feed_id: String,
    },
    MultipleFeeds {
        feed_ids: BTreeSet<String>,
    },
    Folder {
        name: String,
        feed_ids: BTreeSet<String>,
    },
    SingleSocialFeed {
        user_id: String,
        username: String,
    },
    MultipleSocialFeeds {
        user_ids: BTreeSet<String>,
    },
    AllStories,
    AllSocial,
    AllRead,
    AllSaved,
    Infrequent,
    GlobalShared,
    SavedTag {
        tag: String,
    },
    Search {
        within: Box<FeedSet>,
        query: String,
    },
}

impl FeedSet {
    pub fn single_feed(feed_id: impl Into<String>) -> Self {
        FeedSet::SingleFeed {
            feed_id: feed_id.into(),
        }
    }

    pub fn multiple_feeds<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FeedSet::MultipleFeeds {
            feed_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single_social(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        FeedSet::SingleSocialFeed {
            user_id: user_id.into(),
            username: username.into(),
        }
    }

    pub fn search(within: FeedSet, query: impl Into<String>) -> Self {
        FeedSet::Search {
            within: Box::new(within),
            query: query.into(),
        }
    }

    /// The selector with any search wrapper peeled off.
    pub fn base(&self) -> &FeedSet {
        match self {
            FeedSet::Search { within, .. } => within.base(),
            other => other,
        }
    }

    pub fn search_query(&self) -> Option<&str> {
        match self {
            FeedSet::Search { query, .. } => Some(query.as_str()),
            _ => None,
        }
    }

    /// Normal feed ids covered by this set, if it is feed-scoped.
    pub fn feed_ids(&self) -> Option<BTreeSet<String>> {
        match self.base() {
            FeedSet::SingleFeed { feed_id } => Some(BTreeSet::from([feed_id.clone()])),
            FeedSet::MultipleFeeds { feed_ids } | FeedSet::Folder { feed_ids, .. } => {
                Some(feed_ids.clone())
            }
            _ => None,
        }
    }

    /// Social user ids covered by this set, if it is social-scoped.
    pub fn social_user_ids(&self) -> Option<BTreeSet<String>> {
        match self.base() {
            FeedSet::SingleSocialFeed { user_id, .. } => Some(BTreeSet::from([user_id.clone()])),
            FeedSet::MultipleSocialFeeds { user_ids } => Some(user_ids.clone()),
            _ => None,
        }
    }

    /// Every concrete feed id the set names, with social feeds prefixed.
    ///
    /// Aggregate sets such as `AllStories` name no concrete feeds and yield
    /// an empty set.
    pub fn flat_feed_ids(&self) -> BTreeSet<String> {
        let mut ids = self.feed_ids().unwrap_or_default();
        if let Some(users) = self.social_user_ids() {
            ids.extend(
                users
                    .into_iter()
                    .map(|u| format!("{}{}", SOCIAL_FEED_PREFIX, u)),
            );
        }
        ids
    }

    pub fn single_feed_id(&self) -> Option<&str> {
        match self.base() {
            FeedSet::SingleFeed { feed_id } => Some(feed_id.as_str()),
            _ => None,
        }
    }

    /// Saved-story sets ignore read state and carry no unread counts.
    pub fn is_saved(&self) -> bool {
        matches!(self.base(), FeedSet::AllSaved | FeedSet::SavedTag { .. })
    }

    /// Compact, stable serialization used for persisted markers.
    pub fn to_compact(&self) -> String {
        // Serializing a plain enum with string keys cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_compact(s: &str) -> Option<FeedSet> {
        serde_json::from_str(s).ok()
    }
}

impl fmt::Display for FeedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedSet::SingleFeed { feed_id } => write!(f, "feed:{}", feed_id),
            FeedSet::MultipleFeeds { feed_ids } => write!(f, "feeds:{}", feed_ids.len()),
            FeedSet::Folder { name, .. } => write!(f, "folder:{}", name),
            FeedSet::SingleSocialFeed { user_id, .. } => write!(f, "social:{}", user_id),
            FeedSet::MultipleSocialFeeds { user_ids } => write!(f, "socials:{}", user_ids.len()),
            FeedSet::AllStories => write!(f, "all"),
            FeedSet::AllSocial => write!(f, "all-social"),
            FeedSet::AllRead => write!(f, "read"),
            FeedSet::AllSaved => write!(f, "saved"),
            FeedSet::Infrequent => write!(f, "infrequent"),
            FeedSet::GlobalShared => write!(f, "global-shared"),
            FeedSet::SavedTag { tag } => write!(f, "saved:{}", tag),
            FeedSet::Search { within, query } => write!(f, "{} ?{}", within, query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_feed_ids_prefixes_social() {
        let fs = FeedSet::MultipleSocialFeeds {
            user_ids: BTreeSet::from(["7".to_string(), "9".to_string()]),
        };
        let ids: Vec<String> = fs.flat_feed_ids().into_iter().collect();
        assert_eq!(ids, vec!["social:7", "social:9"]);
    }

    #[test]
    fn test_flat_feed_ids_empty_for_aggregates() {
        assert!(FeedSet::AllStories.flat_feed_ids().is_empty());
        assert!(FeedSet::AllSaved.flat_feed_ids().is_empty());
    }

    #[test]
    fn test_search_delegates_to_base() {
        let fs = FeedSet::search(FeedSet::single_feed("42"), "rust");
        assert_eq!(fs.single_feed_id(), Some("42"));
        assert_eq!(fs.search_query(), Some("rust"));
        assert_eq!(fs.flat_feed_ids().len(), 1);
    }

    #[test]
    fn test_compact_form_is_stable() {
        let fs = FeedSet::multiple_feeds(["3", "1", "2"]);
        let again = FeedSet::multiple_feeds(["2", "3", "1"]);
        assert_eq!(fs.to_compact(), again.to_compact());
        assert_eq!(FeedSet::from_compact(&fs.to_compact()), Some(fs));
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(FeedSet::single_feed("1"), FeedSet::single_feed("1"));
        assert_ne!(
            FeedSet::single_feed("1"),
            FeedSet::search(FeedSet::single_feed("1"), "x")
        );
    }
}
