use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::classifier::Classifier;
use crate::domain::feed::Feed;
use crate::domain::filters::StateFilter;
use crate::domain::social::{Comment, UserProfile};

static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>"#)
        .expect("img pattern is valid")
});

/// Per-dimension classifier scores for a story.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intelligence {
    pub feed: i32,
    pub author: i32,
    pub tags: i32,
    pub title: i32,
}

impl Intelligence {
    /// Collapse the per-dimension scores into one number.
    ///
    /// Any positive author/tag/title score wins, then any negative one, and
    /// only when those are all neutral does the feed score decide.
    pub fn total(&self) -> i32 {
        let max = 0.max(self.author).max(self.tags).max(self.title);
        if max > 0 {
            return max;
        }
        let min = 0.min(self.author).min(self.tags).min(self.title);
        if min < 0 {
            return min;
        }
        self.feed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub story_hash: String,
    pub story_id: String,
    pub feed_id: String,
    pub title: String,
    pub authors: String,
    pub content: Option<String>,
    pub permalink: Option<String>,
    /// Publication time, milliseconds since the epoch.
    pub timestamp: i64,
    pub read: bool,
    pub starred: bool,
    pub starred_timestamp: i64,
    pub last_read_timestamp: i64,
    pub shared_timestamp: i64,
    pub user_tags: Vec<String>,
    pub tags: Vec<String>,
    pub image_urls: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub shared_user_ids: Vec<String>,
    pub friend_user_ids: Vec<String>,
    pub social_user_id: Option<String>,
    pub intelligence: Intelligence,
    pub infrequent: bool,
    pub search_hit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub friends_comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub friends_shares: Vec<Comment>,
}

impl Story {
    pub fn is_visible_in(&self, state: StateFilter) -> bool {
        state.admits(self.intelligence.total(), self.starred)
    }

    /// Best guess at a thumbnail when the server did not name one.
    pub fn guess_thumbnail_url(&self) -> Option<String> {
        if let Some(url) = self.thumbnail_url.as_ref().filter(|u| !u.is_empty()) {
            return Some(url.clone());
        }
        if let Some(url) = self.image_urls.first() {
            return Some(url.clone());
        }
        self.content
            .as_deref()
            .and_then(|c| image_sources(c).into_iter().next())
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            "(Untitled)"
        } else {
            &self.title
        }
    }
}

/// Extract the `src` of every `<img>` tag in an HTML fragment.
pub fn image_sources(html: &str) -> Vec<String> {
    IMG_TAG
        .captures_iter(html)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| html_escape::decode_html_entities(m.as_str()).to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Story hashes are `<feed_id>:<hash>`; recover the feed id.
pub fn infer_feed_id(story_hash: &str) -> &str {
    story_hash.split(':').next().unwrap_or(story_hash)
}

/// One page of stories as returned by any story-listing call.
#[derive(Debug, Clone, Default)]
pub struct StoriesPage {
    pub stories: Vec<Story>,
    /// Set by share/unshare, which answer with the single updated story.
    pub story: Option<Story>,
    pub users: Vec<UserProfile>,
    /// Feeds referenced by the page that may be missing locally.
    pub feeds: Vec<Feed>,
    /// Classifiers keyed by feed id; `"-1"` means the page's own feed.
    pub classifiers: HashMap<String, Classifier>,
    pub feed_tags: Vec<String>,
    pub feed_authors: Vec<String>,
}

impl StoriesPage {
    pub fn is_empty(&self) -> bool {
        self.stories.is_empty() && self.story.is_none()
    }

    /// Feed id classifiers keyed `"-1"` refer to.
    pub fn implied_feed_id(&self) -> Option<&str> {
        self.stories
            .last()
            .or(self.story.as_ref())
            .map(|s| s.feed_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_intel_prefers_positive_dimension() {
        let intel = Intelligence {
            feed: -1,
            author: 1,
            tags: -1,
            title: 0,
        };
        assert_eq!(intel.total(), 1);
    }

    #[test]
    fn test_total_intel_negative_dimension_beats_feed() {
        let intel = Intelligence {
            feed: 1,
            author: 0,
            tags: -1,
            title: 0,
        };
        assert_eq!(intel.total(), -1);
    }

    #[test]
    fn test_total_intel_falls_back_to_feed() {
        let intel = Intelligence {
            feed: -1,
            ..Default::default()
        };
        assert_eq!(intel.total(), -1);
    }

    #[test]
    fn test_image_sources_handles_both_quote_styles() {
        let html = r#"<p><IMG alt="a" src="http://x/a.png"> text <img src='http://x/b.jpg?a=1&amp;b=2' /></p>"#;
        assert_eq!(
            image_sources(html),
            vec!["http://x/a.png", "http://x/b.jpg?a=1&b=2"]
        );
    }

    #[test]
    fn test_image_sources_ignores_data_src() {
        assert!(image_sources(r#"<img data-src="x.png">"#).is_empty());
    }

    #[test]
    fn test_guess_thumbnail_order() {
        let mut story = Story {
            content: Some(r#"<img src="c.png">"#.into()),
            ..Default::default()
        };
        assert_eq!(story.guess_thumbnail_url().as_deref(), Some("c.png"));
        story.image_urls = vec!["i.png".into()];
        assert_eq!(story.guess_thumbnail_url().as_deref(), Some("i.png"));
        story.thumbnail_url = Some("t.png".into());
        assert_eq!(story.guess_thumbnail_url().as_deref(), Some("t.png"));
    }

    #[test]
    fn test_infer_feed_id() {
        assert_eq!(infer_feed_id("42:abc123"), "42");
        assert_eq!(infer_feed_id("nocolon"), "nocolon");
    }
}
