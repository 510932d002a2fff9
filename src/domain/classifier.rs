use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which story attribute a classifier rule matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Title,
    Author,
    Tag,
    Feed,
}

impl ClassifierKind {
    pub const ALL: [ClassifierKind; 4] = [
        ClassifierKind::Title,
        ClassifierKind::Author,
        ClassifierKind::Tag,
        ClassifierKind::Feed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClassifierKind::Title => "title",
            ClassifierKind::Author => "author",
            ClassifierKind::Tag => "tag",
            ClassifierKind::Feed => "feed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// Training rules for one feed: rule key to score (+1 like, -1 dislike).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classifier {
    pub feed_id: String,
    pub rules: BTreeMap<ClassifierKind, BTreeMap<String, i32>>,
}

impl Classifier {
    pub fn new(feed_id: impl Into<String>) -> Self {
        Self {
            feed_id: feed_id.into(),
            rules: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, kind: ClassifierKind, key: impl Into<String>, score: i32) {
        self.rules.entry(kind).or_default().insert(key.into(), score);
    }

    pub fn score(&self, kind: ClassifierKind, key: &str) -> Option<i32> {
        self.rules.get(&kind).and_then(|m| m.get(key)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.values().all(|m| m.is_empty())
    }

    /// Flattened `(kind, key, score)` triples.
    pub fn entries(&self) -> impl Iterator<Item = (ClassifierKind, &str, i32)> {
        self.rules
            .iter()
            .flat_map(|(k, m)| m.iter().map(move |(key, v)| (*k, key.as_str(), *v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_flatten() {
        let mut c = Classifier::new("42");
        c.set(ClassifierKind::Author, "ann", 1);
        c.set(ClassifierKind::Title, "spam", -1);
        let entries: Vec<_> = c.entries().collect();
        assert_eq!(
            entries,
            vec![(ClassifierKind::Title, "spam", -1), (ClassifierKind::Author, "ann", 1)]
        );
        assert_eq!(c.score(ClassifierKind::Author, "ann"), Some(1));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(ClassifierKind::parse("tag"), Some(ClassifierKind::Tag));
        assert_eq!(ClassifierKind::parse("bogus"), None);
    }
}
