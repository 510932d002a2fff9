use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Id of the synthetic feed stories with an unknown feed are filed under.
pub const ZERO_FEED_ID: &str = "0";

/// Name of the folder holding feeds that sit outside any named folder.
pub const ROOT_FOLDER: &str = "0000_TOP_LEVEL_";

/// Tag of the starred-count row holding the total saved-story count.
pub const TOTAL_STARRED: &str = "___TOTAL_STARRED";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub feed_id: String,
    pub title: String,
    pub address: Option<String>,
    pub favicon_url: Option<String>,
    pub active: bool,
    pub counts: FeedCounts,
    pub fetch_pending: bool,
    /// `focus` or `unread` when the user opted into notifications.
    pub notification_filter: Option<String>,
    pub notification_types: Vec<String>,
}

impl Feed {
    pub fn new(feed_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            feed_id: feed_id.into(),
            title: title.into(),
            active: true,
            ..Default::default()
        }
    }

    /// The placeholder feed used for stories whose feed is not subscribed.
    pub fn zero() -> Self {
        Self::new(ZERO_FEED_ID, "")
    }
}

/// Server-side unread counts split by intelligence class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCounts {
    pub positive: i64,
    pub neutral: i64,
    pub negative: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialFeed {
    pub user_id: String,
    pub username: String,
    pub title: String,
    pub photo_url: Option<String>,
    pub counts: FeedCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub name: String,
    pub feed_ids: Vec<String>,
    /// Names of direct child folders.
    pub children: Vec<String>,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn remove_orphan_feed_ids(&mut self, orphans: &HashSet<String>) {
        self.feed_ids.retain(|id| !orphans.contains(id));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarredCount {
    pub tag: Option<String>,
    pub feed_id: Option<String>,
    pub count: i64,
}

impl StarredCount {
    pub fn total(count: i64) -> Self {
        Self {
            tag: Some(TOTAL_STARRED.to_string()),
            feed_id: None,
            count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSearch {
    pub feed_id: String,
    pub query: String,
    pub title: Option<String>,
}

/// Drop folders whose name was already seen, keeping the first one.
pub fn dedupe_folders(folders: Vec<Folder>) -> Vec<Folder> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(folders.len());
    for folder in folders {
        if seen.insert(folder.name.clone()) {
            out.push(folder);
        } else {
            tracing::info!(folder = %folder.name, "Dropping duplicate folder");
        }
    }
    out
}

/// Remove child links that point at missing folders or close a cycle.
///
/// Links are visited depth-first from every folder in input order; an edge
/// into a folder still on the current path is a back edge and is dropped.
pub fn prune_folder_tree(folders: &mut [Folder]) {
    let index: HashMap<String, usize> = folders
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.clone(), i))
        .collect();

    for folder in folders.iter_mut() {
        folder.children.retain(|c| index.contains_key(c) && *c != folder.name);
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        OnPath,
        Done,
    }
    let mut marks = vec![Mark::New; folders.len()];

    fn visit(i: usize, folders: &mut [Folder], index: &HashMap<String, usize>, marks: &mut [Mark]) {
        marks[i] = Mark::OnPath;
        let children = std::mem::take(&mut folders[i].children);
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            let j = index[&child];
            match marks[j] {
                Mark::OnPath => {
                    tracing::warn!(parent = %folders[i].name, child = %child, "Pruning folder cycle");
                }
                Mark::New => {
                    visit(j, folders, index, marks);
                    kept.push(child);
                }
                Mark::Done => kept.push(child),
            }
        }
        folders[i].children = kept;
        marks[i] = Mark::Done;
    }

    for i in 0..folders.len() {
        if marks[i] == Mark::New {
            visit(i, folders, &index, &mut marks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(name: &str, children: &[&str]) -> Folder {
        Folder {
            name: name.into(),
            feed_ids: vec![],
            children: children.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let mut a = Folder::new("tech");
        a.feed_ids = vec!["1".into()];
        let mut b = Folder::new("tech");
        b.feed_ids = vec!["2".into()];
        let out = dedupe_folders(vec![a, b, Folder::new("news")]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].feed_ids, vec!["1"]);
    }

    #[test]
    fn test_prune_breaks_cycle() {
        let mut folders = vec![folder("a", &["b"]), folder("b", &["c"]), folder("c", &["a"])];
        prune_folder_tree(&mut folders);
        assert_eq!(folders[0].children, vec!["b"]);
        assert_eq!(folders[1].children, vec!["c"]);
        assert!(folders[2].children.is_empty());
    }

    #[test]
    fn test_prune_drops_missing_and_self_links() {
        let mut folders = vec![folder("a", &["a", "ghost", "b"]), folder("b", &[])];
        prune_folder_tree(&mut folders);
        assert_eq!(folders[0].children, vec!["b"]);
    }

    #[test]
    fn test_prune_keeps_shared_children() {
        let mut folders = vec![folder("a", &["c"]), folder("b", &["c"]), folder("c", &[])];
        prune_folder_tree(&mut folders);
        assert_eq!(folders[0].children, vec!["c"]);
        assert_eq!(folders[1].children, vec!["c"]);
    }

    #[test]
    fn test_orphan_removal() {
        let mut f = Folder::new("x");
        f.feed_ids = vec!["1".into(), "2".into()];
        f.remove_orphan_feed_ids(&HashSet::from(["2".to_string()]));
        assert_eq!(f.feed_ids, vec!["1"]);
    }
}
