pub mod action;
pub mod classifier;
pub mod feed;
pub mod feedset;
pub mod filters;
pub mod social;
pub mod story;
pub mod update;

pub use action::{ActionRecord, QueuedAction, ReadingAction};
pub use classifier::{Classifier, ClassifierKind};
pub use feed::{Feed, FeedCounts, Folder, SavedSearch, SocialFeed, StarredCount};
pub use feedset::FeedSet;
pub use filters::{CursorFilters, ReadFilter, StateFilter, StoryOrder};
pub use social::{Comment, CommentResponse, Reply, UserProfile};
pub use story::{Intelligence, StoriesPage, Story};
pub use update::{SyncEvent, SyncStatus, UpdateFlags};
