use bitflags::bitflags;

bitflags! {
    /// What changed in the local store, sent to listeners so they can refresh.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UpdateFlags: u32 {
        const METADATA = 1 << 1;
        const STORY = 1 << 2;
        const INTEL = 1 << 3;
        const STATUS = 1 << 5;
        const TEXT = 1 << 6;
        const REBUILD = 1 << 7;
        const SOCIAL = 1 << 8;
        const DB_READY = 1 << 9;
    }
}

/// Messages emitted by the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Local data changed; listeners should refresh the flagged views.
    Update(UpdateFlags),
    /// A user-visible failure, such as an action refused by the server.
    Error(String),
    /// Story hashes that qualify for a user notification.
    Notify(Vec<String>),
    /// Authentication failed too many times and local data was wiped.
    LoggedOut,
}

/// Short description of what the engine is currently doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Offline,
    Housekeeping,
    FeedsFolders,
    Cleanup,
    Starred,
    Actions(usize),
    Recounts,
    Stories,
    Unreads(usize),
    Text(usize),
    Images(usize),
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Offline => write!(f, "Offline"),
            SyncStatus::Housekeeping => write!(f, "Tidying up"),
            SyncStatus::FeedsFolders => write!(f, "Syncing feeds"),
            SyncStatus::Cleanup => write!(f, "Cleaning up"),
            SyncStatus::Starred => write!(f, "Syncing saved stories"),
            SyncStatus::Actions(n) => write!(f, "Syncing {} actions", n),
            SyncStatus::Recounts => write!(f, "Updating counts"),
            SyncStatus::Stories => write!(f, "Fetching stories"),
            SyncStatus::Unreads(n) => write!(f, "Fetching {} unread stories", n),
            SyncStatus::Text(n) => write!(f, "Fetching text for {} stories", n),
            SyncStatus::Images(n) => write!(f, "Fetching {} images", n),
        }
    }
}
