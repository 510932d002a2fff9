use serde::{Deserialize, Serialize};

/// Intelligence-based visibility filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    All,
    #[default]
    Some,
    Neut,
    Best,
    Neg,
    Saved,
}

impl StateFilter {
    /// Whether a story with the given total intelligence passes this filter.
    pub fn admits(self, total_intel: i32, starred: bool) -> bool {
        match self {
            StateFilter::All => true,
            StateFilter::Some => total_intel >= 0,
            StateFilter::Neut => total_intel == 0,
            StateFilter::Best => total_intel > 0,
            StateFilter::Neg => total_intel < 0,
            StateFilter::Saved => starred,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadFilter {
    All,
    #[default]
    Unread,
}

impl ReadFilter {
    pub fn as_param(self) -> &'static str {
        match self {
            ReadFilter::All => "all",
            ReadFilter::Unread => "unread",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryOrder {
    #[default]
    Newest,
    Oldest,
}

impl StoryOrder {
    pub fn as_param(self) -> &'static str {
        match self {
            StoryOrder::Newest => "newest",
            StoryOrder::Oldest => "oldest",
        }
    }
}

/// The filter triple a reading session is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CursorFilters {
    pub state_filter: StateFilter,
    pub read_filter: ReadFilter,
    pub story_order: StoryOrder,
}
