use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Story not found: {0}")]
    StoryNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Failure classes reported by the remote API.
///
/// The action queue treats each class differently: protocol failures are
/// retried on a later pass, declared errors are surfaced to the user and the
/// action is dropped, rejected calls are dropped silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Transport failure, non-2xx status or an unparseable body.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server understood the call and refused it with a message.
    #[error("{0}")]
    Declared(String),

    /// The session cookie is missing or no longer accepted.
    #[error("Not authenticated")]
    Unauthenticated,

    /// The call could not be built on the client side.
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
pub type ApiResult<T> = std::result::Result<T, ApiError>;
