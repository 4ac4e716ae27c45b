use thiserror::Error;

/// Error taxonomy for the knowledge store.
///
/// `Busy` is transient and retried inside the store; `Validation`,
/// `AlreadyExists`, `NotFound` and `Unauthorized` are user-visible structured
/// outcomes; `Fatal` aborts startup. Everything else is surfaced through the
/// uniform result envelopes at the public boundaries.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Fetch failed: {0}")]
    Fetcher(String),

    #[error("Non-English content detected: {0}")]
    LanguageSkip(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl AppError {
    /// Language skips are reported as `skipped`, not as failures.
    pub fn is_language_skip(&self) -> bool {
        matches!(self, AppError::LanguageSkip(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;
