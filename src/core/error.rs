use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HoustonError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Walk error: {0}")]
    WalkError(#[from] walkdir::Error),
    #[error("Thread pool error: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Git error: {0}")]
    GitError(String),
    #[error("Path error: {0}")]
    PathError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Asset(s) {0:?} were requested but never received")]
    UploadMissing(Vec<String>),
    #[error("Git store {0} no longer exists")]
    StoreVanished(String),
    #[error("Dispatch error: {0}")]
    DispatchError(String),
}

impl HoustonError {
    /// Errors caused by caller input rather than by the system; an API
    /// boundary reports these as client errors.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            HoustonError::UploadMissing(_)
                | HoustonError::ValidationError(_)
                | HoustonError::NotFound(_)
        )
    }
}
