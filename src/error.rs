use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The inference service could not be reached or answered with an error.
    #[error("inference service error: {0}")]
    Service(String),

    /// The persisted history file exists but could not be parsed.
    #[error("history file {path:?} is corrupt: {reason}")]
    StorageCorrupt { path: PathBuf, reason: String },

    /// A streaming call was interrupted by the user.
    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Service(e.to_string())
    }
}
