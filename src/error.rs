//! Error types for the log engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Error, Debug)]
pub enum LogError {
    /// Line format does not compile or violates the slot role rules.
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// A source could not be opened or read. The previous dataset stays loaded.
    #[error("Failed to load {source_name}: {source}")]
    Load {
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Load cancelled")]
    Cancelled,

    /// Query options rejected before any scan starts.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LogError {
    pub(crate) fn load(source_name: impl Into<String>, source: std::io::Error) -> Self {
        LogError::Load { source_name: source_name.into(), source }
    }
}
