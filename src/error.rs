use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Neither the primary nor the fallback path produced a usable media descriptor.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// The primary API refused to serve full media for the item.
    #[error("item is classified or blocked on the primary path: {0}")]
    Blocked(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("failed to write {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("run canceled")]
    Cancelled,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Storage {
            path: path.into(),
            source,
        }
    }

    /// The underlying message without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            EngineError::Resolution(msg)
            | EngineError::Blocked(msg)
            | EngineError::Transfer(msg)
            | EngineError::Configuration(msg) => msg.clone(),
            EngineError::Storage { source, .. } => source.to_string(),
            EngineError::Json(err) => err.to_string(),
            EngineError::Io(err) => err.to_string(),
            EngineError::Cancelled => self.to_string(),
        }
    }

    /// Whether another attempt of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::Blocked(_) | EngineError::Configuration(_) | EngineError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
