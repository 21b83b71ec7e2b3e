//! Error types for the content cache

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum StorageError {
    /// Filesystem failure while copying, renaming or deleting an artifact
    Io {
        path: PathBuf,
        source: Box<std::io::Error>,
    },
    /// Identifier that cannot be used as a single path component
    InvalidKey(String),
    /// Configuration rejected at construction
    Config(String),
    /// The index could not be serialized for persistence
    Serialize(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source: Box::new(err),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io { path, source } => {
                write!(f, "Storage error at {}: {}", path.display(), source)
            }
            StorageError::InvalidKey(key) => write!(f, "Invalid cache key: {:?}", key),
            StorageError::Config(msg) => write!(f, "Configuration error: {}", msg),
            StorageError::Serialize(msg) => write!(f, "Index serialization error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialize(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
