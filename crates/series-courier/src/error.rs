//! Error types for the series courier

use std::fmt;

#[derive(Debug)]
pub enum CourierError {
    Cache(content_cache::StorageError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for CourierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CourierError::Cache(err) => write!(f, "Cache error: {}", err),
            CourierError::Io(err) => write!(f, "IO error: {}", err),
            CourierError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CourierError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CourierError::Cache(err) => Some(err),
            CourierError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<content_cache::StorageError> for CourierError {
    fn from(err: content_cache::StorageError) -> Self {
        CourierError::Cache(err)
    }
}

impl From<std::io::Error> for CourierError {
    fn from(err: std::io::Error) -> Self {
        CourierError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for CourierError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        CourierError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;
