//! Error types for delivery coordination

use std::fmt;

/// Failure from the external content provider
#[derive(Debug)]
pub enum ProviderError {
    Request(String),
    Io(Box<std::io::Error>),
    Timeout,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Request(msg) => write!(f, "Provider request failed: {}", msg),
            ProviderError::Io(err) => write!(f, "Provider IO error: {}", err),
            ProviderError::Timeout => write!(f, "Provider timed out"),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProviderError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::Io(Box::new(err))
    }
}

impl From<tokio::time::error::Elapsed> for ProviderError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ProviderError::Timeout
    }
}

/// Failure from the delivery transport
#[derive(Debug)]
pub enum TransportError {
    Rejected(String),
    Io(Box<std::io::Error>),
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Rejected(msg) => write!(f, "Delivery rejected: {}", msg),
            TransportError::Io(err) => write!(f, "Delivery IO error: {}", err),
            TransportError::Timeout => write!(f, "Delivery timed out"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(Box::new(err))
    }
}

impl From<tokio::time::error::Elapsed> for TransportError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TransportError::Timeout
    }
}

/// Why a delivery request did not run to completion
#[derive(Debug)]
pub enum DeliveryError {
    /// The recipient already has a delivery in flight. Not a failure; callers
    /// should ask the recipient to wait.
    Busy {
        recipient: String,
        active_collection: String,
    },
    /// The collection id is unknown to the resolver
    NotFound(String),
    /// The provider listed no items for the collection
    EmptyCollection(String),
    /// Listing the collection failed
    Provider(ProviderError),
}

impl DeliveryError {
    pub fn is_busy(&self) -> bool {
        matches!(self, DeliveryError::Busy { .. })
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Busy {
                recipient,
                active_collection,
            } => write!(
                f,
                "Recipient {} is busy with collection {}",
                recipient, active_collection
            ),
            DeliveryError::NotFound(id) => write!(f, "Collection not found: {}", id),
            DeliveryError::EmptyCollection(id) => write!(f, "Collection is empty: {}", id),
            DeliveryError::Provider(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeliveryError::Provider(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProviderError> for DeliveryError {
    fn from(err: ProviderError) -> Self {
        DeliveryError::Provider(err)
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
