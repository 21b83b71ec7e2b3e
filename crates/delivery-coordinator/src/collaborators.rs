//! Interfaces to the systems a delivery depends on

use crate::error::{ProviderError, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Provider-side reference for a collection (e.g. a channel or group handle)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupRef(pub String);

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of a provider's item listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderItem {
    pub item_id: String,
    #[serde(default)]
    pub caption: String,
}

/// Source of collection listings and artifacts
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// List a group's items, oldest first
    async fn list_items(&self, group: &GroupRef) -> Result<Vec<ProviderItem>, ProviderError>;

    /// Download one item into `dest_dir`, returning the file's path
    async fn fetch_item(
        &self,
        group: &GroupRef,
        item_id: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, ProviderError>;
}

/// Channel back to the recipient
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(
        &self,
        recipient: &str,
        artifact: &Path,
        caption: &str,
    ) -> Result<(), TransportError>;

    async fn notify(&self, recipient: &str, notice: &Notice) -> Result<(), TransportError>;
}

/// Maps user-facing collection ids to provider group references
pub trait CollectionResolver: Send + Sync {
    fn resolve(&self, collection_id: &str) -> Option<GroupRef>;
}

/// Status messages sent to a recipient over the course of a delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    NotFound {
        collection_id: String,
    },
    Empty {
        collection_id: String,
    },
    Failed {
        collection_id: String,
    },
    Started {
        collection_id: String,
        total: usize,
        fully_cached: bool,
    },
    ItemSkipped {
        collection_id: String,
        item_id: String,
        reason: String,
    },
    Completed {
        collection_id: String,
        delivered: usize,
        skipped: usize,
    },
}

impl Notice {
    /// Human-readable text for chat-style transports
    pub fn message(&self) -> String {
        match self {
            Notice::NotFound { collection_id } => format!("Series not found: {}", collection_id),
            Notice::Empty { collection_id } => {
                format!("Series {} has no episodes yet", collection_id)
            }
            Notice::Failed { collection_id } => format!(
                "Something went wrong while fetching {}. Please try again later.",
                collection_id
            ),
            Notice::Started {
                collection_id,
                total,
                fully_cached: true,
            } => format!("Sending {} episodes of {} instantly", total, collection_id),
            Notice::Started {
                collection_id,
                total,
                fully_cached: false,
            } => format!(
                "Downloading {} episodes of {}, this may take a while",
                total, collection_id
            ),
            Notice::ItemSkipped { item_id, .. } => format!("Skipped episode {}", item_id),
            Notice::Completed {
                collection_id,
                delivered,
                skipped: 0,
            } => format!("Done: {} episodes of {} sent", delivered, collection_id),
            Notice::Completed {
                collection_id,
                delivered,
                skipped,
            } => format!(
                "Done: {} episodes of {} sent, {} skipped",
                delivered, collection_id, skipped
            ),
        }
    }
}
