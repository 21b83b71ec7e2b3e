//! In-memory busy markers, one per recipient

use crate::error::DeliveryError;
use dashmap::DashMap;
use std::sync::Arc;

/// Tracks which recipients currently have a delivery in flight, and for
/// which collection. Nothing here is persisted.
#[derive(Default, Clone)]
pub struct RecipientLocks {
    active: Arc<DashMap<String, String>>,
}

impl RecipientLocks {
    pub fn new() -> Self {
        Self {
            active: Arc::new(DashMap::new()),
        }
    }

    /// Mark `recipient` busy with `collection_id`, or report the collection it
    /// is already busy with. Never waits.
    pub fn acquire(
        &self,
        recipient: &str,
        collection_id: &str,
    ) -> Result<RecipientGuard, DeliveryError> {
        use dashmap::mapref::entry::Entry;

        match self.active.entry(recipient.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(collection_id.to_string());
                Ok(RecipientGuard {
                    recipient: recipient.to_string(),
                    active: Arc::clone(&self.active),
                })
            }
            Entry::Occupied(occupied) => Err(DeliveryError::Busy {
                recipient: recipient.to_string(),
                active_collection: occupied.get().clone(),
            }),
        }
    }

    pub fn active_collection(&self, recipient: &str) -> Option<String> {
        self.active.get(recipient).map(|entry| entry.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Releases the recipient's busy marker when dropped
pub struct RecipientGuard {
    recipient: String,
    active: Arc<DashMap<String, String>>,
}

impl RecipientGuard {
    pub fn recipient(&self) -> &str {
        &self.recipient
    }
}

impl Drop for RecipientGuard {
    fn drop(&mut self) {
        self.active.remove(&self.recipient);
    }
}
