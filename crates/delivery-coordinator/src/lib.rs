//! Per-recipient delivery coordination
//!
//! Resolves a collection through an external content provider, serves each
//! item from the [`content_cache::ContentCache`] or fetches and caches it,
//! and hands items to a delivery transport one at a time. At most one
//! delivery runs per recipient; overlapping requests are rejected as busy.

pub mod collaborators;
pub mod coordinator;
pub mod error;
pub mod locks;

pub use collaborators::{
    CollectionResolver, ContentProvider, DeliveryTransport, GroupRef, Notice, ProviderItem,
};
pub use coordinator::{
    CoordinatorConfig, DeliveryCoordinator, DeliveryReport, ItemOutcome, ItemStatus,
};
pub use error::{DeliveryError, ProviderError, Result, TransportError};
pub use locks::{RecipientGuard, RecipientLocks};
