//! Repository traits describing the content platform as seen by the cache.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{ContentItem, ItemId};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content query failed: {0}")]
    Query(String),
    #[error("content database timeout")]
    Timeout,
    #[error("content source is not configured")]
    Unavailable,
}

impl ContentError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Query(err.to_string())
    }
}

/// Read access to the content platform.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// All published items, newest publication first, with their categories.
    async fn published_items(&self) -> Result<Vec<ContentItem>, ContentError>;

    /// A single item by id, in whatever state it is currently in.
    async fn item(&self, id: ItemId) -> Result<Option<ContentItem>, ContentError>;
}
