//! Chronological position index: item id → dense rank among published items.
//!
//! Ranks answer "which listing page shows item X" without querying content storage.
//! The index is only ever rebuilt wholesale; single-item updates read it.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use super::cascade::CascadeError;
use super::keys::{KeyBuilder, Namespace};
use super::store::{KvStore, StoreError};
use crate::application::repos::ContentSource;
use crate::domain::entities::{CategoryId, ContentItem, ItemId};

/// Assign dense 1-based ranks in iteration order, skipping excluded categories.
///
/// `items` must already be ordered newest first. Revisions and items outside the
/// published set never receive a rank.
pub fn rank_items(items: &[ContentItem], excluded: &[CategoryId]) -> Vec<(ItemId, u64)> {
    items
        .iter()
        .filter(|item| item.status.is_published() && !item.is_revision())
        .filter(|item| !item.in_any_category(excluded))
        .zip(1u64..)
        .map(|(item, rank)| (item.id, rank))
        .collect()
}

/// Listing page (1-based) on which the item with `rank` appears.
pub fn listing_page(rank: u64, page_size: u64) -> u64 {
    rank.max(1).div_ceil(page_size.max(1))
}

pub struct PositionIndex {
    store: Arc<dyn KvStore>,
    keys: KeyBuilder,
}

impl PositionIndex {
    pub fn new(store: Arc<dyn KvStore>, keys: KeyBuilder) -> Self {
        Self { store, keys }
    }

    /// Delete the index and recompute it from the content source.
    ///
    /// Returns the number of ranked items.
    pub async fn rebuild(
        &self,
        source: &dyn ContentSource,
        excluded: &[CategoryId],
    ) -> Result<usize, CascadeError> {
        let key = self.keys.build(&Namespace::PostPosition);
        self.store.del(key.as_str()).await?;

        let items = source.published_items().await?;
        let ranks = rank_items(&items, excluded);
        for (item_id, rank) in &ranks {
            self.store
                .hset(
                    key.as_str(),
                    &item_id.to_string(),
                    Bytes::from(rank.to_string()),
                )
                .await?;
        }

        info!(
            domain = self.keys.domain(),
            published = items.len(),
            ranked = ranks.len(),
            "Position index rebuilt"
        );
        Ok(ranks.len())
    }

    /// Drop the index without recomputing it; rank lookups then miss until the next rebuild.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store
            .del(self.keys.build(&Namespace::PostPosition).as_str())
            .await
    }

    pub async fn rank_of(&self, item_id: ItemId) -> Result<Option<u64>, StoreError> {
        let key = self.keys.build(&Namespace::PostPosition);
        let Some(raw) = self.store.hget(key.as_str(), &item_id.to_string()).await? else {
            debug!(item_id, "Item has no position");
            return Ok(None);
        };

        let text = std::str::from_utf8(&raw)
            .map_err(|_| StoreError::Protocol(format!("position of item {item_id} is not UTF-8")))?;
        text.trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| StoreError::Protocol(format!("position of item {item_id} is `{text}`")))
    }
}
