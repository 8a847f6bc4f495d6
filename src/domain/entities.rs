//! Content entities as seen by the cache.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::types::{ItemKind, ItemStatus};

/// Identifier of a content item in the content platform.
pub type ItemId = i64;

/// Identifier of a category attached to a content item.
pub type CategoryId = i64;

/// The slice of a content item the cache needs: identity, permalink inputs,
/// publication state and category membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ItemId,
    #[serde(default)]
    pub kind: ItemKind,
    pub slug: String,
    pub status: ItemStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub categories: Vec<CategoryId>,
}

impl ContentItem {
    pub fn is_revision(&self) -> bool {
        self.kind == ItemKind::Revision
    }

    /// True when any of this item's categories is in `excluded`.
    pub fn in_any_category(&self, excluded: &[CategoryId]) -> bool {
        self.categories.iter().any(|id| excluded.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_payload() {
        let item: ContentItem =
            serde_json::from_str(r#"{"id": 7, "slug": "hello", "status": "draft"}"#)
                .expect("minimal item");

        assert_eq!(item.kind, ItemKind::Post);
        assert!(item.published_at.is_none());
        assert!(item.categories.is_empty());
    }

    #[test]
    fn deserializes_full_payload() {
        let item: ContentItem = serde_json::from_str(
            r#"{
                "id": 7,
                "kind": "revision",
                "slug": "hello",
                "status": "publish",
                "published_at": "2024-03-09T10:00:00Z",
                "categories": [3, 4]
            }"#,
        )
        .expect("full item");

        assert!(item.is_revision());
        assert!(item.status.is_published());
        assert!(item.in_any_category(&[4, 9]));
        assert!(!item.in_any_category(&[9]));
    }
}
