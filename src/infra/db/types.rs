use time::OffsetDateTime;

use crate::domain::entities::{CategoryId, ContentItem, ItemId};
use crate::domain::types::{ItemKind, ItemStatus};

#[derive(sqlx::FromRow)]
pub(crate) struct ItemRow {
    pub(crate) id: ItemId,
    pub(crate) kind: String,
    pub(crate) slug: String,
    pub(crate) status: String,
    pub(crate) published_at: Option<OffsetDateTime>,
    pub(crate) categories: Vec<CategoryId>,
}

impl From<ItemRow> for ContentItem {
    fn from(row: ItemRow) -> Self {
        let mut categories = row.categories;
        categories.sort_unstable();
        categories.dedup();
        Self {
            id: row.id,
            kind: ItemKind::from(row.kind.as_str()),
            slug: row.slug,
            status: ItemStatus::from(row.status.as_str()),
            published_at: row.published_at,
            categories,
        }
    }
}
