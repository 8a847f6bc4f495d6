//! Postgres-backed content source.

mod types;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    query, query_as,
};

use crate::application::repos::{ContentError, ContentSource};
use crate::domain::entities::{ContentItem, ItemId};

use types::ItemRow;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const ITEM_COLUMNS: &str = "i.id, i.kind, i.slug, i.status, i.published_at, \
    COALESCE(array_agg(c.category_id) FILTER (WHERE c.category_id IS NOT NULL), '{}') AS categories";

/// Reads items from `content_items` and their categories from `content_item_categories`.
#[derive(Clone)]
pub struct PgContentSource {
    pool: Arc<PgPool>,
}

impl PgContentSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

#[async_trait]
impl ContentSource for PgContentSource {
    async fn published_items(&self) -> Result<Vec<ContentItem>, ContentError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} \
             FROM content_items i \
             LEFT JOIN content_item_categories c ON c.item_id = i.id \
             WHERE i.status = 'publish' AND i.kind = 'post' \
             GROUP BY i.id \
             ORDER BY i.published_at DESC NULLS LAST, i.id DESC"
        );
        let rows = query_as::<_, ItemRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(ContentItem::from).collect())
    }

    async fn item(&self, id: ItemId) -> Result<Option<ContentItem>, ContentError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} \
             FROM content_items i \
             LEFT JOIN content_item_categories c ON c.item_id = i.id \
             WHERE i.id = $1 \
             GROUP BY i.id"
        );
        let row = query_as::<_, ItemRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(ContentItem::from))
    }
}
