//! Cache trigger service.
//!
//! Publishes content events and optionally consumes them right away.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::config::CacheConfig;
use super::consumer::CacheConsumer;
use super::events::{EventKind, EventQueue};
use crate::domain::entities::{ContentItem, ItemId};
use crate::domain::types::ItemStatus;

pub struct CacheTrigger {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    consumer: Arc<CacheConsumer>,
}

impl CacheTrigger {
    pub fn new(config: CacheConfig, queue: Arc<EventQueue>, consumer: Arc<CacheConsumer>) -> Self {
        Self {
            config,
            queue,
            consumer,
        }
    }

    /// Publish an event and optionally consume immediately.
    ///
    /// Returns the event id, or `None` when caching is disabled. Without `consume_now`
    /// the event waits for the background consumer.
    pub async fn trigger(&self, kind: EventKind, consume_now: bool) -> Option<Uuid> {
        if !self.config.enabled {
            debug!(
                event_kind = kind.label(),
                "Cache trigger skipped: cache disabled"
            );
            return None;
        }

        let id = self.queue.publish(kind);

        if consume_now {
            self.consumer.consume().await;
        }
        Some(id)
    }

    /// An item changed publication state (or was edited while published).
    pub async fn publication_changed(
        &self,
        item: ContentItem,
        old_status: ItemStatus,
        new_status: ItemStatus,
    ) -> Option<Uuid> {
        self.trigger(
            EventKind::PublicationChanged {
                item,
                old_status,
                new_status,
            },
            true,
        )
        .await
    }

    /// A comment on `item_id` was created, edited, moved or changed status.
    pub async fn comment_changed(&self, comment_id: i64, item_id: ItemId) -> Option<Uuid> {
        self.trigger(
            EventKind::CommentChanged {
                comment_id,
                item_id,
                item: None,
            },
            true,
        )
        .await
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::cache::cascade::Cascade;
    use crate::cache::keys::KeyBuilder;
    use crate::cache::store::{KvStore, MemoryStore};
    use crate::domain::types::ItemKind;

    fn trigger(enabled: bool, store: Arc<MemoryStore>) -> CacheTrigger {
        let config = CacheConfig {
            enabled,
            site_domain: "example.com".to_string(),
            ..Default::default()
        };
        let queue = Arc::new(EventQueue::new());
        let cascade = Arc::new(Cascade::new(
            store,
            KeyBuilder::new("example.com"),
            None,
            Vec::new(),
            config.page_size,
        ));
        let consumer = Arc::new(CacheConsumer::new(
            config.clone(),
            queue.clone(),
            cascade,
            None,
        ));
        CacheTrigger::new(config, queue, consumer)
    }

    fn post() -> ContentItem {
        ContentItem {
            id: 1,
            kind: ItemKind::Post,
            slug: "hello".to_string(),
            status: ItemStatus::Published,
            published_at: None,
            categories: Vec::new(),
        }
    }

    #[tokio::test]
    async fn disabled_cache_ignores_events() {
        let trigger = trigger(false, Arc::new(MemoryStore::new()));
        assert!(
            trigger
                .publication_changed(post(), ItemStatus::Draft, ItemStatus::Published)
                .await
                .is_none()
        );
        assert_eq!(trigger.pending(), 0);
    }

    #[tokio::test]
    async fn publish_consumes_immediately() {
        let store = Arc::new(MemoryStore::new());
        store
            .hset("example.com:index", "/", Bytes::from_static(b"home"))
            .await
            .expect("seed");
        let trigger = trigger(true, store.clone());

        let id = trigger
            .publication_changed(post(), ItemStatus::Draft, ItemStatus::Published)
            .await;

        assert!(id.is_some());
        assert_eq!(trigger.pending(), 0);
        assert!(!store.exists("example.com:index").await.expect("exists"));
    }

    #[tokio::test]
    async fn unresolvable_comment_is_skipped() {
        let trigger = trigger(true, Arc::new(MemoryStore::new()));
        assert!(trigger.comment_changed(3, 99).await.is_some());
        assert_eq!(trigger.pending(), 0);
    }
}
