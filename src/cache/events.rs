//! Content lifecycle events and the in-memory queue feeding the invalidation cascade.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use super::lock::mutex_lock;
use crate::domain::entities::{ContentItem, ItemId};
use crate::domain::types::ItemStatus;

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// Queued content event with idempotency and retry bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
    /// Failed cascade runs so far.
    pub attempts: u32,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
            attempts: 0,
        }
    }
}

/// Content mutations reported by the content platform.
///
/// Serialized with an `event` tag, e.g.
/// `{"event": "publication_changed", "item": {...}, "old_status": "draft", "new_status": "publish"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// An item moved between publication states, or was edited in place.
    PublicationChanged {
        item: ContentItem,
        old_status: ItemStatus,
        new_status: ItemStatus,
    },
    /// A comment was created, edited, moved or changed status.
    CommentChanged {
        comment_id: i64,
        item_id: ItemId,
        /// Owning item when the sender already has it; looked up otherwise.
        #[serde(default)]
        item: Option<ContentItem>,
    },
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::PublicationChanged { .. } => "publication_changed",
            EventKind::CommentChanged { .. } => "comment_changed",
        }
    }

    /// Item the event is about.
    pub fn item_id(&self) -> ItemId {
        match self {
            EventKind::PublicationChanged { item, .. } => item.id,
            EventKind::CommentChanged { item_id, .. } => *item_id,
        }
    }
}

/// In-memory FIFO of pending content events.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Enqueue an event, returning its id.
    pub fn publish(&self, kind: EventKind) -> Uuid {
        let event = CacheEvent::new(kind, self.next_epoch());
        let id = event.id;

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = event.kind.label(),
            item_id = event.kind.item_id(),
            "Cache event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, "publish");
        queue.push_back(event);
        gauge!("redpage_cache_event_queue_len").set(queue.len() as f64);
        id
    }

    /// Put events back after a failed cascade, counting the attempt.
    ///
    /// Retried events go behind anything already queued; their epoch is unchanged.
    pub fn requeue(&self, events: impl IntoIterator<Item = CacheEvent>) {
        let mut queue = mutex_lock(&self.queue, "requeue");
        for mut event in events {
            event.attempts += 1;
            queue.push_back(event);
        }
        gauge!("redpage_cache_event_queue_len").set(queue.len() as f64);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, "drain");
        let count = limit.min(queue.len());
        let drained = queue.drain(..count).collect();
        gauge!("redpage_cache_event_queue_len").set(queue.len() as f64);
        drained
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
