//! Cache consumer: turns queued content events into cascade runs.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::cascade::Cascade;
use super::config::CacheConfig;
use super::events::{CacheEvent, EventKind, EventQueue};
use super::planner::ConsumptionPlan;
use crate::application::repos::ContentSource;

const METRIC_CACHE_CONSUME_MS: &str = "redpage_cache_consume_ms";
const METRIC_EVENT_DROPPED: &str = "redpage_cache_event_dropped_total";

/// Drains the event queue and applies the resulting cascade.
///
/// The consumer:
/// 1. Drains a batch of events
/// 2. Resolves owning items of comment events
/// 3. Merges the batch into one plan and runs it
/// 4. Re-queues the batch when the run fails, up to `max_attempts`
///
/// Runs are serialized: a position rebuild in one batch is never observed half-done
/// by a listing purge in another.
pub struct CacheConsumer {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    cascade: Arc<Cascade>,
    content: Option<Arc<dyn ContentSource>>,
    run_lock: Mutex<()>,
}

impl CacheConsumer {
    pub fn new(
        config: CacheConfig,
        queue: Arc<EventQueue>,
        cascade: Arc<Cascade>,
        content: Option<Arc<dyn ContentSource>>,
    ) -> Self {
        Self {
            config,
            queue,
            cascade,
            content,
            run_lock: Mutex::new(()),
        }
    }

    /// Consume pending events.
    ///
    /// Returns true if any events were processed.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> bool {
        let _running = self.run_lock.lock().await;
        let started_at = Instant::now();
        let events = self.queue.drain(self.config.consume_batch_limit);
        if events.is_empty() {
            return false;
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();

        let (resolved, unresolved) = self.resolve_owners(events).await;
        let plan = ConsumptionPlan::from_events(resolved, &self.config.permalinks);

        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Cache consumption starting"
        );

        if plan.is_empty() {
            debug!(event_count, "No cached pages affected");
        } else {
            self.run(plan).await;
        }
        self.retry(unresolved);

        histogram!(METRIC_CACHE_CONSUME_MS)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        true
    }

    async fn run(&self, plan: ConsumptionPlan) {
        let event_count = plan.events.len();
        match self.cascade.run(&plan.cascade).await {
            Ok(report) => {
                info!(
                    event_count,
                    steps = report.steps,
                    keys_deleted = report.keys_deleted,
                    fields_deleted = report.fields_deleted,
                    ranked = report.ranked,
                    "Cache consumption complete"
                );
            }
            Err(err) => {
                warn!(
                    event_count,
                    error = %err,
                    "Cascade failed; events will be retried"
                );
                self.retry(plan.events);
            }
        }
    }

    /// Fill in owning items of comment events.
    ///
    /// Events whose lookup failed are returned separately for retry; owners that do not
    /// exist stay unresolved and are skipped by the planner.
    async fn resolve_owners(&self, events: Vec<CacheEvent>) -> (Vec<CacheEvent>, Vec<CacheEvent>) {
        let mut resolved = Vec::with_capacity(events.len());
        let mut failed = Vec::new();

        for mut event in events {
            let EventKind::CommentChanged {
                item_id,
                item: item @ None,
                ..
            } = &mut event.kind
            else {
                resolved.push(event);
                continue;
            };

            let Some(source) = self.content.as_deref() else {
                resolved.push(event);
                continue;
            };

            match source.item(*item_id).await {
                Ok(owner) => {
                    *item = owner;
                    resolved.push(event);
                }
                Err(err) => {
                    warn!(
                        event_id = %event.id,
                        item_id = *item_id,
                        error = %err,
                        "Failed to resolve comment owner"
                    );
                    failed.push(event);
                }
            }
        }

        (resolved, failed)
    }

    fn retry(&self, events: Vec<CacheEvent>) {
        let max_attempts = self.config.max_attempts();
        let (retry, dropped): (Vec<_>, Vec<_>) = events
            .into_iter()
            .partition(|event| event.attempts + 1 < max_attempts);

        for event in &dropped {
            warn!(
                event_id = %event.id,
                event_kind = event.kind.label(),
                item_id = event.kind.item_id(),
                attempts = event.attempts + 1,
                "Cache event dropped after repeated failures"
            );
        }
        if !dropped.is_empty() {
            counter!(METRIC_EVENT_DROPPED).increment(dropped.len() as u64);
        }
        if !retry.is_empty() {
            self.queue.requeue(retry);
        }
    }
}
