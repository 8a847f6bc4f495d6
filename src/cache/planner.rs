//! Consumption plan generation.
//!
//! Merges a batch of content events into one [`CascadePlan`].

use std::collections::HashSet;
use std::fmt;

use tracing::warn;

use super::cascade::CascadePlan;
use super::events::{CacheEvent, EventKind};
use crate::domain::permalink::Permalinks;

/// One batch worth of work: the merged cascade plus the events it covers.
#[derive(Debug, Default)]
pub struct ConsumptionPlan {
    pub cascade: CascadePlan,
    /// Events folded into `cascade`, kept for re-queueing on failure.
    pub events: Vec<CacheEvent>,
    /// Comment events whose owning item was never resolved.
    pub skipped: usize,
}

impl fmt::Display for ConsumptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConsumptionPlan {{ events: {}, skipped: {}, steps: {} }}",
            self.events.len(),
            self.skipped,
            self.cascade
        )
    }
}

impl ConsumptionPlan {
    /// Merge events into a single plan.
    ///
    /// - Deduplicates by event id
    /// - Every remaining event contributes its steps in epoch order; the merged plan
    ///   keeps first occurrences and a single trailing position rebuild
    /// - Comment events without an owning item are skipped
    pub fn from_events(mut events: Vec<CacheEvent>, permalinks: &Permalinks) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();

        events.sort_by_key(|event| event.epoch);

        for event in events {
            if !seen_ids.insert(event.id) {
                continue;
            }

            let steps = match &event.kind {
                EventKind::PublicationChanged {
                    item,
                    old_status,
                    new_status,
                } => CascadePlan::for_publication(item, *old_status, *new_status, permalinks),
                EventKind::CommentChanged {
                    item: Some(owner), ..
                } => CascadePlan::for_comment(owner, permalinks),
                EventKind::CommentChanged {
                    item: None,
                    comment_id,
                    item_id,
                } => {
                    warn!(
                        event_id = %event.id,
                        comment_id,
                        item_id,
                        "Comment event without owning item skipped"
                    );
                    plan.skipped += 1;
                    continue;
                }
            };

            plan.cascade.merge(steps);
            plan.events.push(event);
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.cascade.is_empty()
    }
}
