//! Invalidation cascade.
//!
//! A content mutation becomes a [`CascadePlan`]: an ordered list of idempotent
//! [`InvalidationStep`]s. Broader steps come before narrower ones, so a run that stops
//! half-way leaves the cache over-invalidated rather than stale, and re-running the
//! whole plan converges.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::keys::{KeyBuilder, Namespace};
use super::path::{Classification, PagePath, listing_page_path};
use super::position::{PositionIndex, listing_page};
use super::store::{KvStore, StoreError};
use crate::application::repos::{ContentError, ContentSource};
use crate::domain::entities::{CategoryId, ContentItem, ItemId};
use crate::domain::permalink::Permalinks;
use crate::domain::types::{ItemStatus, Transition};

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Content(#[from] ContentError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationStep {
    /// Delete every key of the domain.
    PurgeDomain,
    /// Delete one namespace key (all pages of that type).
    PurgeNamespace(Namespace),
    /// Delete one page field.
    PurgePage { namespace: Namespace, path: PagePath },
    /// Delete every tracked comment-pagination variant of `primary`, the primary page
    /// itself and the tracking set.
    PurgeCommentVariants { primary: PagePath },
    /// Delete the listing page currently showing the item; no-op when it has no rank.
    PurgeListingPageOf { item_id: ItemId },
    /// Recompute the position index.
    RebuildPositionIndex,
}

impl InvalidationStep {
    pub fn label(&self) -> &'static str {
        match self {
            InvalidationStep::PurgeDomain => "purge_domain",
            InvalidationStep::PurgeNamespace(_) => "purge_namespace",
            InvalidationStep::PurgePage { .. } => "purge_page",
            InvalidationStep::PurgeCommentVariants { .. } => "purge_comment_variants",
            InvalidationStep::PurgeListingPageOf { .. } => "purge_listing_page",
            InvalidationStep::RebuildPositionIndex => "rebuild_position_index",
        }
    }
}

/// Ordered, de-duplicated list of invalidation steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadePlan {
    steps: Vec<InvalidationStep>,
}

impl fmt::Display for CascadePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.steps.iter().map(InvalidationStep::label).collect();
        write!(f, "[{}]", labels.join(", "))
    }
}

impl CascadePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full-domain flush.
    pub fn purge_domain() -> Self {
        let mut plan = Self::new();
        plan.push(InvalidationStep::PurgeDomain);
        plan
    }

    /// Operator page delete: the page itself, then its comment-pagination variants.
    pub fn purge_page(namespace: Namespace, path: &PagePath) -> Self {
        let primary = Classification::of(path).primary;
        let mut plan = Self::new();
        plan.push(InvalidationStep::PurgePage {
            namespace,
            path: path.clone(),
        });
        plan.push(InvalidationStep::PurgeCommentVariants { primary });
        plan
    }

    /// Steps for an item moving between publication states.
    pub fn for_publication(
        item: &ContentItem,
        old_status: ItemStatus,
        new_status: ItemStatus,
        permalinks: &Permalinks,
    ) -> Self {
        let mut plan = Self::new();
        if item.is_revision() {
            return plan;
        }

        match Transition::between(old_status, new_status) {
            Transition::Added => {
                plan.push(InvalidationStep::PurgeNamespace(Namespace::Index));
                plan.push(InvalidationStep::RebuildPositionIndex);
            }
            Transition::Removed => {
                let path = PagePath::from_canonical(permalinks.public_path(item));
                plan.push(InvalidationStep::PurgeNamespace(Namespace::Index));
                plan.push_item_page(path);
                plan.push(InvalidationStep::RebuildPositionIndex);
            }
            Transition::Updated => {
                let path = PagePath::from_canonical(permalinks.public_path(item));
                plan.push_item_page(path);
                plan.push(InvalidationStep::PurgeListingPageOf { item_id: item.id });
            }
            Transition::Unpublished => {}
        }
        plan
    }

    /// Steps for a comment change on `owner`.
    pub fn for_comment(owner: &ContentItem, permalinks: &Permalinks) -> Self {
        let mut plan = Self::new();
        if owner.is_revision() {
            return plan;
        }
        plan.push_item_page(PagePath::from_canonical(permalinks.resolve(owner)));
        plan.push(InvalidationStep::PurgeListingPageOf { item_id: owner.id });
        plan
    }

    fn push_item_page(&mut self, path: PagePath) {
        let primary = Classification::of(&path).primary;
        self.push(InvalidationStep::PurgePage {
            namespace: Namespace::Single,
            path,
        });
        self.push(InvalidationStep::PurgeCommentVariants { primary });
    }

    /// Append a step. Duplicates keep their first position, except the position
    /// rebuild which always moves to the end.
    pub fn push(&mut self, step: InvalidationStep) {
        if step == InvalidationStep::RebuildPositionIndex {
            self.steps.retain(|existing| existing != &step);
            self.steps.push(step);
        } else if !self.steps.contains(&step) {
            match self.rebuild_index() {
                Some(index) => self.steps.insert(index, step),
                None => self.steps.push(step),
            }
        }
    }

    /// Append every step of `other`, then drop per-item listing purges made redundant
    /// by a whole-index purge.
    pub fn merge(&mut self, other: CascadePlan) {
        for step in other.steps {
            self.push(step);
        }
        self.prune();
    }

    fn rebuild_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| step == &InvalidationStep::RebuildPositionIndex)
    }

    fn prune(&mut self) {
        let purges_index = self.steps.iter().any(|step| {
            matches!(
                step,
                InvalidationStep::PurgeDomain | InvalidationStep::PurgeNamespace(Namespace::Index)
            )
        });
        if purges_index {
            self.steps
                .retain(|step| !matches!(step, InvalidationStep::PurgeListingPageOf { .. }));
        }
    }

    pub fn steps(&self) -> &[InvalidationStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Summary of one cascade run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub steps: usize,
    pub keys_deleted: usize,
    pub fields_deleted: usize,
    /// Items ranked by a position rebuild, when one ran.
    pub ranked: Option<usize>,
}

/// Executes plans against one domain's keys.
pub struct Cascade {
    store: Arc<dyn KvStore>,
    keys: KeyBuilder,
    positions: PositionIndex,
    content: Option<Arc<dyn ContentSource>>,
    excluded_categories: Vec<CategoryId>,
    page_size: u64,
}

impl Cascade {
    pub fn new(
        store: Arc<dyn KvStore>,
        keys: KeyBuilder,
        content: Option<Arc<dyn ContentSource>>,
        excluded_categories: Vec<CategoryId>,
        page_size: u64,
    ) -> Self {
        let positions = PositionIndex::new(store.clone(), keys.clone());
        Self {
            store,
            keys,
            positions,
            content,
            excluded_categories,
            page_size: page_size.max(1),
        }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Full-domain flush. The flush also deletes the position index, so it is
    /// recomputed afterwards when a content source is available.
    pub fn flush_plan(&self) -> CascadePlan {
        let mut plan = CascadePlan::purge_domain();
        if self.content.is_some() {
            plan.push(InvalidationStep::RebuildPositionIndex);
        }
        plan
    }

    /// Run every step in order, stopping at the first failure.
    pub async fn run(&self, plan: &CascadePlan) -> Result<CascadeReport, CascadeError> {
        let mut report = CascadeReport::default();
        for step in plan.steps() {
            self.apply(step, &mut report).await?;
            report.steps += 1;
            counter!("redpage_cache_cascade_step_total", "step" => step.label()).increment(1);
        }

        if !plan.is_empty() {
            info!(
                domain = self.keys.domain(),
                plan = %plan,
                keys_deleted = report.keys_deleted,
                fields_deleted = report.fields_deleted,
                "Cascade applied"
            );
        }
        Ok(report)
    }

    async fn apply(
        &self,
        step: &InvalidationStep,
        report: &mut CascadeReport,
    ) -> Result<(), CascadeError> {
        match step {
            InvalidationStep::PurgeDomain => {
                let keys = self.store.keys(&self.keys.domain_pattern()).await?;
                for key in &keys {
                    self.store.del(key).await?;
                }
                report.keys_deleted += keys.len();
            }
            InvalidationStep::PurgeNamespace(namespace) => {
                self.store.del(self.keys.build(namespace).as_str()).await?;
                report.keys_deleted += 1;
            }
            InvalidationStep::PurgePage { namespace, path } => {
                self.store
                    .hdel(self.keys.build(namespace).as_str(), path.as_str())
                    .await?;
                report.fields_deleted += 1;
            }
            InvalidationStep::PurgeCommentVariants { primary } => {
                report.fields_deleted += self.purge_comment_variants(primary).await?;
                report.keys_deleted += 1;
            }
            InvalidationStep::PurgeListingPageOf { item_id } => {
                let Some(rank) = self.positions.rank_of(*item_id).await? else {
                    debug!(item_id, "No rank; listing page left alone");
                    return Ok(());
                };
                let page = listing_page(rank, self.page_size);
                let path = listing_page_path(page);
                self.store
                    .hdel(self.keys.build(&Namespace::Index).as_str(), path.as_str())
                    .await?;
                debug!(item_id, rank, page, path = %path, "Listing page purged");
                report.fields_deleted += 1;
            }
            InvalidationStep::RebuildPositionIndex => match self.content.as_deref() {
                Some(source) => {
                    report.ranked = Some(
                        self.positions
                            .rebuild(source, &self.excluded_categories)
                            .await?,
                    );
                }
                None => {
                    warn!(
                        domain = self.keys.domain(),
                        "No content source configured; position index cleared instead of rebuilt"
                    );
                    self.positions.clear().await?;
                }
            },
        }
        Ok(())
    }

    /// Returns the number of page fields deleted.
    async fn purge_comment_variants(&self, primary: &PagePath) -> Result<usize, StoreError> {
        let set_key = self.keys.comment_set(primary);
        let single = self.keys.build(&Namespace::Single);

        let members = self.store.smembers(set_key.as_str()).await?;
        for member in &members {
            self.store.hdel(single.as_str(), member).await?;
        }
        self.store.hdel(single.as_str(), primary.as_str()).await?;
        self.store.del(set_key.as_str()).await?;

        Ok(members.len() + 1)
    }
}
