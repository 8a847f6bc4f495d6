//! Full-page response cache.
//!
//! Request path: [`context`] → [`decision`] → [`middleware`] side effects.
//! Content path: [`events`] → [`consumer`] → [`planner`] → [`cascade`], with the
//! [`position`] index translating item changes into listing pages.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_seconds = 604800
//! page_size = 10
//! excluded_categories = [3, 7]
//! # ... see config/default.toml for all options
//! ```

pub mod cascade;
mod config;
mod consumer;
pub mod context;
pub mod decision;
mod events;
pub mod keys;
mod lock;
mod middleware;
pub mod path;
mod planner;
pub mod position;
pub mod store;
mod trigger;

pub use cascade::{Cascade, CascadeError, CascadePlan, CascadeReport, InvalidationStep};
pub use config::{CacheConfig, ControlParams};
pub use consumer::CacheConsumer;
pub use context::{BypassReason, RequestContext};
pub use decision::{Action, Predicates, select};
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use keys::{CacheKey, KeyBuilder, Namespace};
pub use middleware::{CacheState, X_CACHE, debug_comment, response_cache_layer, should_store_response};
pub use path::{Classification, PagePath, PageType, normalize};
pub use planner::ConsumptionPlan;
pub use position::PositionIndex;
pub use store::{KvStore, MemoryStore, StoreError, StoreInfo};
pub use trigger::CacheTrigger;
