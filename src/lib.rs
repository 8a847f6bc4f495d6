//! Full-page response cache for content sites.
//!
//! Requests pass through [`cache::response_cache_layer`] in front of an origin
//! renderer; content events drive the invalidation cascade in [`cache::cascade`].

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
