//! Domain layer: content items, their lifecycle and their public paths.

pub mod entities;
pub mod permalink;
pub mod types;
