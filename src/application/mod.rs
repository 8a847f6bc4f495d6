//! Application layer: error surface and content-platform contracts.

pub mod error;
pub mod repos;
