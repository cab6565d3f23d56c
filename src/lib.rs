//! Offline-first sync core for case study authoring.
//!
//! - `store`: durable local document store with secondary indexes
//! - `binary`: quota-aware store for captured files and thumbnails
//! - `queue`: pending change queue and the local mutation API
//! - `sync`: orchestrator draining the queue against the remote API
//! - `mirror`: chunked TTL cache of upstream directory datasets

pub mod binary;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod mirror;
pub mod queue;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
