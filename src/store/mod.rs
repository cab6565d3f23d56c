//! Durable local store.
//!
//! A typed document layer with secondary indexes:
//! - `Record` types declare their collection and index values
//! - `DocumentStore` backends move serialized rows and apply atomic batches
//! - `SqliteStore` persists across restarts, `MemoryStore` backs tests

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{DocumentStore, Record, WriteOp};
