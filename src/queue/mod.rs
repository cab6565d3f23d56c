//! Pending change queue and the local mutation API that feeds it.

mod change;
mod mutations;
mod pending;

pub use change::{ChangePayload, EntityChange, Operation, PendingChange};
pub use mutations::LocalMutations;
pub use pending::{ChangeQueue, QueueStats};
