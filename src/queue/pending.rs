use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::change::{ChangePayload, PendingChange};
use crate::error::{Error, Result};
use crate::store::{DocumentStore, WriteOp};

/// Counts surfaced to the host UI ("N waiting", "N failed")
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
  pub total: usize,
  /// Still eligible for another attempt
  pub waiting: usize,
  /// Retry ceiling reached, needs user attention
  pub failed: usize,
}

/// Durable FIFO of pending changes.
pub struct ChangeQueue<S: DocumentStore> {
  store: Arc<S>,
}

impl<S: DocumentStore> Clone for ChangeQueue<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

impl<S: DocumentStore> ChangeQueue<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  /// Append a change on its own.
  pub fn enqueue(&self, payload: ChangePayload) -> Result<PendingChange> {
    let (change, op) = Self::prepare(payload)?;
    self.store.write_batch(vec![op])?;
    Ok(change)
  }

  /// Build a change plus the write that appends it, for callers batching it
  /// with the matching entity write.
  pub fn prepare(payload: ChangePayload) -> Result<(PendingChange, WriteOp)> {
    let change = PendingChange::new(payload);
    let op = WriteOp::put(&change)?;
    debug!(
      "Queued {} {} for {}",
      change.payload.operation().as_str(),
      change.payload.entity().as_str(),
      change.payload.target_id()
    );
    Ok((change, op))
  }

  pub fn get(&self, id: &str) -> Result<Option<PendingChange>> {
    self.store.get(id)
  }

  /// All changes in creation order.
  pub fn list(&self) -> Result<Vec<PendingChange>> {
    let mut changes: Vec<PendingChange> = self.store.all()?;
    // Stable sort: equal timestamps keep insertion order
    changes.sort_by_key(|c| c.created_at);
    Ok(changes)
  }

  /// Changes targeting the given entity id.
  pub fn changes_for(&self, target_id: &str) -> Result<Vec<PendingChange>> {
    self.store.query_by_index("target", target_id)
  }

  pub fn len(&self) -> Result<usize> {
    self.store.count("pending_changes")
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  pub fn remove(&self, id: &str) -> Result<()> {
    self.store.delete::<PendingChange>(id)
  }

  /// Record a failed attempt, leaving the change queued.
  pub fn record_failure(&self, id: &str, message: &str, retry_count: u32) -> Result<PendingChange> {
    let mut change = self
      .get(id)?
      .ok_or_else(|| Error::NotFound(format!("pending change {}", id)))?;
    change.retry_count = retry_count;
    change.last_error = Some(message.to_string());
    self.store.put(&change)?;
    Ok(change)
  }

  pub fn permanently_failed(&self, max_attempts: u32) -> Result<Vec<PendingChange>> {
    Ok(
      self
        .list()?
        .into_iter()
        .filter(|c| c.retry_count >= max_attempts)
        .collect(),
    )
  }

  /// Make a permanently failed change eligible again (user "tap to retry").
  pub fn retry(&self, id: &str) -> Result<PendingChange> {
    let mut change = self
      .get(id)?
      .ok_or_else(|| Error::NotFound(format!("pending change {}", id)))?;
    change.retry_count = 0;
    self.store.put(&change)?;
    info!("Change {} reset for retry", id);
    Ok(change)
  }

  /// Queued changes that mention `old`, rewritten to use `new`.
  ///
  /// Nothing is written; callers commit the result with the write that
  /// makes `new` the entity's id.
  pub fn remapped(&self, old: &str, new: &str) -> Result<Vec<PendingChange>> {
    let mut remapped = Vec::new();
    for mut change in self.list()? {
      if change.payload.remap_id(old, new) {
        remapped.push(change);
      }
    }
    if !remapped.is_empty() {
      debug!("Remapping {} queued changes from {} to {}", remapped.len(), old, new);
    }
    Ok(remapped)
  }

  /// Whether any queued change still points at the binary
  pub fn references_binary(&self, binary_id: &str) -> Result<bool> {
    Ok(
      self
        .list()?
        .iter()
        .any(|c| c.payload.local_attachment_ids().iter().any(|b| b == binary_id)),
    )
  }

  pub fn stats(&self, max_attempts: u32) -> Result<QueueStats> {
    let changes = self.list()?;
    let failed = changes.iter().filter(|c| c.retry_count >= max_attempts).count();
    Ok(QueueStats {
      total: changes.len(),
      waiting: changes.len() - failed,
      failed,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entities::{CommentFields, SavedReferenceFields};
  use crate::queue::change::EntityChange;
  use crate::store::MemoryStore;

  fn queue() -> ChangeQueue<MemoryStore> {
    ChangeQueue::new(Arc::new(MemoryStore::new()))
  }

  fn comment_create(id: &str, case_id: &str) -> ChangePayload {
    ChangePayload::Comment(EntityChange::Create {
      local_id: id.to_string(),
      fields: CommentFields {
        case_id: case_id.to_string(),
        author: "ana".to_string(),
        body: "note".to_string(),
      },
    })
  }

  #[test]
  fn test_list_is_fifo() {
    let q = queue();
    let ids: Vec<String> = (0..5)
      .map(|i| q.enqueue(comment_create(&format!("m{}", i), "c1")).unwrap().id)
      .collect();

    let listed: Vec<String> = q.list().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(listed, ids);
    assert_eq!(q.len().unwrap(), 5);
  }

  #[test]
  fn test_failure_keeps_change_and_counts() {
    let q = queue();
    let change = q.enqueue(comment_create("m1", "c1")).unwrap();
    q.record_failure(&change.id, "HTTP 503", 1).unwrap();
    q.record_failure(&change.id, "HTTP 503", 3).unwrap();

    let stored = q.get(&change.id).unwrap().unwrap();
    assert_eq!(stored.retry_count, 3);
    assert_eq!(stored.last_error.as_deref(), Some("HTTP 503"));
    assert_eq!(q.permanently_failed(3).unwrap().len(), 1);
    assert_eq!(
      q.stats(3).unwrap(),
      QueueStats {
        total: 1,
        waiting: 0,
        failed: 1
      }
    );

    q.retry(&change.id).unwrap();
    assert!(q.permanently_failed(3).unwrap().is_empty());
  }

  #[test]
  fn test_remapped_rewrites_without_writing() {
    let q = queue();
    q.enqueue(comment_create("m1", "tmp-1")).unwrap();
    q.enqueue(comment_create("m2", "other")).unwrap();
    q.enqueue(ChangePayload::SavedReference(EntityChange::Create {
      local_id: "r1".to_string(),
      fields: SavedReferenceFields::default(),
    }))
    .unwrap();

    let remapped = q.remapped("tmp-1", "CS-9").unwrap();
    assert_eq!(remapped.len(), 1);
    // Not applied until committed
    assert!(q.list().unwrap()[0].payload.references("tmp-1"));

    q.store.bulk_put(&remapped).unwrap();
    let first = &q.list().unwrap()[0];
    assert!(first.payload.references("CS-9"));
    // Order survives the rewrite
    assert_eq!(first.payload.target_id(), "m1");
  }
}
