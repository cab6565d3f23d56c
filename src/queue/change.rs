//! Pending change types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{AttachmentRef, CaseFields, CommentFields, EntityKind, SavedReferenceFields};
use crate::store::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
  Create,
  Update,
  Delete,
}

impl Operation {
  pub fn as_str(&self) -> &'static str {
    match self {
      Operation::Create => "create",
      Operation::Update => "update",
      Operation::Delete => "delete",
    }
  }
}

/// One mutation of an entity with payload shape `T`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EntityChange<T> {
  Create { local_id: String, fields: T },
  Update { id: String, fields: T },
  Delete { id: String },
}

impl<T> EntityChange<T> {
  pub fn operation(&self) -> Operation {
    match self {
      EntityChange::Create { .. } => Operation::Create,
      EntityChange::Update { .. } => Operation::Update,
      EntityChange::Delete { .. } => Operation::Delete,
    }
  }

  pub fn target_id(&self) -> &str {
    match self {
      EntityChange::Create { local_id, .. } => local_id,
      EntityChange::Update { id, .. } | EntityChange::Delete { id } => id,
    }
  }

  pub fn fields(&self) -> Option<&T> {
    match self {
      EntityChange::Create { fields, .. } | EntityChange::Update { fields, .. } => Some(fields),
      EntityChange::Delete { .. } => None,
    }
  }

  fn fields_mut(&mut self) -> Option<&mut T> {
    match self {
      EntityChange::Create { fields, .. } | EntityChange::Update { fields, .. } => Some(fields),
      EntityChange::Delete { .. } => None,
    }
  }

  fn remap_target(&mut self, old: &str, new: &str) -> bool {
    let id = match self {
      EntityChange::Create { local_id, .. } => local_id,
      EntityChange::Update { id, .. } | EntityChange::Delete { id } => id,
    };
    if id == old {
      *id = new.to_string();
      true
    } else {
      false
    }
  }
}

/// Snapshot of a queued mutation, one variant per entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "change", rename_all = "snake_case")]
pub enum ChangePayload {
  Case(EntityChange<CaseFields>),
  Comment(EntityChange<CommentFields>),
  SavedReference(EntityChange<SavedReferenceFields>),
}

impl ChangePayload {
  pub fn entity(&self) -> EntityKind {
    match self {
      ChangePayload::Case(_) => EntityKind::Case,
      ChangePayload::Comment(_) => EntityKind::Comment,
      ChangePayload::SavedReference(_) => EntityKind::SavedReference,
    }
  }

  pub fn operation(&self) -> Operation {
    match self {
      ChangePayload::Case(c) => c.operation(),
      ChangePayload::Comment(c) => c.operation(),
      ChangePayload::SavedReference(c) => c.operation(),
    }
  }

  pub fn target_id(&self) -> &str {
    match self {
      ChangePayload::Case(c) => c.target_id(),
      ChangePayload::Comment(c) => c.target_id(),
      ChangePayload::SavedReference(c) => c.target_id(),
    }
  }

  /// Binary ids still referenced locally by this payload
  pub fn local_attachment_ids(&self) -> Vec<String> {
    match self {
      ChangePayload::Case(c) => c
        .fields()
        .map(|f| {
          f.attachments()
            .filter_map(|a| a.local_id().map(String::from))
            .collect()
        })
        .unwrap_or_default(),
      ChangePayload::Comment(_) | ChangePayload::SavedReference(_) => Vec::new(),
    }
  }

  pub fn attachments_mut(&mut self) -> Vec<&mut AttachmentRef> {
    match self {
      ChangePayload::Case(c) => c
        .fields_mut()
        .map(|f| f.attachments_mut().collect())
        .unwrap_or_default(),
      ChangePayload::Comment(_) | ChangePayload::SavedReference(_) => Vec::new(),
    }
  }

  /// Replace a temporary entity id with the server-assigned one, wherever it
  /// appears. Returns true if anything changed.
  pub fn remap_id(&mut self, old: &str, new: &str) -> bool {
    match self {
      ChangePayload::Case(c) => c.remap_target(old, new),
      ChangePayload::Comment(c) => {
        let mut changed = c.remap_target(old, new);
        if let Some(fields) = c.fields_mut() {
          if fields.case_id == old {
            fields.case_id = new.to_string();
            changed = true;
          }
        }
        changed
      }
      ChangePayload::SavedReference(c) => c.remap_target(old, new),
    }
  }

  /// Whether this payload targets or points at `id`
  pub fn references(&self, id: &str) -> bool {
    if self.target_id() == id {
      return true;
    }
    match self {
      ChangePayload::Comment(c) => c.fields().map(|f| f.case_id == id).unwrap_or(false),
      ChangePayload::Case(_) | ChangePayload::SavedReference(_) => false,
    }
  }
}

/// A mutation not yet confirmed by the remote system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
  pub id: String,
  pub payload: ChangePayload,
  pub created_at: DateTime<Utc>,
  pub retry_count: u32,
  pub last_error: Option<String>,
}

impl PendingChange {
  pub fn new(payload: ChangePayload) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      payload,
      created_at: Utc::now(),
      retry_count: 0,
      last_error: None,
    }
  }
}

impl Record for PendingChange {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn collection() -> &'static str {
    "pending_changes"
  }

  fn index_values(&self) -> Vec<(&'static str, String)> {
    vec![
      ("entity", self.payload.entity().as_str().to_string()),
      ("target", self.payload.target_id().to_string()),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_remap_rewrites_comment_parent() {
    let mut payload = ChangePayload::Comment(EntityChange::Create {
      local_id: "m1".to_string(),
      fields: CommentFields {
        case_id: "tmp-case".to_string(),
        author: "ana".to_string(),
        body: "hi".to_string(),
      },
    });
    assert!(payload.references("tmp-case"));
    assert!(payload.remap_id("tmp-case", "CS-100"));
    assert!(payload.references("CS-100"));
    assert!(!payload.remap_id("tmp-case", "CS-100"));
  }

  #[test]
  fn test_payload_wire_format() {
    let payload = ChangePayload::Case(EntityChange::Delete {
      id: "CS-1".to_string(),
    });
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(
      json,
      serde_json::json!({"entity": "case", "change": {"op": "delete", "id": "CS-1"}})
    );
    assert_eq!(payload.operation(), Operation::Delete);
  }
}
