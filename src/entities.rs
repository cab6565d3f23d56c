//! Local mirrors of the remote business entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Record;

/// Entity classes handled by the sync queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Case,
  Comment,
  SavedReference,
}

impl EntityKind {
  pub const ALL: [EntityKind; 3] = [EntityKind::Case, EntityKind::Comment, EntityKind::SavedReference];

  pub fn as_str(&self) -> &'static str {
    match self {
      EntityKind::Case => "case",
      EntityKind::Comment => "comment",
      EntityKind::SavedReference => "saved_reference",
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitySyncStatus {
  Synced,
  #[default]
  Pending,
  Error,
}

impl EntitySyncStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntitySyncStatus::Synced => "synced",
      EntitySyncStatus::Pending => "pending",
      EntitySyncStatus::Error => "error",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
  pub status: EntitySyncStatus,
  pub last_synced_at: Option<DateTime<Utc>>,
}

/// Records whose sync status the orchestrator and hydration maintain.
pub trait Syncable {
  fn sync_state_mut(&mut self) -> &mut SyncState;
}

/// Entity records the sync queue writes back after confirmation.
pub trait LocalEntity: Record + Syncable {
  type Fields: Clone;

  fn kind() -> EntityKind;

  fn fields(&self) -> &Self::Fields;

  fn confirmed(id: String, fields: Self::Fields) -> Self;
}

/// A file attached to an entity, either still local or already uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentRef {
  /// Captured offline, waiting in the binary store
  Local { binary_id: String },
  Remote {
    url: String,
    file_name: String,
    mime_type: String,
  },
}

impl AttachmentRef {
  pub fn local(binary_id: impl Into<String>) -> Self {
    AttachmentRef::Local {
      binary_id: binary_id.into(),
    }
  }

  pub fn local_id(&self) -> Option<&str> {
    match self {
      AttachmentRef::Local { binary_id } => Some(binary_id),
      AttachmentRef::Remote { .. } => None,
    }
  }
}

/// Workflow state of a case study
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
  #[default]
  Draft,
  Submitted,
  Approved,
  Published,
}

impl CaseStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      CaseStatus::Draft => "draft",
      CaseStatus::Submitted => "submitted",
      CaseStatus::Approved => "approved",
      CaseStatus::Published => "published",
    }
  }
}

/// Business fields of a case study, exactly as sent to the remote system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseFields {
  pub title: String,
  pub summary: String,
  pub industry: String,
  pub case_type: String,
  pub status: CaseStatus,
  pub owner: String,
  /// Upstream directory customer id
  pub customer_id: Option<String>,
  #[serde(default)]
  pub images: Vec<AttachmentRef>,
  #[serde(default)]
  pub supporting_docs: Vec<AttachmentRef>,
}

impl CaseFields {
  pub fn attachments(&self) -> impl Iterator<Item = &AttachmentRef> {
    self.images.iter().chain(self.supporting_docs.iter())
  }

  pub fn attachments_mut(&mut self) -> impl Iterator<Item = &mut AttachmentRef> {
    self.images.iter_mut().chain(self.supporting_docs.iter_mut())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentFields {
  pub case_id: String,
  pub author: String,
  pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedReferenceFields {
  pub owner: String,
  /// Directory resource the reference points into (e.g., "customers")
  pub resource: String,
  pub external_id: String,
  pub label: String,
}

macro_rules! local_entity {
  ($name:ident, $kind:expr, $fields:ty, $collection:literal, |$this:ident| $indexes:expr) => {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct $name {
      /// Local UUID until the remote system assigns an id on create
      pub id: String,
      pub fields: $fields,
      pub sync: SyncState,
      pub updated_at: DateTime<Utc>,
    }

    impl $name {
      /// A record created or edited locally, waiting for sync.
      pub fn new_local(id: String, fields: $fields) -> Self {
        Self {
          id,
          fields,
          sync: SyncState::default(),
          updated_at: Utc::now(),
        }
      }
    }

    impl LocalEntity for $name {
      type Fields = $fields;

      fn kind() -> EntityKind {
        $kind
      }

      fn fields(&self) -> &$fields {
        &self.fields
      }

      /// A record confirmed by the remote system.
      fn confirmed(id: String, fields: $fields) -> Self {
        let now = Utc::now();
        Self {
          id,
          fields,
          sync: SyncState {
            status: EntitySyncStatus::Synced,
            last_synced_at: Some(now),
          },
          updated_at: now,
        }
      }
    }

    impl Syncable for $name {
      fn sync_state_mut(&mut self) -> &mut SyncState {
        &mut self.sync
      }
    }

    impl Record for $name {
      fn id(&self) -> String {
        self.id.clone()
      }

      fn collection() -> &'static str {
        $collection
      }

      fn index_values(&self) -> Vec<(&'static str, String)> {
        let $this = self;
        let mut values: Vec<(&'static str, String)> = $indexes;
        values.push(("sync_status", $this.sync.status.as_str().to_string()));
        values
      }
    }
  };
}

local_entity!(CaseStudy, EntityKind::Case, CaseFields, "cases", |c| vec![
  ("status", c.fields.status.as_str().to_string()),
  ("case_type", c.fields.case_type.clone()),
  ("owner", c.fields.owner.clone()),
  ("industry", c.fields.industry.clone()),
  ("title", c.fields.title.clone()),
]);

local_entity!(LocalComment, EntityKind::Comment, CommentFields, "comments", |c| vec![(
  "case_id",
  c.fields.case_id.clone()
)]);

local_entity!(
  SavedReference,
  EntityKind::SavedReference,
  SavedReferenceFields,
  "saved_references",
  |r| vec![
    ("owner", r.fields.owner.clone()),
    ("resource", r.fields.resource.clone()),
    ("label", r.fields.label.clone()),
  ]
);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_case_indexes_include_sync_status() {
    let case = CaseStudy::new_local(
      "c1".to_string(),
      CaseFields {
        title: "Kiln".to_string(),
        case_type: "energy".to_string(),
        ..CaseFields::default()
      },
    );
    let indexes = case.index_values();
    assert!(indexes.contains(&("sync_status", "pending".to_string())));
    assert!(indexes.contains(&("status", "draft".to_string())));
    assert!(indexes.contains(&("case_type", "energy".to_string())));
  }

  #[test]
  fn test_attachment_ref_wire_format() {
    let json = serde_json::to_value(AttachmentRef::local("b1")).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "local", "binary_id": "b1"}));
  }
}
