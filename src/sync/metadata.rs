//! Per-class sync status, kept for the host UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::entities::EntityKind;
use crate::error::Result;
use crate::store::{DocumentStore, Record};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
  #[default]
  Idle,
  Syncing,
  Error,
}

/// What a metadata row describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncClass {
  Binaries,
  Entity(EntityKind),
}

impl SyncClass {
  pub fn all() -> Vec<SyncClass> {
    std::iter::once(SyncClass::Binaries)
      .chain(EntityKind::ALL.into_iter().map(SyncClass::Entity))
      .collect()
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      SyncClass::Binaries => "binaries",
      SyncClass::Entity(kind) => kind.as_str(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
  pub class: String,
  pub phase: SyncPhase,
  pub last_error: Option<String>,
  pub last_sync_at: Option<DateTime<Utc>>,
}

impl Record for SyncMetadata {
  fn id(&self) -> String {
    self.class.clone()
  }

  fn collection() -> &'static str {
    "sync_metadata"
  }

  fn index_values(&self) -> Vec<(&'static str, String)> {
    Vec::new()
  }
}

pub struct MetadataStore<S: DocumentStore> {
  store: Arc<S>,
}

impl<S: DocumentStore> MetadataStore<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  pub fn get(&self, class: SyncClass) -> Result<SyncMetadata> {
    Ok(self.store.get(class.as_str())?.unwrap_or_else(|| SyncMetadata {
      class: class.as_str().to_string(),
      phase: SyncPhase::Idle,
      last_error: None,
      last_sync_at: None,
    }))
  }

  pub fn all(&self) -> Result<Vec<SyncMetadata>> {
    SyncClass::all().into_iter().map(|c| self.get(c)).collect()
  }

  pub fn begin(&self, class: SyncClass) -> Result<()> {
    let mut meta = self.get(class)?;
    meta.phase = SyncPhase::Syncing;
    self.store.put(&meta)
  }

  /// Close out a pass for one class: `idle` when `error` is None.
  pub fn finish(&self, class: SyncClass, error: Option<String>) -> Result<()> {
    let mut meta = self.get(class)?;
    meta.phase = if error.is_some() {
      SyncPhase::Error
    } else {
      SyncPhase::Idle
    };
    meta.last_error = error;
    meta.last_sync_at = Some(Utc::now());
    self.store.put(&meta)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;

  #[test]
  fn test_unknown_class_reads_as_idle() {
    let meta = MetadataStore::new(Arc::new(MemoryStore::new()));
    let binaries = meta.get(SyncClass::Binaries).unwrap();
    assert_eq!(binaries.phase, SyncPhase::Idle);
    assert!(binaries.last_sync_at.is_none());
    assert_eq!(meta.all().unwrap().len(), 4);
  }

  #[test]
  fn test_finish_records_error_and_clears_it() {
    let meta = MetadataStore::new(Arc::new(MemoryStore::new()));
    let class = SyncClass::Entity(EntityKind::Comment);

    meta.begin(class).unwrap();
    assert_eq!(meta.get(class).unwrap().phase, SyncPhase::Syncing);

    meta.finish(class, Some("1 failed: HTTP 503".to_string())).unwrap();
    let failed = meta.get(class).unwrap();
    assert_eq!(failed.phase, SyncPhase::Error);
    assert_eq!(failed.class, "comment");

    meta.finish(class, None).unwrap();
    let recovered = meta.get(class).unwrap();
    assert_eq!(recovered.phase, SyncPhase::Idle);
    assert!(recovered.last_error.is_none());
  }
}
