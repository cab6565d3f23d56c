//! Write path for local edits.
//!
//! Each mutation writes the local record and appends its pending change in
//! one atomic batch, so reads see the edit immediately whether or not the
//! device is online.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::change::{ChangePayload, EntityChange, Operation};
use super::pending::ChangeQueue;
use crate::binary::{AttachmentField, BinaryObject, BinaryStore, CapturedFile};
use crate::entities::{
  AttachmentRef, CaseFields, CaseStudy, CommentFields, EntitySyncStatus, LocalComment,
  SavedReference, SavedReferenceFields,
};
use crate::error::{Error, Result};
use crate::store::{DocumentStore, WriteOp};

pub struct LocalMutations<S: DocumentStore> {
  store: Arc<S>,
  binaries: BinaryStore<S>,
}

impl<S: DocumentStore> Clone for LocalMutations<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      binaries: self.binaries.clone(),
    }
  }
}

impl<S: DocumentStore> LocalMutations<S> {
  pub fn new(store: Arc<S>, binaries: BinaryStore<S>) -> Self {
    Self { store, binaries }
  }

  /// Fresh local identity for a draft, usable as `parent_temp_id` before the
  /// case itself is created.
  pub fn new_local_id() -> String {
    Uuid::new_v4().to_string()
  }

  pub fn create_case(&self, fields: CaseFields) -> Result<CaseStudy> {
    self.create_case_with_id(Self::new_local_id(), fields)
  }

  pub fn create_case_with_id(&self, local_id: String, fields: CaseFields) -> Result<CaseStudy> {
    let record = CaseStudy::new_local(local_id.clone(), fields.clone());
    self.commit(
      WriteOp::put(&record)?,
      ChangePayload::Case(EntityChange::Create { local_id, fields }),
    )?;
    Ok(record)
  }

  pub fn update_case(&self, id: &str, fields: CaseFields) -> Result<CaseStudy> {
    let mut record: CaseStudy = self
      .store
      .get(id)?
      .ok_or_else(|| Error::NotFound(format!("case {}", id)))?;
    record.fields = fields.clone();
    record.sync.status = EntitySyncStatus::Pending;
    record.updated_at = Utc::now();
    self.commit(
      WriteOp::put(&record)?,
      ChangePayload::Case(EntityChange::Update {
        id: id.to_string(),
        fields,
      }),
    )?;
    Ok(record)
  }

  /// Delete a case. A draft that never reached the server is discarded
  /// instead, so no remote delete is queued for it.
  pub fn delete_case(&self, id: &str) -> Result<()> {
    if self.discard_case(id)? {
      return Ok(());
    }
    self.commit(
      WriteOp::delete::<CaseStudy>(id),
      ChangePayload::Case(EntityChange::Delete { id: id.to_string() }),
    )
  }

  /// Capture a file for a case and queue the updated attachment list.
  pub fn attach(
    &self,
    case_id: &str,
    field: AttachmentField,
    file: CapturedFile,
  ) -> Result<(CaseStudy, BinaryObject)> {
    let mut fields = self
      .store
      .get::<CaseStudy>(case_id)?
      .ok_or_else(|| Error::NotFound(format!("case {}", case_id)))?
      .fields;
    let object = self.binaries.store(file, case_id, field)?;
    let reference = AttachmentRef::local(object.id.clone());
    match field {
      AttachmentField::Images => fields.images.push(reference),
      AttachmentField::SupportingDocs => fields.supporting_docs.push(reference),
    }
    let case = self.update_case(case_id, fields)?;
    Ok((case, object))
  }

  /// Drop a draft that never reached the server.
  ///
  /// Removes its queued changes (and those of comments on it), the local
  /// records and its binaries without any remote call. Returns false if the
  /// case has already been created remotely, in which case nothing changes.
  pub fn discard_case(&self, id: &str) -> Result<bool> {
    let queue = ChangeQueue::new(Arc::clone(&self.store));
    let changes = queue.list()?;
    let unsynced = changes.iter().any(|c| {
      c.payload.target_id() == id
        && c.payload.operation() == Operation::Create
        && matches!(c.payload, ChangePayload::Case(_))
    });
    if !unsynced {
      return Ok(false);
    }

    let comments: Vec<LocalComment> = self.store.query_by_index("case_id", id)?;
    let mut ops: Vec<WriteOp> = changes
      .iter()
      .filter(|c| {
        c.payload.references(id) || comments.iter().any(|m| c.payload.target_id() == m.id)
      })
      .map(|c| WriteOp::delete::<super::PendingChange>(&c.id))
      .collect();
    ops.extend(comments.iter().map(|m| WriteOp::delete::<LocalComment>(&m.id)));
    ops.push(WriteOp::delete::<CaseStudy>(id));
    self.store.write_batch(ops)?;

    let removed = self.binaries.delete_for_parent(id)?;
    info!("Discarded draft {} and {} binaries", id, removed);
    Ok(true)
  }

  pub fn add_comment(&self, fields: CommentFields) -> Result<LocalComment> {
    let local_id = Self::new_local_id();
    let record = LocalComment::new_local(local_id.clone(), fields.clone());
    self.commit(
      WriteOp::put(&record)?,
      ChangePayload::Comment(EntityChange::Create { local_id, fields }),
    )?;
    Ok(record)
  }

  pub fn update_comment(&self, id: &str, body: &str) -> Result<LocalComment> {
    let mut record: LocalComment = self
      .store
      .get(id)?
      .ok_or_else(|| Error::NotFound(format!("comment {}", id)))?;
    record.fields.body = body.to_string();
    record.sync.status = EntitySyncStatus::Pending;
    record.updated_at = Utc::now();
    self.commit(
      WriteOp::put(&record)?,
      ChangePayload::Comment(EntityChange::Update {
        id: id.to_string(),
        fields: record.fields.clone(),
      }),
    )?;
    Ok(record)
  }

  pub fn delete_comment(&self, id: &str) -> Result<()> {
    self.commit(
      WriteOp::delete::<LocalComment>(id),
      ChangePayload::Comment(EntityChange::Delete { id: id.to_string() }),
    )
  }

  pub fn save_reference(&self, fields: SavedReferenceFields) -> Result<SavedReference> {
    let local_id = Self::new_local_id();
    let record = SavedReference::new_local(local_id.clone(), fields.clone());
    self.commit(
      WriteOp::put(&record)?,
      ChangePayload::SavedReference(EntityChange::Create { local_id, fields }),
    )?;
    Ok(record)
  }

  pub fn delete_reference(&self, id: &str) -> Result<()> {
    self.commit(
      WriteOp::delete::<SavedReference>(id),
      ChangePayload::SavedReference(EntityChange::Delete { id: id.to_string() }),
    )
  }

  pub fn hydrate_cases(&self, cases: Vec<CaseStudy>) -> Result<()> {
    self.store.hydrate(cases)
  }

  pub fn hydrate_comments(&self, comments: Vec<LocalComment>) -> Result<()> {
    self.store.hydrate(comments)
  }

  pub fn hydrate_references(&self, references: Vec<SavedReference>) -> Result<()> {
    self.store.hydrate(references)
  }

  fn commit(&self, entity_op: WriteOp, payload: ChangePayload) -> Result<()> {
    let (_, change_op) = ChangeQueue::<S>::prepare(payload)?;
    self.store.write_batch(vec![entity_op, change_op])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::BinaryConfig;
  use crate::store::MemoryStore;

  fn setup() -> (Arc<MemoryStore>, LocalMutations<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let binaries = BinaryStore::new(Arc::clone(&store), BinaryConfig::default());
    (Arc::clone(&store), LocalMutations::new(store, binaries))
  }

  fn fields(title: &str) -> CaseFields {
    CaseFields {
      title: title.to_string(),
      owner: "ana".to_string(),
      ..CaseFields::default()
    }
  }

  #[test]
  fn test_every_mutation_enqueues_one_change() {
    let (store, m) = setup();
    let queue = ChangeQueue::new(Arc::clone(&store));

    let case = m.create_case(fields("Boiler")).unwrap();
    m.update_case(&case.id, fields("Boiler v2")).unwrap();
    let comment = m
      .add_comment(CommentFields {
        case_id: case.id.clone(),
        author: "ben".to_string(),
        body: "Nice".to_string(),
      })
      .unwrap();
    m.delete_comment(&comment.id).unwrap();

    assert_eq!(queue.len().unwrap(), 4);
    let local: CaseStudy = store.get(&case.id).unwrap().unwrap();
    assert_eq!(local.fields.title, "Boiler v2");
    assert_eq!(local.sync.status, EntitySyncStatus::Pending);
    assert!(store.get::<LocalComment>(&comment.id).unwrap().is_none());
  }

  #[test]
  fn test_update_missing_case_is_not_found() {
    let (store, m) = setup();
    assert!(matches!(
      m.update_case("nope", fields("x")),
      Err(Error::NotFound(_))
    ));
    assert_eq!(ChangeQueue::new(store).len().unwrap(), 0);
  }

  #[test]
  fn test_attach_references_binary() {
    let (_, m) = setup();
    let case = m.create_case(fields("Dryer")).unwrap();
    let (case, object) = m
      .attach(
        &case.id,
        AttachmentField::SupportingDocs,
        CapturedFile::new("notes.txt", "text/plain", b"measurements".to_vec()),
      )
      .unwrap();

    assert_eq!(object.parent_temp_id, case.id);
    assert_eq!(case.fields.supporting_docs, vec![AttachmentRef::local(object.id)]);
  }

  #[test]
  fn test_discard_unsynced_draft() {
    let (store, m) = setup();
    let queue = ChangeQueue::new(Arc::clone(&store));
    let case = m.create_case(fields("Scrap me")).unwrap();
    m.attach(
      &case.id,
      AttachmentField::Images,
      CapturedFile::new("a.jpg", "image/jpeg", vec![1; 64]),
    )
    .unwrap();
    m.add_comment(CommentFields {
      case_id: case.id.clone(),
      author: "ana".to_string(),
      body: "draft note".to_string(),
    })
    .unwrap();
    let keep = m.create_case(fields("Keep me")).unwrap();

    assert!(m.discard_case(&case.id).unwrap());

    let remaining = queue.list().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].payload.target_id(), keep.id);
    assert!(store.get::<CaseStudy>(&case.id).unwrap().is_none());
    assert_eq!(store.count("comments").unwrap(), 0);
    assert_eq!(store.count("binaries").unwrap(), 0);
  }

  #[test]
  fn test_discard_synced_case_is_refused() {
    let (store, m) = setup();
    m.hydrate_cases(vec![CaseStudy::new_local("CS-1".to_string(), fields("Remote"))])
      .unwrap();
    assert!(!m.discard_case("CS-1").unwrap());
    assert!(store.get::<CaseStudy>("CS-1").unwrap().is_some());
  }

  #[test]
  fn test_delete_of_unsynced_draft_queues_nothing() {
    let (store, m) = setup();
    let queue = ChangeQueue::new(Arc::clone(&store));
    let draft = m.create_case(fields("Never sent")).unwrap();
    // The create is stuck at the retry ceiling
    let create = queue.list().unwrap().remove(0);
    queue.record_failure(&create.id, "HTTP 422", 3).unwrap();

    m.delete_case(&draft.id).unwrap();

    assert!(queue.is_empty().unwrap());
    assert!(store.get::<CaseStudy>(&draft.id).unwrap().is_none());
  }

  #[test]
  fn test_delete_of_synced_case_is_queued() {
    let (store, m) = setup();
    let queue = ChangeQueue::new(Arc::clone(&store));
    m.hydrate_cases(vec![CaseStudy::new_local("CS-2".to_string(), fields("Remote"))])
      .unwrap();

    m.delete_case("CS-2").unwrap();

    let queued = queue.list().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].payload.operation(), Operation::Delete);
    assert!(store.get::<CaseStudy>("CS-2").unwrap().is_none());
  }
}
