use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::thumbnail::make_thumbnail;
use super::{
  encoded_size, mime, AttachmentField, BinaryObject, BinaryPayload, BinarySyncStatus, CapturedFile,
};
use crate::config::BinaryConfig;
use crate::error::{Error, Result};
use crate::store::{DocumentStore, WriteOp};

/// A decoded file ready for display or upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
  pub file_name: String,
  pub mime_type: String,
  pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BinaryStats {
  pub count: usize,
  pub total_bytes: u64,
  pub pending: usize,
  pub uploading: usize,
  pub synced: usize,
  pub error: usize,
  pub quota_bytes: u64,
  pub usage_percent: f64,
}

/// Quota-aware store for binaries captured offline.
pub struct BinaryStore<S: DocumentStore> {
  store: Arc<S>,
  config: BinaryConfig,
  /// Serializes the usage check with the write that depends on it
  write_lock: Arc<Mutex<()>>,
}

impl<S: DocumentStore> Clone for BinaryStore<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      config: self.config.clone(),
      write_lock: Arc::clone(&self.write_lock),
    }
  }
}

impl<S: DocumentStore> BinaryStore<S> {
  pub fn new(store: Arc<S>, config: BinaryConfig) -> Self {
    Self {
      store,
      config,
      write_lock: Arc::new(Mutex::new(())),
    }
  }

  /// Encode and persist a file for `parent_temp_id`.
  ///
  /// Every rejection (size, quota, mime type) happens before anything is
  /// written, so a failed call leaves usage and object count unchanged.
  pub fn store(
    &self,
    file: CapturedFile,
    parent_temp_id: &str,
    field: AttachmentField,
  ) -> Result<BinaryObject> {
    let size = file.size();
    if size > self.config.max_object_bytes {
      return Err(Error::ObjectTooLarge {
        size,
        max: self.config.max_object_bytes,
      });
    }

    let _guard = self.write_lock.lock()?;

    let usage = self.usage()?;
    let available = self.config.quota_bytes.saturating_sub(usage);
    let estimate = encoded_size(size);
    if estimate > available {
      return Err(Error::QuotaExceeded {
        requested: estimate,
        available,
      });
    }

    mime::validate(field, &file.mime_type)?;
    let mime_type = file.mime_type.trim().to_lowercase();

    let data = STANDARD.encode(&file.bytes);
    let mut thumbnail = if mime::is_thumbnailable(&mime_type) {
      match make_thumbnail(
        &file.bytes,
        self.config.thumbnail_max_side,
        self.config.thumbnail_quality,
      ) {
        Ok(thumb) => Some(STANDARD.encode(thumb)),
        Err(e) => {
          warn!("Storing {} without thumbnail: {}", file.file_name, e);
          None
        }
      }
    } else {
      None
    };

    // The estimate does not cover the thumbnail; drop it rather than overshoot
    let payload_bytes = data.len() as u64;
    if let Some(thumb) = &thumbnail {
      if payload_bytes + thumb.len() as u64 > available {
        debug!("Dropping thumbnail for {} to stay within quota", file.file_name);
        thumbnail = None;
      }
    }
    let stored_bytes = payload_bytes + thumbnail.as_ref().map(|t| t.len() as u64).unwrap_or(0);

    let object = BinaryObject {
      id: Uuid::new_v4().to_string(),
      parent_temp_id: parent_temp_id.to_string(),
      field_name: field,
      mime_type,
      file_name: file.file_name,
      size,
      stored_bytes,
      has_thumbnail: thumbnail.is_some(),
      sync_status: BinarySyncStatus::Pending,
      remote_url: None,
      retry_count: 0,
      last_error: None,
      created_at: Utc::now(),
    };
    let payload = BinaryPayload {
      id: object.id.clone(),
      data,
      thumbnail,
    };

    self
      .store
      .write_batch(vec![WriteOp::put(&object)?, WriteOp::put(&payload)?])?;

    info!(
      "Stored {} ({} bytes) for {} as {}",
      object.file_name, size, parent_temp_id, object.id
    );
    Ok(object)
  }

  /// Total bytes counted against the quota
  pub fn usage(&self) -> Result<u64> {
    Ok(self.all()?.iter().map(|o| o.stored_bytes).sum())
  }

  pub fn get(&self, id: &str) -> Result<Option<BinaryObject>> {
    self.store.get(id)
  }

  pub fn all(&self) -> Result<Vec<BinaryObject>> {
    self.store.all()
  }

  pub fn list_for_parent(&self, parent_temp_id: &str) -> Result<Vec<BinaryObject>> {
    self.store.query_by_index("parent_temp_id", parent_temp_id)
  }

  /// Reconstruct the original file.
  pub fn load(&self, id: &str) -> Result<Option<StoredFile>> {
    let (object, payload) = match (self.get(id)?, self.store.get::<BinaryPayload>(id)?) {
      (Some(o), Some(p)) => (o, p),
      _ => return Ok(None),
    };
    let bytes = STANDARD
      .decode(payload.data.as_bytes())
      .map_err(|e| Error::Encoding(format!("Corrupt payload for {}: {}", id, e)))?;

    Ok(Some(StoredFile {
      file_name: object.file_name,
      mime_type: object.mime_type,
      bytes,
    }))
  }

  /// `data:` URL of the full file for in-app preview.
  pub fn data_url(&self, id: &str) -> Result<Option<String>> {
    let (object, payload) = match (self.get(id)?, self.store.get::<BinaryPayload>(id)?) {
      (Some(o), Some(p)) => (o, p),
      _ => return Ok(None),
    };
    Ok(Some(format!("data:{};base64,{}", object.mime_type, payload.data)))
  }

  pub fn thumbnail_data_url(&self, id: &str) -> Result<Option<String>> {
    Ok(
      self
        .store
        .get::<BinaryPayload>(id)?
        .and_then(|p| p.thumbnail)
        .map(|t| format!("data:image/jpeg;base64,{}", t)),
    )
  }

  pub fn delete(&self, id: &str) -> Result<()> {
    self.store.write_batch(vec![
      WriteOp::delete::<BinaryObject>(id),
      WriteOp::delete::<BinaryPayload>(id),
    ])
  }

  /// Remove every binary of a parent, returning how many were removed.
  pub fn delete_for_parent(&self, parent_temp_id: &str) -> Result<usize> {
    let objects = self.list_for_parent(parent_temp_id)?;
    let mut ops = Vec::with_capacity(objects.len() * 2);
    for object in &objects {
      ops.push(WriteOp::delete::<BinaryObject>(&object.id));
      ops.push(WriteOp::delete::<BinaryPayload>(&object.id));
    }
    self.store.write_batch(ops)?;
    Ok(objects.len())
  }

  /// Writes moving binaries to a parent's server-assigned id.
  pub fn reassign_parent_ops(&self, old_parent: &str, new_parent: &str) -> Result<Vec<WriteOp>> {
    let mut objects = self.list_for_parent(old_parent)?;
    for object in &mut objects {
      object.parent_temp_id = new_parent.to_string();
    }
    objects.iter().map(WriteOp::put).collect()
  }

  pub fn stats(&self) -> Result<BinaryStats> {
    let mut stats = BinaryStats {
      quota_bytes: self.config.quota_bytes,
      ..BinaryStats::default()
    };
    for object in self.all()? {
      stats.count += 1;
      stats.total_bytes += object.stored_bytes;
      match object.sync_status {
        BinarySyncStatus::Pending => stats.pending += 1,
        BinarySyncStatus::Uploading => stats.uploading += 1,
        BinarySyncStatus::Synced => stats.synced += 1,
        BinarySyncStatus::Error => stats.error += 1,
      }
    }
    if stats.quota_bytes > 0 {
      stats.usage_percent = stats.total_bytes as f64 / stats.quota_bytes as f64 * 100.0;
    }
    Ok(stats)
  }

  /// Binaries eligible for upload, oldest first.
  ///
  /// `error` rows are included while their retry count is below `max_attempts`.
  pub fn pending_uploads(&self, max_attempts: u32) -> Result<Vec<BinaryObject>> {
    let mut objects: Vec<BinaryObject> = self
      .all()?
      .into_iter()
      .filter(|o| match o.sync_status {
        BinarySyncStatus::Pending | BinarySyncStatus::Uploading => true,
        BinarySyncStatus::Error => o.retry_count < max_attempts,
        BinarySyncStatus::Synced => false,
      })
      .collect();
    objects.sort_by_key(|o| o.created_at);
    Ok(objects)
  }

  /// Return uploads interrupted by a crash to `pending`.
  pub fn reset_interrupted(&self) -> Result<usize> {
    let mut objects: Vec<BinaryObject> = self
      .store
      .query_by_index("sync_status", BinarySyncStatus::Uploading.as_str())?;
    for object in &mut objects {
      object.sync_status = BinarySyncStatus::Pending;
    }
    self.store.bulk_put(&objects)?;
    Ok(objects.len())
  }

  pub fn mark_uploading(&self, id: &str) -> Result<()> {
    self.update(id, |o| o.sync_status = BinarySyncStatus::Uploading)
  }

  pub fn mark_synced(&self, id: &str, remote_url: &str) -> Result<()> {
    self.update(id, |o| {
      o.sync_status = BinarySyncStatus::Synced;
      o.remote_url = Some(remote_url.to_string());
      o.last_error = None;
    })
  }

  pub fn mark_failed(&self, id: &str, message: &str, retry_count: u32) -> Result<()> {
    self.update(id, |o| {
      o.sync_status = BinarySyncStatus::Error;
      o.retry_count = retry_count;
      o.last_error = Some(message.to_string());
    })
  }

  /// Give a failed upload a fresh retry budget. Returns false unless the
  /// binary was in `error`.
  pub fn reset_failed(&self, id: &str) -> Result<bool> {
    let Some(mut object) = self.get(id)? else {
      return Ok(false);
    };
    if object.sync_status != BinarySyncStatus::Error {
      return Ok(false);
    }
    object.sync_status = BinarySyncStatus::Pending;
    object.retry_count = 0;
    self.store.put(&object)?;
    debug!("Binary {} reset for upload", id);
    Ok(true)
  }

  fn update<F>(&self, id: &str, apply: F) -> Result<()>
  where
    F: FnOnce(&mut BinaryObject),
  {
    let mut object = self
      .get(id)?
      .ok_or_else(|| Error::NotFound(format!("binary {}", id)))?;
    apply(&mut object);
    self.store.put(&object)
  }
}

#[cfg(test)]
mod tests {
  use super::super::thumbnail::sample_png;
  use super::*;
  use crate::store::MemoryStore;

  const MB: u64 = 1024 * 1024;

  fn binary_store() -> BinaryStore<MemoryStore> {
    BinaryStore::new(Arc::new(MemoryStore::new()), BinaryConfig::default())
  }

  fn jpeg_of(size: u64) -> CapturedFile {
    CapturedFile::new("photo.jpg", "image/jpeg", vec![0xAB; size as usize])
  }

  #[test]
  fn test_accepts_files_under_limits() {
    let store = binary_store();
    let a = store.store(jpeg_of(3 * MB), "case-1", AttachmentField::Images).unwrap();
    let b = store.store(jpeg_of(4 * MB), "case-1", AttachmentField::Images).unwrap();

    assert_eq!(a.sync_status, BinarySyncStatus::Pending);
    assert_eq!(a.stored_bytes, encoded_size(3 * MB));
    // Random bytes are not a decodable image; stored without thumbnail
    assert!(!b.has_thumbnail);
    assert_eq!(store.list_for_parent("case-1").unwrap().len(), 2);
  }

  #[test]
  fn test_rejects_oversized_file_without_writing() {
    let store = binary_store();
    let err = store
      .store(jpeg_of(6 * MB), "case-1", AttachmentField::Images)
      .unwrap_err();

    assert!(matches!(err, Error::ObjectTooLarge { .. }));
    assert_eq!(store.stats().unwrap().count, 0);
    assert_eq!(store.usage().unwrap(), 0);
  }

  #[test]
  fn test_quota_rejection_is_atomic() {
    let store = BinaryStore::new(
      Arc::new(MemoryStore::new()),
      BinaryConfig {
        quota_bytes: 10 * MB,
        ..BinaryConfig::default()
      },
    );
    store.store(jpeg_of(4 * MB), "case-1", AttachmentField::Images).unwrap();
    let before = store.stats().unwrap();

    // 4 MB encodes to ~5.3 MB; two of them exceed 10 MB
    let err = store
      .store(jpeg_of(4 * MB), "case-1", AttachmentField::Images)
      .unwrap_err();

    assert!(matches!(err, Error::QuotaExceeded { .. }));
    let after = store.stats().unwrap();
    assert_eq!(after.count, before.count);
    assert_eq!(after.total_bytes, before.total_bytes);
  }

  #[test]
  fn test_mime_type_checked_per_field() {
    let store = binary_store();
    let pdf = CapturedFile::new("datasheet.pdf", "application/pdf", b"%PDF-1.4".to_vec());
    assert!(matches!(
      store.store(pdf.clone(), "case-1", AttachmentField::Images),
      Err(Error::UnsupportedMimeType { .. })
    ));
    let stored = store.store(pdf, "case-1", AttachmentField::SupportingDocs).unwrap();
    assert!(!stored.has_thumbnail);
  }

  #[test]
  fn test_image_gets_thumbnail_and_round_trips() {
    let store = binary_store();
    let png = sample_png(640, 480);
    let object = store
      .store(
        CapturedFile::new("plant.png", "image/png", png.clone()),
        "case-1",
        AttachmentField::Images,
      )
      .unwrap();

    assert!(object.has_thumbnail);
    let loaded = store.load(&object.id).unwrap().unwrap();
    assert_eq!(loaded.bytes, png);
    assert_eq!(loaded.mime_type, "image/png");

    let preview = store.thumbnail_data_url(&object.id).unwrap().unwrap();
    assert!(preview.starts_with("data:image/jpeg;base64,"));
    let full = store.data_url(&object.id).unwrap().unwrap();
    assert!(full.starts_with("data:image/png;base64,"));
    assert!(object.stored_bytes > encoded_size(png.len() as u64));
  }

  #[test]
  fn test_delete_for_parent_and_stats() {
    let store = binary_store();
    store.store(jpeg_of(MB), "case-1", AttachmentField::Images).unwrap();
    store.store(jpeg_of(MB), "case-1", AttachmentField::Images).unwrap();
    let other = store.store(jpeg_of(MB), "case-2", AttachmentField::Images).unwrap();
    store.mark_synced(&other.id, "https://cdn/x.jpg").unwrap();

    let stats = store.stats().unwrap();
    assert_eq!((stats.count, stats.pending, stats.synced), (3, 2, 1));
    assert!(stats.usage_percent > 0.0 && stats.usage_percent < 100.0);

    assert_eq!(store.delete_for_parent("case-1").unwrap(), 2);
    assert_eq!(store.delete_for_parent("case-1").unwrap(), 0);
    assert_eq!(store.stats().unwrap().count, 1);
    assert!(store.load(&other.id).unwrap().is_some());
  }

  #[test]
  fn test_pending_uploads_respects_retry_ceiling() {
    let store = binary_store();
    let a = store.store(jpeg_of(10), "p", AttachmentField::Images).unwrap();
    let b = store.store(jpeg_of(10), "p", AttachmentField::Images).unwrap();
    store.mark_failed(&a.id, "timeout", 1).unwrap();
    store.mark_failed(&b.id, "timeout", 3).unwrap();

    let eligible = store.pending_uploads(3).unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].id, a.id);
  }

  #[test]
  fn test_reset_failed_restores_eligibility() {
    let store = binary_store();
    let a = store.store(jpeg_of(10), "p", AttachmentField::Images).unwrap();
    let b = store.store(jpeg_of(10), "p", AttachmentField::Images).unwrap();
    store.mark_failed(&a.id, "timeout", 3).unwrap();
    assert!(store.pending_uploads(3).unwrap().iter().all(|o| o.id != a.id));

    assert!(store.reset_failed(&a.id).unwrap());
    let reset = store.get(&a.id).unwrap().unwrap();
    assert_eq!(reset.sync_status, BinarySyncStatus::Pending);
    assert_eq!(reset.retry_count, 0);
    assert_eq!(store.pending_uploads(3).unwrap().len(), 2);

    // Only failed uploads are touched
    assert!(!store.reset_failed(&b.id).unwrap());
    assert!(!store.reset_failed("missing").unwrap());
  }

  #[test]
  fn test_reassign_parent_ops_cover_every_binary() {
    let store = binary_store();
    store.store(jpeg_of(10), "tmp", AttachmentField::Images).unwrap();
    store.store(jpeg_of(10), "tmp", AttachmentField::Images).unwrap();

    let ops = store.reassign_parent_ops("tmp", "CS-1").unwrap();
    assert_eq!(ops.len(), 2);
    store.store.write_batch(ops).unwrap();
    assert!(store.list_for_parent("tmp").unwrap().is_empty());
    assert_eq!(store.list_for_parent("CS-1").unwrap().len(), 2);
  }

  #[test]
  fn test_reset_interrupted_uploads() {
    let store = binary_store();
    let a = store.store(jpeg_of(10), "p", AttachmentField::Images).unwrap();
    store.mark_uploading(&a.id).unwrap();
    assert_eq!(store.reset_interrupted().unwrap(), 1);
    assert_eq!(
      store.get(&a.id).unwrap().unwrap().sync_status,
      BinarySyncStatus::Pending
    );
  }
}
