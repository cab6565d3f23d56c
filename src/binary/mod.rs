//! Binary object store for files captured offline.
//!
//! Files are base64-encoded into the durable store with a per-object size
//! limit and a total quota checked before any write. Images also get a small
//! JPEG thumbnail for previews.

pub mod mime;
mod store;
mod thumbnail;

pub use store::{BinaryStats, BinaryStore, StoredFile};
pub use thumbnail::make_thumbnail;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::store::Record;

/// Logical slot a binary belongs to on its parent entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttachmentField {
  #[serde(rename = "images")]
  Images,
  #[serde(rename = "supportingDocs")]
  SupportingDocs,
}

impl AttachmentField {
  pub fn as_str(&self) -> &'static str {
    match self {
      AttachmentField::Images => "images",
      AttachmentField::SupportingDocs => "supportingDocs",
    }
  }
}

impl FromStr for AttachmentField {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "images" => Ok(AttachmentField::Images),
      "supportingDocs" | "supporting_docs" | "docs" => Ok(AttachmentField::SupportingDocs),
      other => Err(Error::UnknownField(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinarySyncStatus {
  #[default]
  Pending,
  Uploading,
  Synced,
  Error,
}

impl BinarySyncStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      BinarySyncStatus::Pending => "pending",
      BinarySyncStatus::Uploading => "uploading",
      BinarySyncStatus::Synced => "synced",
      BinarySyncStatus::Error => "error",
    }
  }
}

/// A raw file handed to the store
#[derive(Debug, Clone)]
pub struct CapturedFile {
  pub file_name: String,
  pub mime_type: String,
  pub bytes: Vec<u8>,
}

impl CapturedFile {
  pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      file_name: file_name.into(),
      mime_type: mime_type.into(),
      bytes,
    }
  }

  /// Read a file from disk, guessing the mime type from its extension when not given.
  pub fn from_path(path: &Path, mime_type: Option<&str>) -> Result<Self> {
    let mime_type = match mime_type {
      Some(m) => m.to_string(),
      None => mime::guess_from_path(path)
        .unwrap_or("application/octet-stream")
        .to_string(),
    };
    let file_name = path
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or("upload")
      .to_string();
    let bytes = std::fs::read(path)?;
    Ok(Self::new(file_name, mime_type, bytes))
  }

  pub fn size(&self) -> u64 {
    self.bytes.len() as u64
  }
}

/// Metadata row for a stored binary.
///
/// The encoded payload lives in a separate `BinaryPayload` row with the same
/// id so quota accounting and status scans never load file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryObject {
  pub id: String,
  /// Local identity of the (possibly unsynced) parent entity
  pub parent_temp_id: String,
  pub field_name: AttachmentField,
  pub mime_type: String,
  pub file_name: String,
  /// Original size in bytes, before encoding
  pub size: u64,
  /// Encoded payload plus thumbnail, the figure counted against the quota
  pub stored_bytes: u64,
  pub has_thumbnail: bool,
  pub sync_status: BinarySyncStatus,
  pub remote_url: Option<String>,
  pub retry_count: u32,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl Record for BinaryObject {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn collection() -> &'static str {
    "binaries"
  }

  fn index_values(&self) -> Vec<(&'static str, String)> {
    vec![
      ("parent_temp_id", self.parent_temp_id.clone()),
      ("sync_status", self.sync_status.as_str().to_string()),
    ]
  }
}

/// Base64 file contents and optional base64 JPEG thumbnail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryPayload {
  pub id: String,
  pub data: String,
  pub thumbnail: Option<String>,
}

impl Record for BinaryPayload {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn collection() -> &'static str {
    "binary_payloads"
  }

  fn index_values(&self) -> Vec<(&'static str, String)> {
    Vec::new()
  }
}

/// Size of `n` bytes once base64-encoded (about 34% larger)
pub fn encoded_size(n: u64) -> u64 {
  n.div_ceil(3) * 4
}
