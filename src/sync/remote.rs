//! Remote collaborators the orchestrator calls into.

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::queue::ChangePayload;

/// A decoded binary on its way to the upload endpoint
#[derive(Debug, Clone)]
pub struct BinaryUpload {
  pub binary_id: String,
  pub field_name: String,
  pub file_name: String,
  pub mime_type: String,
  pub bytes: Vec<u8>,
}

/// Server response to an entity mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
  /// Identity assigned on create
  pub remote_id: Option<String>,
}

/// Case study API: binary uploads and entity mutations.
#[async_trait]
pub trait RemoteApi: Send + Sync {
  /// Upload one file and return its durable URL.
  async fn upload_binary(&self, upload: BinaryUpload) -> Result<String, RemoteError>;

  /// Apply one create/update/delete.
  async fn push_change(&self, payload: &ChangePayload) -> Result<PushOutcome, RemoteError>;

  /// Cheap reachability check.
  async fn ping(&self) -> Result<(), RemoteError>;
}
