//! Error types shared by every layer of the sync core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  #[error("Database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// Storing the object would push total binary usage over the quota
  #[error("Storage quota exceeded: need {requested} bytes, {available} available")]
  QuotaExceeded { requested: u64, available: u64 },

  #[error("File is {size} bytes, the limit is {max} bytes")]
  ObjectTooLarge { size: u64, max: u64 },

  #[error("Mime type {mime} is not accepted for {field}")]
  UnsupportedMimeType { field: String, mime: String },

  #[error("Unknown attachment field: {0}")]
  UnknownField(String),

  #[error("Encoding error: {0}")]
  Encoding(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Cache error: {0}")]
  Cache(String),

  /// A single mirrored item serializes larger than the chunk budget
  #[error("Item of {size} bytes does not fit in a {budget} byte chunk")]
  ChunkTooLarge { size: usize, budget: usize },

  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error("Configuration error: {0}")]
  Config(String),

  #[error("Lock poisoned: {0}")]
  LockPoisoned(String),
}

/// How a remote failure should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
  /// Network errors, timeouts, 5xx and 429 responses
  Transient,
  /// The server refused the payload (4xx)
  Rejected,
}

/// Failure reported by a remote collaborator (entity endpoint, upload endpoint, directory).
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct RemoteError {
  pub class: FailureClass,
  pub message: String,
  /// HTTP status, when the failure came from a response
  pub status: Option<u16>,
}

impl RemoteError {
  pub fn transient(message: impl Into<String>) -> Self {
    Self {
      class: FailureClass::Transient,
      message: message.into(),
      status: None,
    }
  }

  pub fn rejected(message: impl Into<String>) -> Self {
    Self {
      class: FailureClass::Rejected,
      message: message.into(),
      status: None,
    }
  }

  pub fn timeout(after: std::time::Duration) -> Self {
    Self::transient(format!("Request timed out after {}s", after.as_secs()))
  }

  /// Classify an HTTP status code returned by a remote endpoint.
  pub fn from_status(status: u16, body: &str) -> Self {
    let message = if body.is_empty() {
      format!("HTTP {}", status)
    } else {
      format!("HTTP {}: {}", status, body)
    };
    let mut error = if status == 429 || status >= 500 {
      Self::transient(message)
    } else {
      Self::rejected(message)
    };
    error.status = Some(status);
    error
  }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
  fn from(e: std::sync::PoisonError<T>) -> Self {
    Error::LockPoisoned(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_classification() {
    assert_eq!(RemoteError::from_status(503, "").class, FailureClass::Transient);
    assert_eq!(RemoteError::from_status(429, "slow down").class, FailureClass::Transient);
    assert_eq!(RemoteError::from_status(422, "title required").class, FailureClass::Rejected);
    assert_eq!(RemoteError::from_status(404, "").message, "HTTP 404");
  }
}
