use crate::error::{FailureClass, RemoteError};

/// Retry accounting shared by binary uploads and entity changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Attempts allowed before an item is surfaced as permanently failed
  pub max_attempts: u32,
  /// Exhaust the budget on the first server rejection
  pub fail_fast_on_rejection: bool,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      fail_fast_on_rejection: false,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, fail_fast_on_rejection: bool) -> Self {
    Self {
      max_attempts,
      fail_fast_on_rejection,
    }
  }

  pub fn is_exhausted(&self, retry_count: u32) -> bool {
    retry_count >= self.max_attempts
  }

  /// Retry count to record after a failed attempt.
  pub fn after_failure(&self, retry_count: u32, error: &RemoteError) -> u32 {
    if self.fail_fast_on_rejection && error.class == FailureClass::Rejected {
      self.max_attempts.max(retry_count + 1)
    } else {
      retry_count + 1
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rejections_count_like_any_failure_by_default() {
    let policy = RetryPolicy::default();
    let rejected = RemoteError::rejected("HTTP 422");
    assert_eq!(policy.after_failure(0, &rejected), 1);
    assert!(!policy.is_exhausted(2));
    assert!(policy.is_exhausted(3));
  }

  #[test]
  fn test_fail_fast_exhausts_on_rejection_only() {
    let policy = RetryPolicy::new(3, true);
    assert_eq!(policy.after_failure(0, &RemoteError::rejected("HTTP 400")), 3);
    assert_eq!(policy.after_failure(0, &RemoteError::transient("HTTP 503")), 1);
  }
}
