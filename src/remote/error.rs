//! Failure classification for remote calls.

use std::time::Duration;
use thiserror::Error;

/// Whether retrying a failed call can reasonably succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  Transient,
  Terminal,
}

/// A failed remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
  /// No response at all (DNS, refused, reset, TLS...)
  #[error("Connection failed: {0}")]
  Connection(String),

  /// The call lost the race against its timeout
  #[error("Request timed out after {0:?}")]
  Timeout(Duration),

  /// The remote answered with a non-success status
  #[error("Request failed with status {status}: {body}")]
  Status { status: u16, body: String },

  /// The response body could not be turned into the expected type
  #[error("Failed to decode response: {0}")]
  Decode(String),

  /// The request could not be built (bad URL, unserializable body)
  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

impl NetworkError {
  pub fn class(&self) -> ErrorClass {
    match self {
      Self::Connection(_) | Self::Timeout(_) => ErrorClass::Transient,
      Self::Status { status, .. } => match status {
        408 | 429 | 500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Terminal,
      },
      Self::Decode(_) | Self::InvalidRequest(_) => ErrorClass::Terminal,
    }
  }

  /// Connection failures, timeouts, 5xx, 429 and 408 are retryable.
  pub fn is_retryable(&self) -> bool {
    self.class() == ErrorClass::Transient
  }

  /// HTTP status, if the remote answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Status { status, .. } => Some(*status),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn status(status: u16) -> NetworkError {
    NetworkError::Status {
      status,
      body: String::new(),
    }
  }

  #[test]
  fn test_retryable_statuses() {
    for code in [408, 429, 500, 502, 503, 504, 599] {
      assert!(status(code).is_retryable(), "{} should be retryable", code);
    }
  }

  #[test]
  fn test_terminal_statuses() {
    for code in [400, 401, 403, 404, 409, 422] {
      assert_eq!(status(code).class(), ErrorClass::Terminal, "{}", code);
    }
  }

  #[test]
  fn test_transport_failures() {
    assert!(NetworkError::Connection("refused".into()).is_retryable());
    assert!(NetworkError::Timeout(Duration::from_secs(30)).is_retryable());
    assert!(!NetworkError::Decode("eof".into()).is_retryable());
    assert!(!NetworkError::InvalidRequest("bad url".into()).is_retryable());
    assert_eq!(NetworkError::Timeout(Duration::from_secs(1)).status(), None);
    assert_eq!(status(503).status(), Some(503));
  }
}
