//! Error types surfaced at the engine boundary.

use thiserror::Error;

/// Result type for engine operations.
pub type OfflineResult<T> = std::result::Result<T, OfflineError>;

/// Failure of the remote-call collaborator.
///
/// The engine treats every variant the same way: the read path falls back to
/// the cache and the drain retains the item.
#[derive(Error, Debug)]
pub enum RemoteCallError {
  /// The request never reached the server.
  #[error("transport error: {0}")]
  Transport(String),

  /// The server answered with a non-success status.
  #[error("server returned {status}: {body}")]
  Status { status: u16, body: String },

  /// The call did not complete in time.
  #[error("remote call timed out")]
  Timeout,

  /// The response body could not be decoded.
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// The remote side refused the call.
  #[error("remote call rejected: {0}")]
  Rejected(String),
}

/// Errors returned by [`crate::OfflineEngine`].
#[derive(Error, Debug)]
pub enum OfflineError {
  /// The remote call failed and nothing could be used in its place.
  #[error("remote unavailable: {0}")]
  RemoteUnavailable(#[from] RemoteCallError),

  /// The cache fallback found nothing under the key.
  #[error("no data available offline for: {key}")]
  NoOfflineData { key: String },

  /// A drain was requested while the connectivity signal reports offline.
  #[error("not connected, cannot synchronize")]
  NotConnected,

  /// A drain pass finished with items still queued.
  #[error("synchronization incomplete, {pending} item(s) still pending")]
  PartialSync { pending: usize },

  /// The key belongs to the engine's own bookkeeping.
  #[error("key '{key}' is reserved for the sync queue")]
  ReservedKey { key: String },

  /// Another drain is already running on this engine.
  #[error("a synchronization pass is already in progress")]
  DrainInProgress,

  /// A value could not be encoded or decoded at the persistence edge.
  #[error("codec error: {0}")]
  Codec(#[from] serde_json::Error),

  /// The durable store failed.
  #[error("storage error: {0}")]
  Storage(color_eyre::Report),
}

impl From<color_eyre::Report> for OfflineError {
  fn from(report: color_eyre::Report) -> Self {
    OfflineError::Storage(report)
  }
}

impl OfflineError {
  /// Whether retrying the same operation later may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      OfflineError::RemoteUnavailable(_)
        | OfflineError::NotConnected
        | OfflineError::PartialSync { .. }
        | OfflineError::DrainInProgress
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_sync_message_names_count() {
    let err = OfflineError::PartialSync { pending: 3 };
    assert_eq!(
      err.to_string(),
      "synchronization incomplete, 3 item(s) still pending"
    );
  }

  #[test]
  fn test_no_offline_data_message_names_key() {
    let err = OfflineError::NoOfflineData {
      key: "hoja_ruta_cache".to_string(),
    };
    assert!(err.to_string().contains("hoja_ruta_cache"));
  }

  #[test]
  fn test_retryable() {
    assert!(OfflineError::NotConnected.is_retryable());
    assert!(OfflineError::PartialSync { pending: 1 }.is_retryable());
    assert!(OfflineError::from(RemoteCallError::Timeout).is_retryable());
    assert!(!OfflineError::NoOfflineData {
      key: "k".to_string()
    }
    .is_retryable());
  }

  #[test]
  fn test_storage_from_report() {
    let err: OfflineError = color_eyre::eyre::eyre!("disk full").into();
    assert!(matches!(err, OfflineError::Storage(_)));
    assert_eq!(err.to_string(), "storage error: disk full");
  }
}
