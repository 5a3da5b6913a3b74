//! Core trait for the key-value store.

use color_eyre::Result;
use std::sync::Arc;

/// Durable key-value storage addressed by caller-supplied string keys.
///
/// `get` returns the most recent value written for a key, or `None` if the
/// key was never written or has been removed. `set` overwrites
/// unconditionally and is durable once it returns. `remove` is idempotent.
pub trait CacheStore: Send + Sync {
  /// Read the value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

  /// Store `value` under `key`, replacing any previous value.
  fn set(&self, key: &str, value: &[u8]) -> Result<()>;

  /// Remove `key`. Removing an absent key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// All keys currently present, sorted.
  fn keys(&self) -> Result<Vec<String>>;
}

impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    (**self).get(key)
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    (**self).set(key, value)
  }

  fn remove(&self, key: &str) -> Result<()> {
    (**self).remove(key)
  }

  fn keys(&self) -> Result<Vec<String>> {
    (**self).keys()
  }
}
