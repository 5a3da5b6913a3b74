//! Encoding at the persistence edge.
//!
//! Everything written to a [`CacheStore`](super::CacheStore) is JSON. Keeping
//! the codec in one place means a value read back after a restart is decoded
//! into the caller's type instead of being compared structurally.

use serde::{de::DeserializeOwned, Serialize};

pub fn encode<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
  serde_json::to_vec(value)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<T> {
  serde_json::from_slice(bytes)
}
