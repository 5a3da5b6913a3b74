//! Pending outbound actions and their persisted form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::{codec, CacheStore};
use crate::error::OfflineResult;

/// One recorded action waiting to be replayed against the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
  /// Assigned at enqueue time, never reused
  pub id: Uuid,
  /// Remote operation to invoke on replay
  pub method: String,
  /// Snapshot of the data taken when the item was recorded
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replay attempts so far
  pub retries: u32,
}

impl SyncItem {
  pub fn new(method: impl Into<String>, payload: Value) -> Self {
    Self {
      id: Uuid::new_v4(),
      method: method.into(),
      payload,
      enqueued_at: Utc::now(),
      retries: 0,
    }
  }
}

/// Read a persisted list of items. A missing key is an empty list.
pub(crate) fn load<S: CacheStore + ?Sized>(store: &S, key: &str) -> OfflineResult<Vec<SyncItem>> {
  match store.get(key)? {
    Some(bytes) => Ok(codec::decode(&bytes)?),
    None => Ok(Vec::new()),
  }
}

/// Replace the persisted list under `key` with `items`.
pub(crate) fn persist<S: CacheStore + ?Sized>(
  store: &S,
  key: &str,
  items: &[SyncItem],
) -> OfflineResult<()> {
  let bytes = codec::encode(items)?;
  store.set(key, &bytes)?;
  Ok(())
}

/// Count of items per method, in first-seen order.
pub fn method_counts(items: &[SyncItem]) -> Vec<(String, usize)> {
  let mut counts: Vec<(String, usize)> = Vec::new();
  for item in items {
    match counts.iter_mut().find(|(method, _)| *method == item.method) {
      Some((_, count)) => *count += 1,
      None => counts.push((item.method.clone(), 1)),
    }
  }
  counts
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::OfflineError;
  use serde_json::json;

  #[test]
  fn test_new_item_starts_clean() {
    let a = SyncItem::new("encuesta_guardar", json!({"id": 1}));
    let b = SyncItem::new("encuesta_guardar", json!({"id": 1}));
    assert_eq!(a.retries, 0);
    assert_ne!(a.id, b.id);
  }

  #[test]
  fn test_payload_is_a_snapshot() {
    let mut source = json!({"respuesta": "si"});
    let item = SyncItem::new("encuesta_guardar", source.clone());
    source["respuesta"] = json!("no");
    assert_eq!(item.payload, json!({"respuesta": "si"}));
  }

  #[test]
  fn test_load_missing_key_is_empty() {
    let store = MemoryStore::new();
    assert!(load(&store, "sync_queue").unwrap().is_empty());
  }

  #[test]
  fn test_persist_then_load_preserves_order() {
    let store = MemoryStore::new();
    let items = vec![
      SyncItem::new("save_a", json!(1)),
      SyncItem::new("save_b", json!(2)),
      SyncItem::new("save_c", json!(3)),
    ];
    persist(&store, "sync_queue", &items).unwrap();

    let loaded = load(&store, "sync_queue").unwrap();
    assert_eq!(loaded, items);
  }

  #[test]
  fn test_corrupt_queue_is_codec_error() {
    let store = MemoryStore::new();
    store.set("sync_queue", b"not json").unwrap();
    assert!(matches!(
      load(&store, "sync_queue"),
      Err(OfflineError::Codec(_))
    ));
  }

  #[test]
  fn test_method_counts() {
    let items = vec![
      SyncItem::new("save_a", json!(1)),
      SyncItem::new("save_b", json!(2)),
      SyncItem::new("save_a", json!(3)),
    ];
    assert_eq!(
      method_counts(&items),
      vec![("save_a".to_string(), 2), ("save_b".to_string(), 1)]
    );
  }
}
