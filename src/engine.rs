//! Offline engine: network-first reads with cache fallback, and a durable
//! FIFO queue of outbound actions replayed by `drain`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::eyre::eyre;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{codec, CacheStore, SqliteStore};
use crate::config::{Config, SyncConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{OfflineError, OfflineResult};
use crate::queue::{self, SyncItem};
use crate::remote::{HttpRemote, RemoteCall};

/// Queue bookkeeping knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
  /// Store key for the pending queue
  pub queue_key: String,
  /// Store key for items that exhausted their retries
  pub dead_letter_key: String,
  /// Failed attempts after which an item leaves the queue; `None` never gives up
  pub max_retries: Option<u32>,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self::from(&SyncConfig::default())
  }
}

impl From<&SyncConfig> for SyncSettings {
  fn from(config: &SyncConfig) -> Self {
    Self {
      queue_key: config.queue_key.clone(),
      dead_letter_key: config.dead_letter_key.clone(),
      max_retries: config.max_retries,
    }
  }
}

/// What a drain pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Items the remote accepted, now gone from the queue
  pub sent: usize,
  /// Items that failed and stay queued for the next pass
  pub retained: usize,
  /// Items that failed for the last time and moved to the dead-letter list
  pub dead_lettered: usize,
}

struct QueueState {
  items: Vec<SyncItem>,
  dead_letters: Vec<SyncItem>,
}

struct Inner<S, R> {
  store: S,
  remote: R,
  monitor: ConnectivityMonitor,
  settings: SyncSettings,
  /// Never held across an await
  state: Mutex<QueueState>,
  /// Held for the whole of a drain pass
  draining: tokio::sync::Mutex<()>,
  pending_tx: watch::Sender<usize>,
}

/// Offline cache and outbound sync queue over a store and a remote.
///
/// Clones share the same queue, store and remote.
pub struct OfflineEngine<S, R> {
  inner: Arc<Inner<S, R>>,
}

impl<S, R> Clone for OfflineEngine<S, R> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<S: CacheStore, R: RemoteCall> OfflineEngine<S, R> {
  /// Build an engine and restore the queue persisted in `store`.
  ///
  /// A persisted queue that cannot be decoded is an error; it is never
  /// silently replaced by an empty one.
  pub fn open(
    store: S,
    remote: R,
    monitor: ConnectivityMonitor,
    settings: SyncSettings,
  ) -> OfflineResult<Self> {
    let items = queue::load(&store, &settings.queue_key)?;
    let mut dead_letters = queue::load(&store, &settings.dead_letter_key)?;

    // A requeue interrupted between its two writes leaves an item in both lists
    let queued: HashSet<Uuid> = items.iter().map(|item| item.id).collect();
    let before = dead_letters.len();
    dead_letters.retain(|item| !queued.contains(&item.id));
    if dead_letters.len() != before {
      warn!(
        dropped = before - dead_letters.len(),
        "Dead letters already back in the queue"
      );
    }

    if !items.is_empty() || !dead_letters.is_empty() {
      info!(
        pending = items.len(),
        dead_letters = dead_letters.len(),
        "Restored sync queue"
      );
    }

    let (pending_tx, _rx) = watch::channel(items.len());

    Ok(Self {
      inner: Arc::new(Inner {
        store,
        remote,
        monitor,
        settings,
        state: Mutex::new(QueueState {
          items,
          dead_letters,
        }),
        draining: tokio::sync::Mutex::new(()),
        pending_tx,
      }),
    })
  }

  fn state(&self) -> OfflineResult<MutexGuard<'_, QueueState>> {
    self
      .inner
      .state
      .lock()
      .map_err(|e| OfflineError::Storage(eyre!("Lock poisoned: {}", e)))
  }

  fn check_key(&self, key: &str) -> OfflineResult<()> {
    let settings = &self.inner.settings;
    if key == settings.queue_key || key == settings.dead_letter_key {
      return Err(OfflineError::ReservedKey {
        key: key.to_string(),
      });
    }
    Ok(())
  }

  /// Takes the guarded state so observers see lengths in mutation order.
  fn publish_pending(&self, state: &QueueState) -> usize {
    let count = state.items.len();
    self.inner.pending_tx.send_replace(count);
    count
  }

  /// Current value of the connectivity signal.
  pub fn is_online(&self) -> bool {
    self.inner.monitor.current()
  }

  /// Connectivity signal this engine reads; feed host observations into it.
  pub fn monitor(&self) -> &ConnectivityMonitor {
    &self.inner.monitor
  }

  /// Network-first read with cache fallback.
  ///
  /// 1. When online, call the remote. On success the raw response is written
  ///    to `cache_key` (best-effort) and returned.
  /// 2. When offline, or the call failed, return whatever is cached under
  ///    `cache_key`, possibly stale.
  /// 3. Nothing cached: [`OfflineError::NoOfflineData`].
  pub async fn smart_fetch<P, T>(&self, method: &str, params: &P, cache_key: &str) -> OfflineResult<T>
  where
    P: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    self.check_key(cache_key)?;

    if self.is_online() {
      let payload = serde_json::to_value(params)?;
      debug!(method, "Fetching online");

      match self.inner.remote.invoke(method, payload).await {
        Ok(value) => match serde_json::from_value::<T>(value.clone()) {
          Ok(data) => {
            self.write_through(cache_key, &value);
            return Ok(data);
          }
          Err(e) => {
            warn!(method, error = %e, "Remote response did not decode, trying cache");
          }
        },
        Err(e) => {
          warn!(method, error = %e, "Remote call failed, trying cache");
        }
      }
    }

    debug!(key = cache_key, "Reading cache");
    match self.read_cached::<T>(cache_key) {
      Some(data) => Ok(data),
      None => Err(OfflineError::NoOfflineData {
        key: cache_key.to_string(),
      }),
    }
  }

  fn write_through(&self, key: &str, value: &serde_json::Value) {
    let result = codec::encode(value)
      .map_err(OfflineError::from)
      .and_then(|bytes| self.inner.store.set(key, &bytes).map_err(OfflineError::from));

    if let Err(e) = result {
      warn!(key, error = %e, "Failed to refresh cache");
    }
  }

  /// Cache read for the fallback path: faults and undecodable values are misses.
  fn read_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let bytes = match self.inner.store.get(key) {
      Ok(Some(bytes)) => bytes,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "Cache read failed");
        return None;
      }
    };

    match codec::decode(&bytes) {
      Ok(data) => Some(data),
      Err(e) => {
        warn!(key, error = %e, "Cached value did not decode");
        None
      }
    }
  }

  /// Record an outbound action.
  ///
  /// The payload is captured now; later changes to the caller's data do not
  /// reach the queued item. When this returns `Ok` the item is persisted.
  pub fn enqueue<P>(&self, method: &str, payload: &P) -> OfflineResult<Uuid>
  where
    P: Serialize + ?Sized,
  {
    let item = SyncItem::new(method, serde_json::to_value(payload)?);
    let id = item.id;

    let count = {
      let mut state = self.state()?;
      state.items.push(item);

      if let Err(e) = queue::persist(&self.inner.store, &self.inner.settings.queue_key, &state.items)
      {
        state.items.pop();
        error!(method, error = %e, "Failed to persist sync queue");
        return Err(e);
      }
      self.publish_pending(&state)
    };

    info!(method, %id, pending = count, "Queued for sync");
    Ok(id)
  }

  /// Replay the queue against the remote, oldest first.
  ///
  /// Works on a snapshot: an item enqueued while the pass is running is not
  /// attempted now but is kept, after the surviving items, for the next pass.
  /// A failed item gets `retries + 1` and stays queued unless that reaches
  /// `max_retries`, in which case it moves to the dead-letter list.
  ///
  /// Returns [`OfflineError::PartialSync`] when any attempted item is still
  /// queued afterwards. An `Ok` report can still carry `dead_lettered > 0`:
  /// those actions were abandoned and need [`Self::requeue_dead_letters`].
  pub async fn drain(&self) -> OfflineResult<DrainReport> {
    if !self.is_online() {
      return Err(OfflineError::NotConnected);
    }

    let _guard = self
      .inner
      .draining
      .try_lock()
      .map_err(|_| OfflineError::DrainInProgress)?;

    let snapshot = self.state()?.items.clone();
    if snapshot.is_empty() {
      return Ok(DrainReport::default());
    }

    info!(
      count = snapshot.len(),
      methods = ?queue::method_counts(&snapshot),
      "Starting sync"
    );

    let mut report = DrainReport::default();
    let mut failed = Vec::new();

    for mut item in snapshot.iter().cloned() {
      match self
        .inner
        .remote
        .invoke(&item.method, item.payload.clone())
        .await
      {
        Ok(_) => {
          report.sent += 1;
          debug!(id = %item.id, method = %item.method, "Item synced");
        }
        Err(e) => {
          item.retries += 1;
          warn!(
            id = %item.id,
            method = %item.method,
            retries = item.retries,
            error = %e,
            "Item failed to sync"
          );
          failed.push(item);
        }
      }
    }

    let max_retries = self.inner.settings.max_retries;
    let (retained, exhausted): (Vec<SyncItem>, Vec<SyncItem>) = failed
      .into_iter()
      .partition(|item| max_retries.map_or(true, |max| item.retries < max));

    for item in &exhausted {
      warn!(
        id = %item.id,
        method = %item.method,
        retries = item.retries,
        "Giving up on item, moved to dead letters"
      );
    }

    report.retained = retained.len();
    report.dead_lettered = exhausted.len();

    let (count, persisted) = self.commit_pass(&snapshot, retained, exhausted)?;
    persisted?;

    if report.dead_lettered > 0 {
      error!(
        dead_lettered = report.dead_lettered,
        "Items abandoned after exhausting retries"
      );
    }

    if report.retained == 0 {
      info!(
        sent = report.sent,
        dead_lettered = report.dead_lettered,
        pending = count,
        "Sync completed"
      );
      Ok(report)
    } else {
      warn!(
        sent = report.sent,
        retained = report.retained,
        dead_lettered = report.dead_lettered,
        "Sync incomplete"
      );
      Err(OfflineError::PartialSync {
        pending: report.retained,
      })
    }
  }

  /// Replace the queue with the survivors of a pass plus anything enqueued
  /// during it, persist, and publish. Returns the new queue length and
  /// whether the write made it to the store.
  fn commit_pass(
    &self,
    snapshot: &[SyncItem],
    retained: Vec<SyncItem>,
    exhausted: Vec<SyncItem>,
  ) -> OfflineResult<(usize, OfflineResult<()>)> {
    let attempted: HashSet<Uuid> = snapshot.iter().map(|item| item.id).collect();
    let settings = &self.inner.settings;

    let mut state = self.state()?;

    let mut next = retained;
    next.extend(
      state
        .items
        .iter()
        .filter(|item| !attempted.contains(&item.id))
        .cloned(),
    );
    state.items = next;

    let mut result = queue::persist(&self.inner.store, &settings.queue_key, &state.items);

    if !exhausted.is_empty() {
      state.dead_letters.extend(exhausted);
      let dead = queue::persist(
        &self.inner.store,
        &settings.dead_letter_key,
        &state.dead_letters,
      );
      result = result.and(dead);
    }

    if let Err(e) = &result {
      // Memory already reflects the pass so this process won't resend
      error!(error = %e, "Failed to persist sync queue after drain");
    }
    Ok((self.publish_pending(&state), result))
  }

  /// Snapshot of the pending queue in replay order.
  pub fn pending(&self) -> OfflineResult<Vec<SyncItem>> {
    Ok(self.state()?.items.clone())
  }

  /// Number of items waiting to be synced.
  pub fn pending_count(&self) -> usize {
    *self.inner.pending_tx.borrow()
  }

  /// Receiver that changes whenever the pending count does.
  pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
    self.inner.pending_tx.subscribe()
  }

  /// Items that exhausted their retries.
  pub fn dead_letters(&self) -> OfflineResult<Vec<SyncItem>> {
    Ok(self.state()?.dead_letters.clone())
  }

  /// Move every dead-lettered item back to the tail of the queue with its
  /// retry count reset. Returns how many were moved.
  ///
  /// Both lists are persisted; if either write fails the store and memory
  /// are left as they were.
  pub fn requeue_dead_letters(&self) -> OfflineResult<usize> {
    let settings = &self.inner.settings;
    let store = &self.inner.store;

    let (moved, count) = {
      let mut state = self.state()?;
      if state.dead_letters.is_empty() {
        return Ok(0);
      }

      let mut revived = state.dead_letters.clone();
      for item in &mut revived {
        item.retries = 0;
      }
      let moved = revived.len();

      let mut next = state.items.clone();
      next.extend(revived);

      queue::persist(store, &settings.queue_key, &next)?;

      if let Err(e) = queue::persist(store, &settings.dead_letter_key, &[]) {
        if let Err(undo) = queue::persist(store, &settings.queue_key, &state.items) {
          error!(error = %undo, "Failed to roll back sync queue after requeue");
        }
        error!(error = %e, "Failed to clear dead letters");
        self.publish_pending(&state);
        return Err(e);
      }

      state.items = next;
      state.dead_letters.clear();
      (moved, self.publish_pending(&state))
    };

    info!(moved, pending = count, "Requeued dead letters");
    Ok(moved)
  }

  /// Read a cached value.
  pub fn get_from_cache<T: DeserializeOwned>(&self, key: &str) -> OfflineResult<Option<T>> {
    self.check_key(key)?;
    match self.inner.store.get(key)? {
      Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
      None => Ok(None),
    }
  }

  /// Write a value to the cache, replacing what was there.
  pub fn save_to_cache<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> OfflineResult<()> {
    self.check_key(key)?;
    let bytes = codec::encode(value)?;
    self.inner.store.set(key, &bytes)?;
    Ok(())
  }

  /// Drop a cached value. Clearing an absent key is fine.
  pub fn clear_cache(&self, key: &str) -> OfflineResult<()> {
    self.check_key(key)?;
    self.inner.store.remove(key)?;
    Ok(())
  }
}

impl OfflineEngine<SqliteStore, HttpRemote> {
  /// Engine backed by the configured SQLite file and HTTP endpoint.
  pub fn from_config(config: &Config, monitor: ConnectivityMonitor) -> OfflineResult<Self> {
    let store = SqliteStore::open_at(&config.storage_path()?)?;
    let remote = HttpRemote::from_config(&config.remote)?;

    Self::open(store, remote, monitor, SyncSettings::from(&config.sync))
  }
}
