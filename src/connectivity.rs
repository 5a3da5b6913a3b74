//! Connectivity signal shared by the read path and the drain.
//!
//! The signal is best-effort. "Online" means it is worth trying the remote,
//! not that the call will succeed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::remote::RemoteCall;

/// Owns the current online/offline state and notifies subscribers on transitions.
///
/// Clones share the same state. Reads go through a `watch` channel so any
/// number of tasks can observe the flag without tearing.
#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
  tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
  /// Create a monitor seeded with the host's current reachability.
  pub fn new(initially_online: bool) -> Self {
    let (tx, _rx) = watch::channel(initially_online);
    Self { tx: Arc::new(tx) }
  }

  /// Current state of the signal.
  pub fn current(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record an observation from the host environment.
  ///
  /// Subscribers are only woken when the value actually changes, so a noisy
  /// source reporting "online" repeatedly produces a single transition.
  /// Returns whether this call was a transition.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      info!(online, "Connectivity changed");
    }
    changed
  }

  /// Receiver that resolves `changed()` on every transition.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Run `handler` with the new state on every transition.
  ///
  /// The task ends when every clone of this monitor has been dropped, or
  /// when the returned handle is aborted.
  pub fn on_change<F>(&self, mut handler: F) -> JoinHandle<()>
  where
    F: FnMut(bool) + Send + 'static,
  {
    let mut rx = self.subscribe();
    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        handler(online);
      }
    })
  }
}

/// Periodically ping the remote and feed the result into `monitor`.
///
/// Stops when `shutdown` flips to true or its sender is dropped.
pub fn spawn_probe<R>(
  monitor: ConnectivityMonitor,
  remote: Arc<R>,
  interval: Duration,
  mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
  R: RemoteCall + 'static,
{
  tokio::spawn(async move {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = timer.tick() => {
          let reachable = remote.ping().await;
          debug!(reachable, "Connectivity probe");
          monitor.set_online(reachable);
        }
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            debug!("Connectivity probe shutting down");
            break;
          }
        }
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::RemoteCallError;
  use futures::future::BoxFuture;
  use serde_json::Value;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  #[test]
  fn test_initial_state() {
    assert!(ConnectivityMonitor::new(true).current());
    assert!(!ConnectivityMonitor::new(false).current());
  }

  #[test]
  fn test_set_online_reports_transitions_only() {
    let monitor = ConnectivityMonitor::new(true);
    assert!(!monitor.set_online(true));
    assert!(monitor.set_online(false));
    assert!(!monitor.set_online(false));
    assert!(!monitor.current());
  }

  #[test]
  fn test_clones_share_state() {
    let monitor = ConnectivityMonitor::new(true);
    let other = monitor.clone();
    other.set_online(false);
    assert!(!monitor.current());
  }

  #[tokio::test]
  async fn test_on_change_sees_each_transition() {
    let monitor = ConnectivityMonitor::new(true);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let handle = monitor.on_change(move |online| seen_clone.lock().unwrap().push(online));

    monitor.set_online(false);
    tokio::time::sleep(Duration::from_millis(10)).await;
    monitor.set_online(false);
    monitor.set_online(true);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    handle.abort();
  }

  struct FlagRemote {
    reachable: AtomicBool,
  }

  impl RemoteCall for FlagRemote {
    fn invoke<'a>(
      &'a self,
      _method: &'a str,
      _payload: Value,
    ) -> BoxFuture<'a, Result<Value, RemoteCallError>> {
      Box::pin(async { Err::<Value, _>(RemoteCallError::Timeout) })
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
      let reachable = self.reachable.load(Ordering::SeqCst);
      Box::pin(async move { reachable })
    }
  }

  #[tokio::test]
  async fn test_probe_feeds_monitor_and_stops_on_shutdown() {
    let monitor = ConnectivityMonitor::new(true);
    let remote = Arc::new(FlagRemote {
      reachable: AtomicBool::new(false),
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = spawn_probe(
      monitor.clone(),
      remote.clone(),
      Duration::from_millis(5),
      shutdown_rx,
    );

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!monitor.current());

    remote.reachable.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(monitor.current());

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
      .await
      .unwrap()
      .unwrap();
  }
}
