//! Background drain triggered by connectivity coming back.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::connectivity::spawn_probe;
use crate::engine::OfflineEngine;
use crate::error::OfflineError;
use crate::remote::RemoteCall;

/// Drain `engine` on every offline to online transition, and once at start
/// if it is already online with work pending.
///
/// Drain failures are logged and left for the next transition; there is no
/// retry timer here. Stops when `shutdown` flips to true or its sender is
/// dropped.
pub fn spawn_auto_drain<S, R>(
  engine: OfflineEngine<S, R>,
  mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
  S: CacheStore + 'static,
  R: RemoteCall + 'static,
{
  let mut connectivity = engine.monitor().subscribe();

  tokio::spawn(async move {
    if engine.is_online() && engine.pending_count() > 0 {
      run_drain(&engine).await;
    }

    loop {
      tokio::select! {
        changed = connectivity.changed() => {
          if changed.is_err() {
            break;
          }
          let online = *connectivity.borrow_and_update();
          if online {
            info!(pending = engine.pending_count(), "Back online, draining sync queue");
            run_drain(&engine).await;
          }
        }
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            debug!("Auto drain shutting down");
            break;
          }
        }
      }
    }
  })
}

/// Start the background tasks enabled in `config`: the reachability probe
/// (when `probe_interval_secs` is set) and the auto drain (when `auto_drain`).
pub fn spawn_background<S, R, P>(
  engine: &OfflineEngine<S, R>,
  probe_remote: Arc<P>,
  config: &SyncConfig,
  shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>>
where
  S: CacheStore + 'static,
  R: RemoteCall + 'static,
  P: RemoteCall + 'static,
{
  let mut handles = Vec::new();

  if let Some(secs) = config.probe_interval_secs {
    handles.push(spawn_probe(
      engine.monitor().clone(),
      probe_remote,
      Duration::from_secs(secs.max(1)),
      shutdown.clone(),
    ));
  }

  if config.auto_drain {
    handles.push(spawn_auto_drain(engine.clone(), shutdown));
  }

  handles
}

async fn run_drain<S: CacheStore, R: RemoteCall>(engine: &OfflineEngine<S, R>) {
  match engine.drain().await {
    Ok(report) => debug!(sent = report.sent, "Auto drain finished"),
    Err(OfflineError::PartialSync { pending }) => {
      warn!(pending, "Auto drain left items pending")
    }
    Err(OfflineError::DrainInProgress) => debug!("Drain already running"),
    Err(e) => warn!(error = %e, "Auto drain failed"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::connectivity::ConnectivityMonitor;
  use crate::engine::tests::ScriptedRemote;
  use crate::engine::SyncSettings;
  use serde_json::json;

  #[tokio::test]
  async fn test_drains_when_connectivity_returns() {
    let remote = Arc::new(ScriptedRemote::new());
    let engine = OfflineEngine::open(
      Arc::new(MemoryStore::new()),
      remote.clone(),
      ConnectivityMonitor::new(false),
      SyncSettings::default(),
    )
    .unwrap();
    engine.enqueue("save_a", &json!({})).unwrap();
    engine.enqueue("save_b", &json!({})).unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = spawn_auto_drain(engine.clone(), shutdown_rx);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(remote.methods().is_empty());

    engine.monitor().set_online(true);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(remote.methods(), vec!["save_a", "save_b"]);
    assert_eq!(engine.pending_count(), 0);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
      .await
      .unwrap()
      .unwrap();
  }

  #[tokio::test]
  async fn test_drains_at_start_when_online() {
    let remote = Arc::new(ScriptedRemote::new());
    let engine = OfflineEngine::open(
      Arc::new(MemoryStore::new()),
      remote.clone(),
      ConnectivityMonitor::new(true),
      SyncSettings::default(),
    )
    .unwrap();
    engine.enqueue("save_a", &json!({})).unwrap();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = spawn_auto_drain(engine.clone(), shutdown_rx);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(remote.methods(), vec!["save_a"]);
    handle.abort();
  }

  #[tokio::test]
  async fn test_failures_do_not_stop_the_task() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.fail("save_a");
    let engine = OfflineEngine::open(
      Arc::new(MemoryStore::new()),
      remote.clone(),
      ConnectivityMonitor::new(false),
      SyncSettings::default(),
    )
    .unwrap();
    engine.enqueue("save_a", &json!({})).unwrap();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = spawn_auto_drain(engine.clone(), shutdown_rx);

    engine.monitor().set_online(true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.pending().unwrap()[0].retries, 1);

    remote.recover("save_a");
    engine.monitor().set_online(false);
    engine.monitor().set_online(true);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(engine.pending_count(), 0);
    assert!(!handle.is_finished());
    handle.abort();
  }

  #[tokio::test]
  async fn test_spawn_background_honours_config() {
    let remote = Arc::new(ScriptedRemote::new());
    let engine = OfflineEngine::open(
      Arc::new(MemoryStore::new()),
      remote.clone(),
      ConnectivityMonitor::new(false),
      SyncSettings::default(),
    )
    .unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let disabled = SyncConfig {
      auto_drain: false,
      probe_interval_secs: None,
      ..SyncConfig::default()
    };
    assert!(spawn_background(&engine, remote.clone(), &disabled, shutdown_rx.clone()).is_empty());

    let enabled = SyncConfig {
      probe_interval_secs: Some(60),
      ..SyncConfig::default()
    };
    let handles = spawn_background(&engine, remote, &enabled, shutdown_rx);
    assert_eq!(handles.len(), 2);

    shutdown_tx.send(true).unwrap();
    for handle in handles {
      tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    }
  }
}
