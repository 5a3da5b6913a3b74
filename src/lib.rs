//! Offline data cache and durable outbound sync.
//!
//! [`OfflineEngine`] makes a client usable without a network:
//! - `smart_fetch` reads network-first and falls back to the last cached copy
//! - `enqueue` records an outbound action durably before returning
//! - `drain` replays recorded actions in order once connectivity returns
//!
//! Storage ([`CacheStore`]), the remote ([`RemoteCall`]) and the connectivity
//! signal ([`ConnectivityMonitor`]) are injected, so the engine runs the same
//! against SQLite and HTTP in production and in-memory fakes in tests.

pub mod auto_sync;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod logging;
pub mod queue;
pub mod remote;
pub mod survey;

pub use auto_sync::{spawn_auto_drain, spawn_background};
pub use cache::{CacheStore, MemoryStore, SqliteStore};
pub use config::Config;
pub use connectivity::{spawn_probe, ConnectivityMonitor};
pub use engine::{DrainReport, OfflineEngine, SyncSettings};
pub use error::{OfflineError, OfflineResult, RemoteCallError};
pub use queue::SyncItem;
pub use remote::{HttpRemote, RemoteCall};
pub use survey::{RouteSheet, SurveyClient};
