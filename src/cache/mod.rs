//! Durable key-value storage for cached reads and the sync queue.
//!
//! Values are opaque bytes to the store; typed access goes through
//! [`codec`], which is the only place payloads are encoded or decoded.

pub mod codec;
mod storage;
mod traits;

pub use storage::{MemoryStore, SqliteStore};
pub use traits::CacheStore;
