//! The remote-call collaborator: "method name + payload, returns a value or fails".

mod http;

pub use http::HttpRemote;

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::error::RemoteCallError;

/// Invokes a named operation on the backend.
///
/// Timeouts are the implementation's business; the engine treats a timeout
/// like any other failure.
pub trait RemoteCall: Send + Sync {
  /// Call `method` with `payload` and return the decoded response.
  fn invoke<'a>(
    &'a self,
    method: &'a str,
    payload: Value,
  ) -> BoxFuture<'a, Result<Value, RemoteCallError>>;

  /// Cheap reachability check used by the connectivity probe.
  fn ping(&self) -> BoxFuture<'_, bool> {
    Box::pin(async move { self.invoke("ping", Value::Null).await.is_ok() })
  }
}

impl<R: RemoteCall + ?Sized> RemoteCall for Arc<R> {
  fn invoke<'a>(
    &'a self,
    method: &'a str,
    payload: Value,
  ) -> BoxFuture<'a, Result<Value, RemoteCallError>> {
    (**self).invoke(method, payload)
  }

  fn ping(&self) -> BoxFuture<'_, bool> {
    (**self).ping()
  }
}
