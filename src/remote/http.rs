//! JSON-over-HTTP implementation of [`RemoteCall`].

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::RemoteCall;
use crate::config::RemoteConfig;
use crate::error::RemoteCallError;

/// Posts each call to `{base_url}/{method}` with the payload as the JSON body.
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpRemote {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    // Url::join replaces the last segment unless the base ends with a slash
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url =
      Url::parse(&normalized).map_err(|e| eyre!("Invalid base URL '{}': {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  pub fn from_config(config: &RemoteConfig) -> Result<Self> {
    let base_url = config
      .base_url
      .as_deref()
      .ok_or_else(|| eyre!("remote.base_url is not configured"))?;

    Self::new(base_url, config.timeout())
  }

  fn method_url(&self, method: &str) -> Result<Url, RemoteCallError> {
    self
      .base_url
      .join(method.trim_start_matches('/'))
      .map_err(|e| RemoteCallError::Rejected(format!("invalid method name '{}': {}", method, e)))
  }

  async fn call(&self, method: &str, payload: Value) -> Result<Value, RemoteCallError> {
    let url = self.method_url(method)?;
    debug!(url = %url, method, "Invoking remote method");

    let response = self
      .client
      .post(url)
      .json(&payload)
      .send()
      .await
      .map_err(map_reqwest_error)?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(RemoteCallError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let bytes = response.bytes().await.map_err(map_reqwest_error)?;
    if bytes.is_empty() {
      return Ok(Value::Null);
    }

    serde_json::from_slice(&bytes).map_err(|e| RemoteCallError::Decode(e.to_string()))
  }
}

impl RemoteCall for HttpRemote {
  fn invoke<'a>(
    &'a self,
    method: &'a str,
    payload: Value,
  ) -> BoxFuture<'a, Result<Value, RemoteCallError>> {
    Box::pin(self.call(method, payload))
  }

  fn ping(&self) -> BoxFuture<'_, bool> {
    Box::pin(async move {
      // Any HTTP answer means the host is reachable
      self.client.head(self.base_url.clone()).send().await.is_ok()
    })
  }
}

fn map_reqwest_error(e: reqwest::Error) -> RemoteCallError {
  if e.is_timeout() {
    RemoteCallError::Timeout
  } else if e.is_decode() {
    RemoteCallError::Decode(e.to_string())
  } else {
    RemoteCallError::Transport(e.to_string())
  }
}
