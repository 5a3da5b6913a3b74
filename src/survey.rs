//! Fieldwork client: route sheet download and survey response upload on top
//! of [`OfflineEngine`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::engine::{DrainReport, OfflineEngine};
use crate::error::OfflineResult;
use crate::queue::SyncItem;
use crate::remote::RemoteCall;

/// Remote method returning the interviewer's route sheet.
pub const FETCH_ROUTE_SHEET: &str = "traer_hoja_ruta";
/// Remote method storing one survey response.
pub const SAVE_RESPONSE: &str = "encuesta_guardar";
/// Cache key for the last downloaded route sheet.
pub const ROUTE_SHEET_CACHE_KEY: &str = "hoja_ruta_cache";

/// Places to visit during fieldwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSheet {
  pub id: String,
  #[serde(default, rename = "puntos")]
  pub points: Vec<Value>,
}

/// Survey client with transparent offline support.
///
/// Reads come from the network when possible and from the last downloaded
/// copy otherwise. Responses are always queued and go out on `synchronize`.
pub struct SurveyClient<S, R> {
  engine: OfflineEngine<S, R>,
}

impl<S, R> Clone for SurveyClient<S, R> {
  fn clone(&self) -> Self {
    Self {
      engine: self.engine.clone(),
    }
  }
}

impl<S: CacheStore, R: RemoteCall> SurveyClient<S, R> {
  pub fn new(engine: OfflineEngine<S, R>) -> Self {
    Self { engine }
  }

  /// Underlying engine, for cache helpers and connectivity.
  pub fn engine(&self) -> &OfflineEngine<S, R> {
    &self.engine
  }

  /// Current route sheet, fresh if reachable, cached otherwise.
  pub async fn route_sheet(&self) -> OfflineResult<RouteSheet> {
    self
      .engine
      .smart_fetch(FETCH_ROUTE_SHEET, &json!({}), ROUTE_SHEET_CACHE_KEY)
      .await
  }

  /// Queue a survey response, stamped with the time it was recorded.
  pub fn save_response<T: Serialize + ?Sized>(&self, response: &T) -> OfflineResult<Uuid> {
    let payload = stamp(serde_json::to_value(response)?);
    self.engine.enqueue(SAVE_RESPONSE, &payload)
  }

  /// Upload queued responses.
  pub async fn synchronize(&self) -> OfflineResult<DrainReport> {
    self.engine.drain().await
  }

  /// Responses recorded but not yet accepted by the server.
  pub fn pending_responses(&self) -> OfflineResult<Vec<SyncItem>> {
    Ok(
      self
        .engine
        .pending()?
        .into_iter()
        .filter(|item| item.method == SAVE_RESPONSE)
        .collect(),
    )
  }
}

fn stamp(response: Value) -> Value {
  let timestamp = Utc::now().timestamp_millis();
  match response {
    Value::Object(mut fields) => {
      fields.insert("timestamp".to_string(), json!(timestamp));
      Value::Object(fields)
    }
    other => {
      let mut fields = Map::new();
      fields.insert("respuesta".to_string(), other);
      fields.insert("timestamp".to_string(), json!(timestamp));
      Value::Object(fields)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::connectivity::ConnectivityMonitor;
  use crate::engine::tests::ScriptedRemote;
  use crate::engine::SyncSettings;
  use crate::OfflineError;
  use std::sync::Arc;

  type TestClient = SurveyClient<Arc<MemoryStore>, Arc<ScriptedRemote>>;

  fn client(remote: Arc<ScriptedRemote>, online: bool) -> TestClient {
    let engine = OfflineEngine::open(
      Arc::new(MemoryStore::new()),
      remote,
      ConnectivityMonitor::new(online),
      SyncSettings::default(),
    )
    .unwrap();
    SurveyClient::new(engine)
  }

  #[tokio::test]
  async fn test_route_sheet_survives_going_offline() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond(
      FETCH_ROUTE_SHEET,
      json!({"id": "hr-7", "puntos": [{"direccion": "Calle 1"}]}),
    );
    let client = client(remote, true);

    let online = client.route_sheet().await.unwrap();
    assert_eq!(online.id, "hr-7");
    assert_eq!(online.points.len(), 1);

    client.engine().monitor().set_online(false);
    assert_eq!(client.route_sheet().await.unwrap(), online);
  }

  #[tokio::test]
  async fn test_route_sheet_never_downloaded_offline() {
    let client = client(Arc::new(ScriptedRemote::new()), false);
    assert!(matches!(
      client.route_sheet().await,
      Err(OfflineError::NoOfflineData { .. })
    ));
  }

  #[tokio::test]
  async fn test_responses_queue_offline_and_upload_later() {
    let remote = Arc::new(ScriptedRemote::new());
    let client = client(remote.clone(), false);

    client
      .save_response(&json!({"vivienda": 12, "respuesta": "completa"}))
      .unwrap();
    client.save_response(&json!("rechazo")).unwrap();

    let pending = client.pending_responses().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].payload["vivienda"], json!(12));
    assert!(pending[0].payload["timestamp"].is_i64());
    assert_eq!(pending[1].payload["respuesta"], json!("rechazo"));

    assert!(matches!(
      client.synchronize().await,
      Err(OfflineError::NotConnected)
    ));

    client.engine().monitor().set_online(true);
    let report = client.synchronize().await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(remote.methods(), vec![SAVE_RESPONSE, SAVE_RESPONSE]);
    assert!(client.pending_responses().unwrap().is_empty());
  }
}
