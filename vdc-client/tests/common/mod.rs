//! Shared test utilities for vdc-client integration tests.
#![allow(dead_code)]

use std::time::Duration;

use serde_json::{json, Value};
use vdc_client::{Client, ClientConfig, ObjectId};
use wiremock::{MockServer, ResponseTemplate};

/// Mock API server plus a matching client configuration with short delays.
pub struct TestApi {
    pub server: MockServer,
}

impl TestApi {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.server.uri(), "user-1", "token-1")
            .with_delay_interval(Duration::from_millis(50))
            .with_max_delay_interval(Duration::from_millis(100))
            .with_max_retries(3)
            .with_request_timeout(Duration::from_secs(5))
            .with_request_completion_timeout(Duration::from_secs(5))
            .with_power_state_timeout(Duration::from_secs(2))
    }

    pub fn client(&self) -> Client {
        Client::new(self.config()).unwrap()
    }

    pub fn async_client(&self) -> Client {
        Client::new(self.config().with_synchronous(false)).unwrap()
    }

    /// Number of received requests with the given method and path.
    pub async fn count(&self, method: &str, path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == method && r.url.path() == path)
            .count()
    }

    /// Number of received requests that change state.
    pub async fn mutations(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() != "GET")
            .count()
    }
}

pub fn id(n: u8) -> ObjectId {
    ObjectId::parse(&format!("00000000-0000-4000-8000-0000000000{:02x}", n)).unwrap()
}

/// Response of an accepted mutation.
pub fn accepted(request_id: &str, object_id: Option<ObjectId>) -> ResponseTemplate {
    let mut body = json!({"request_uuid": request_id});
    if let Some(object_id) = object_id {
        body["object_uuid"] = json!(object_id);
    }
    ResponseTemplate::new(202).set_body_json(body)
}

/// Body of `GET /requests/{id}`.
pub fn request_status(request_id: &str, status: &str, message: &str) -> ResponseTemplate {
    let mut body = serde_json::Map::new();
    body.insert(
        request_id.to_string(),
        json!({
            "status": status,
            "message": message,
            "create_time": "2024-01-01T00:00:00Z"
        }),
    );
    ResponseTemplate::new(200).set_body_json(Value::Object(body))
}

pub fn server_body(server: ObjectId, power: bool, relations: Value) -> Value {
    json!({
        "server": {
            "object_uuid": server,
            "name": "test",
            "power": power,
            "legacy": false,
            "status": "active",
            "cores": 2,
            "memory": 4,
            "relations": relations
        }
    })
}
