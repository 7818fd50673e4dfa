//! Shared test utilities for vdc-reconcile integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use vdc_client::{Client, ClientConfig, ObjectId};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

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
            .with_delay_interval(Duration::from_millis(20))
            .with_max_delay_interval(Duration::from_millis(50))
            .with_max_retries(2)
            .with_request_timeout(Duration::from_secs(5))
            .with_request_completion_timeout(Duration::from_secs(5))
            .with_power_state_timeout(Duration::from_secs(2))
    }

    pub fn client(&self) -> Client {
        Client::new(self.config()).unwrap()
    }

    /// Method and path of every received request, in arrival order.
    pub async fn requests(&self) -> Vec<(String, String)> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| (r.method.to_string(), r.url.path().to_string()))
            .collect()
    }

    pub async fn count(&self, method: &str, path: &str) -> usize {
        self.requests()
            .await
            .iter()
            .filter(|(m, p)| m == method && p == path)
            .count()
    }

    pub async fn mutations(&self) -> Vec<(String, String)> {
        self.requests()
            .await
            .into_iter()
            .filter(|(m, _)| m != "GET")
            .collect()
    }
}

pub fn id(n: u8) -> ObjectId {
    ObjectId::parse(&format!("00000000-0000-4000-8000-0000000000{:02x}", n)).unwrap()
}

pub fn server_path(server: ObjectId) -> String {
    format!("/objects/servers/{}", server)
}

pub fn relation_path(server: ObjectId, segment: &str, object: ObjectId) -> String {
    format!("/objects/servers/{}/{}/{}", server, segment, object)
}

/// A server whose power state follows the power and shutdown endpoints.
pub struct FakeServer {
    pub id: ObjectId,
    power: Arc<AtomicBool>,
}

impl FakeServer {
    pub async fn mount(api: &TestApi, id: ObjectId, running: bool) -> Self {
        Self::mount_with(api, id, running, json!({}), true).await
    }

    /// Mount the server read, power and shutdown endpoints. When
    /// `honors_shutdown` is false the guest ignores shutdown requests.
    pub async fn mount_with(
        api: &TestApi,
        id: ObjectId,
        running: bool,
        relations: Value,
        honors_shutdown: bool,
    ) -> Self {
        let power = Arc::new(AtomicBool::new(running));

        let state = power.clone();
        Mock::given(method("GET"))
            .and(path(server_path(id)))
            .respond_with(move |_: &Request| {
                ResponseTemplate::new(200).set_body_json(json!({
                    "server": {
                        "object_uuid": id,
                        "name": "web-1",
                        "power": state.load(Ordering::SeqCst),
                        "legacy": false,
                        "status": "active",
                        "cores": 2,
                        "memory": 4,
                        "relations": relations.clone()
                    }
                }))
            })
            .mount(&api.server)
            .await;

        let state = power.clone();
        Mock::given(method("PATCH"))
            .and(path(format!("{}/power", server_path(id))))
            .respond_with(move |req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap_or_default();
                match body["power"].as_bool() {
                    Some(on) => {
                        state.store(on, Ordering::SeqCst);
                        ResponseTemplate::new(204)
                    }
                    None => ResponseTemplate::new(400),
                }
            })
            .mount(&api.server)
            .await;

        let state = power.clone();
        Mock::given(method("PATCH"))
            .and(path(format!("{}/shutdown", server_path(id))))
            .respond_with(move |_: &Request| {
                if honors_shutdown {
                    state.store(false, Ordering::SeqCst);
                }
                ResponseTemplate::new(204)
            })
            .mount(&api.server)
            .await;

        Self { id, power }
    }

    pub fn is_running(&self) -> bool {
        self.power.load(Ordering::SeqCst)
    }
}
