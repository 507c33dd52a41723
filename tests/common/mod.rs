//! Shared test helpers: wire framing and an HTTP-backed engine context.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gatekeep::config::EngineConfig;
use gatekeep::service::HttpAgentService;
use gatekeep::session::EngineContext;
use gatekeep::store::{ClientStore, MemoryClientStore};

/// One `data: <json>` line.
pub fn event_line(event: &Value) -> String {
    format!("data: {event}\n")
}

/// A whole run body, one event per line.
pub fn event_body(events: &[Value]) -> String {
    events.iter().map(event_line).collect()
}

/// Defaults with every delay shortened for real-time tests.
pub fn fast_config(server_url: &str) -> EngineConfig {
    EngineConfig {
        server_url: server_url.to_string(),
        delta_debounce: Duration::from_millis(5),
        drain_grace: Duration::from_millis(50),
        resume_settle: Duration::from_millis(20),
        auto_submit_delay: Duration::from_millis(20),
        restart_poll_attempts: 3,
        restart_poll_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    }
}

/// Context talking HTTP to `server`, with an in-memory store.
pub fn http_context(server: &MockServer) -> (Arc<EngineContext>, Arc<MemoryClientStore>) {
    let config = fast_config(&server.uri());
    let service = Arc::new(HttpAgentService::new(server.uri()).expect("http client"));
    let store = Arc::new(MemoryClientStore::new());
    let shared: Arc<dyn ClientStore> = store.clone();
    (EngineContext::new(config, service, shared), store)
}

/// Accept every side-channel POST the engine makes.
pub async fn mount_side_channels(server: &MockServer) {
    for route in [
        "/api/chats/save",
        "/api/agent/cancel",
        "/api/approval/decide",
        "/api/approval/answer",
        "/api/permissions/rules",
    ] {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(server)
            .await;
    }
}

/// JSON bodies received on `route`, in arrival order.
pub async fn bodies(server: &MockServer, route: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == route)
        .filter_map(|request| serde_json::from_slice(&request.body).ok())
        .collect()
}
