use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::AgentService;
use crate::error::{GatekeepError, Result};
use crate::stream::ByteStream;
use crate::types::{AlwaysAllowRule, ApprovalDecision, ChatMessage, ModelList, TurnRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the short request/response endpoints. The run stream has none.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`AgentService`] over the server's JSON/HTTP API.
#[derive(Debug, Clone)]
pub struct HttpAgentService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CreateChatResponse {
    chat_id: String,
}

#[derive(Deserialize)]
struct HealthResponse {
    #[serde(default)]
    start_time: Value,
}

impl HttpAgentService {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        debug!(path, "agent service request");
        let response = self
            .client
            .post(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }

    async fn post_ok(&self, path: &str, body: Value) -> Result<()> {
        self.post_json(path, &body).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatekeepError::api(status.as_u16(), error_message(&body)))
}

/// Prefer the server's `{"error": "..."}` message over the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl AgentService for HttpAgentService {
    async fn create_chat(&self) -> Result<String> {
        let response = self.post_json("/api/agent/create-chat", &json!({})).await?;
        let body: CreateChatResponse = response.json().await?;
        Ok(body.chat_id)
    }

    async fn submit_turn(&self, request: &TurnRequest) -> Result<ByteStream> {
        debug!(chat_id = %request.chat_id, "submitting turn");
        let response = self
            .client
            .post(self.url("/api/agent/run"))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GatekeepError::from))
            .boxed())
    }

    async fn cancel_turn(&self, chat_id: &str) -> Result<()> {
        self.post_ok("/api/agent/cancel", json!({ "chat_id": chat_id }))
            .await
    }

    async fn decide_approval(&self, request_id: &str, decision: ApprovalDecision) -> Result<()> {
        self.post_ok(
            "/api/approval/decide",
            json!({ "request_id": request_id, "decision": decision }),
        )
        .await
    }

    async fn create_always_allow_rule(&self, rule: &AlwaysAllowRule) -> Result<()> {
        self.post_ok("/api/permissions/rules", serde_json::to_value(rule)?)
            .await
    }

    async fn answer_question(&self, request_id: &str, answer: &str) -> Result<()> {
        self.post_ok(
            "/api/approval/answer",
            json!({ "request_id": request_id, "answer": answer }),
        )
        .await
    }

    async fn health_probe(&self) -> Result<String> {
        let response = self
            .client
            .get(self.url("/api/health"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let body: HealthResponse = check_status(response).await?.json().await?;
        match body.start_time {
            Value::String(token) => Ok(token),
            Value::Null => Err(GatekeepError::Stream(
                "health response has no start_time".into(),
            )),
            other => Ok(other.to_string()),
        }
    }

    async fn list_models(&self) -> Result<ModelList> {
        let response = self
            .client
            .get(self.url("/api/agent/models"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn save_message(&self, message: &ChatMessage) -> Result<()> {
        self.post_ok("/api/chats/save", serde_json::to_value(message)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_json_error_field() {
        assert_eq!(error_message(r#"{"error": "chat_id is required"}"#), "chat_id is required");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let service = HttpAgentService::with_client(reqwest::Client::new(), "http://host:1/");
        assert_eq!(service.url("/api/health"), "http://host:1/api/health");
    }
}
