//! Outbound calls to the agent server.

mod http;

pub use http::HttpAgentService;

use async_trait::async_trait;

use crate::error::Result;
use crate::stream::ByteStream;
use crate::types::{AlwaysAllowRule, ApprovalDecision, ChatMessage, ModelList, TurnRequest};

/// Transport-agnostic agent server API.
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Allocate a new chat id.
    async fn create_chat(&self) -> Result<String>;

    /// Start a turn and return its raw event stream.
    async fn submit_turn(&self, request: &TurnRequest) -> Result<ByteStream>;

    /// Ask the agent to stop the running turn. The turn still ends through
    /// its own `cancelled` event.
    async fn cancel_turn(&self, chat_id: &str) -> Result<()>;

    async fn decide_approval(&self, request_id: &str, decision: ApprovalDecision) -> Result<()>;

    async fn create_always_allow_rule(&self, rule: &AlwaysAllowRule) -> Result<()>;

    /// `answer` is the serialized `question -> answer` map.
    async fn answer_question(&self, request_id: &str, answer: &str) -> Result<()>;

    /// Opaque token identifying the current server process lifetime.
    async fn health_probe(&self) -> Result<String>;

    async fn list_models(&self) -> Result<ModelList>;

    /// Append one entry to the durable chat history.
    async fn save_message(&self, message: &ChatMessage) -> Result<()>;
}
