//! Inbound stream events.
//!
//! One JSON object per line, discriminated by `type`. Fields the engine does
//! not need are ignored; kinds it does not know deserialize to
//! [`AgentEvent::Unknown`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::negotiation::Question;

/// A decoded agent event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Status {
        #[serde(default)]
        message: String,
    },
    System {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtype: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    Debug {
        #[serde(default)]
        message: String,
    },
    /// Raw agent output the server could not parse as JSON.
    Text {
        #[serde(default)]
        content: String,
    },
    MessageStart,
    ContentBlockStart {
        index: u32,
        content_block: BlockStart,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    Assistant {
        message: MessagePayload,
    },
    User {
        message: MessagePayload,
    },
    Result {
        #[serde(default)]
        result: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default)]
        is_error: bool,
    },
    PermissionRequest {
        request_id: String,
        #[serde(default)]
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        always_allow_pattern: Option<String>,
        #[serde(default)]
        input: Value,
    },
    PermissionDecision {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approved: Option<bool>,
    },
    UserQuestion {
        request_id: String,
        #[serde(default)]
        questions: Vec<Question>,
    },
    Cancelled {
        #[serde(default)]
        message: String,
    },
    SessionCompacting {
        #[serde(default)]
        message: String,
    },
    SessionCompacted {
        #[serde(default)]
        message: String,
    },
    SessionReset {
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    #[serde(other)]
    Unknown,
}

impl AgentEvent {
    /// Whether this event ends the turn on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Result { .. } | Self::Cancelled { .. } | Self::Done { .. }
        )
    }
}

/// `content_block` payload of a `content_block_start` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl BlockStart {
    pub fn is_tool(&self) -> bool {
        matches!(self.kind.as_str(), "tool_use" | "server_tool_use")
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self.kind.as_str(), "thinking" | "redacted_thinking")
    }
}

/// `delta` payload of a `content_block_delta` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDelta {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_json: Option<String>,
}

/// What a delta contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaFragment<'a> {
    Text(&'a str),
    Thinking(&'a str),
    ToolInput(&'a str),
    Ignored,
}

impl BlockDelta {
    pub fn fragment(&self) -> DeltaFragment<'_> {
        if let Some(json) = self.partial_json.as_deref() {
            return DeltaFragment::ToolInput(json);
        }
        if let Some(thinking) = self.thinking.as_deref() {
            return DeltaFragment::Thinking(thinking);
        }
        match self.text.as_deref() {
            Some(text) => DeltaFragment::Text(text),
            None => DeltaFragment::Ignored,
        }
    }
}

/// `message` payload of `assistant` / `user` events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub content: MessageContent,
}

/// Message content is either a bare string or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentItem>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Parts(Vec::new())
    }
}

impl MessageContent {
    pub fn parts(&self) -> Vec<ContentItem> {
        match self {
            Self::Text(text) => vec![ContentItem::Text { text: text.clone() }],
            Self::Parts(parts) => parts.clone(),
        }
    }
}

/// One part of a full (non-incremental) message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}
