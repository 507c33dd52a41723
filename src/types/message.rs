//! Chat messages, queued submissions and turn requests.

use base64::Engine as _;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Author of a persisted chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One durable chat-history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(chat_id: impl Into<String>, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Image attached to a prompt, base64-encoded for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    #[serde(rename = "type")]
    pub media_type: String,
    pub data: String,
}

impl ImageAttachment {
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// A message submitted while a turn was running.
///
/// Only `prompt` and `display_text` survive persistence; images stay in
/// session memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub prompt: String,
    pub display_text: String,
    #[serde(skip)]
    pub images: Vec<ImageAttachment>,
}

impl QueuedMessage {
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            display_text: prompt.clone(),
            prompt,
            images: Vec::new(),
        }
    }

    pub fn with_display_text(mut self, display_text: impl Into<String>) -> Self {
        self.display_text = display_text.into();
        self
    }

    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }
}

/// Body of a submit-turn call.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct TurnRequest {
    #[builder(into)]
    pub prompt: String,
    #[builder(into)]
    pub chat_id: String,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TurnRequest {
    pub fn from_queued(chat_id: &str, message: &QueuedMessage, model: Option<String>) -> Self {
        Self::builder()
            .prompt(message.prompt.clone())
            .chat_id(chat_id)
            .images(message.images.clone())
            .maybe_model(model)
            .build()
    }
}

/// One entry of the model list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Model list as served by the agent server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}
