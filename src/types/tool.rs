//! Tool invocation and progress-list types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Rendering weight of a tool card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolTier {
    /// Read-only / informational calls, eligible for grouping.
    Compact,
    Normal,
}

/// Lifecycle of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ToolStatus {
    Pending,
    ResolvedOk,
    ResolvedError,
}

/// One agent-initiated tool call tracked from start to result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    /// Tool name with any MCP proxy prefix removed.
    pub name: String,
    pub tier: ToolTier,
    pub input_summary: String,
    pub input_json: serde_json::Value,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    /// Pretty-printed original input, available once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_recap: Option<String>,
    /// True while only the start signal has been seen.
    pub stub: bool,
}

impl ToolInvocation {
    pub fn is_resolved(&self) -> bool {
        self.status != ToolStatus::Pending
    }
}

/// Status of one progress-list item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Completed,
}

/// One entry of the per-turn progress widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressItem {
    pub content: String,
    pub status: ProgressStatus,
    /// Label shown instead of `content` while in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,
}

impl ProgressItem {
    /// Text to display for the item's current status.
    pub fn label(&self) -> &str {
        match (self.status, self.active_form.as_deref()) {
            (ProgressStatus::InProgress, Some(active)) if !active.is_empty() => active,
            _ => &self.content,
        }
    }
}
