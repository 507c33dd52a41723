//! Host-facing capabilities.
//!
//! The engine never draws anything itself. Every visible effect goes through
//! a [`Renderer`] (per-response elements) or a [`SessionHost`] (session-level
//! signals). All methods default to no-ops so a host only implements what it
//! shows.

mod layout;
mod recording;

pub use layout::{Element, ResponseLayout, Surface};
pub use recording::{HostOp, RecordingRenderer, RenderOp};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::session::TurnOutcome;
use crate::types::{
    ApprovalDecision, BlockId, BlockKind, PermissionRequest, ProgressItem, QuestionNegotiation,
    ToolInvocation,
};

/// Informational line inside a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NoticeKind {
    Status,
    Compacting,
    Compacted,
    SessionReset,
    Error,
}

/// Banner attached to the final answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Banner {
    Success(String),
    Warning(String),
    Error(String),
    Cancelled(String),
}

/// The terminal rendering of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub outcome: TurnOutcome,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<Banner>,
}

/// A collapsed run of compact tool cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolGroup {
    pub id: u32,
    /// Per-tool counts, e.g. `Read ×2, Grep ×1`.
    pub label: String,
    pub tool_ids: Vec<String>,
}

/// Toast severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Error,
}

/// Rendering capability for the elements of one response.
pub trait Renderer: Send + Sync {
    fn notice(&self, _kind: NoticeKind, _message: &str) {}

    fn block_opened(&self, _id: BlockId, _kind: BlockKind) {}
    /// Full current text of the block (not a delta).
    fn block_text(&self, _id: BlockId, _text: &str) {}
    fn block_closed(&self, _id: BlockId) {}
    fn block_removed(&self, _id: BlockId) {}

    fn tool_opened(&self, _tool: &ToolInvocation) {}
    fn tool_updated(&self, _tool: &ToolInvocation) {}
    fn tool_resolved(&self, _tool: &ToolInvocation) {}
    fn tools_grouped(&self, _group: &ToolGroup) {}

    /// First render of the progress widget at `position` in the response.
    fn progress_opened(&self, _items: &[ProgressItem], _position: usize) {}
    fn progress_updated(&self, _items: &[ProgressItem]) {}

    fn permission_opened(&self, _request: &PermissionRequest) {}
    /// Card becomes read-only. `None` when the decision came from elsewhere
    /// without a verdict.
    fn permission_resolved(&self, _request_id: &str, _decision: Option<ApprovalDecision>) {}

    fn question_opened(&self, _negotiation: &QuestionNegotiation) {}
    fn question_updated(&self, _negotiation: &QuestionNegotiation) {}
    fn question_resolved(&self, _request_id: &str, _answers: &BTreeMap<String, String>) {}

    fn final_answer(&self, _answer: &FinalAnswer) {}
}

/// Session-level signals (tab chrome, toasts, page reload).
pub trait SessionHost: Send + Sync {
    fn running_changed(&self, _chat_id: &str, _running: bool) {}
    /// A negotiation opened; mark the session if it is not in the foreground.
    fn needs_attention(&self, _chat_id: &str) {}
    fn turn_completed(&self, _chat_id: &str, _outcome: TurnOutcome) {}
    /// Restore idle input state (nothing left to drain).
    fn idle(&self, _chat_id: &str) {}
    fn toast(&self, _level: ToastLevel, _message: &str) {}
    fn queue_changed(&self, _chat_id: &str, _len: usize) {}
    /// The backend restarted and no session is running.
    fn reload(&self) {}
}

/// Renderer and host that ignore everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {}
impl SessionHost for NullRenderer {}
