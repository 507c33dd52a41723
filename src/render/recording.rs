use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::{FinalAnswer, NoticeKind, Renderer, SessionHost, ToastLevel, ToolGroup};
use crate::session::TurnOutcome;
use crate::types::{
    ApprovalDecision, BlockId, BlockKind, PermissionRequest, ProgressItem, QuestionNegotiation,
    ToolInvocation,
};

/// One recorded renderer call.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    Notice(NoticeKind, String),
    BlockOpened(BlockId, BlockKind),
    BlockText(BlockId, String),
    BlockClosed(BlockId),
    BlockRemoved(BlockId),
    ToolOpened(ToolInvocation),
    ToolUpdated(ToolInvocation),
    ToolResolved(ToolInvocation),
    ToolsGrouped(ToolGroup),
    ProgressOpened(Vec<ProgressItem>, usize),
    ProgressUpdated(Vec<ProgressItem>),
    PermissionOpened(PermissionRequest),
    PermissionResolved(String, Option<ApprovalDecision>),
    QuestionOpened(QuestionNegotiation),
    QuestionUpdated(QuestionNegotiation),
    QuestionResolved(String, BTreeMap<String, String>),
    FinalAnswer(FinalAnswer),
}

/// One recorded host call.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    RunningChanged(String, bool),
    NeedsAttention(String),
    TurnCompleted(String, TurnOutcome),
    Idle(String),
    Toast(ToastLevel, String),
    QueueChanged(String, usize),
    Reload,
}

/// Headless renderer/host that records every call in order.
///
/// Useful for transcripts and for asserting on engine behavior.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    ops: Mutex<Vec<RenderOp>>,
    host_ops: Mutex<Vec<HostOp>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<RenderOp> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn host_ops(&self) -> Vec<HostOp> {
        self.host_ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Last text rendered for a block.
    pub fn block_text(&self, id: BlockId) -> Option<String> {
        self.ops().into_iter().rev().find_map(|op| match op {
            RenderOp::BlockText(block, text) if block == id => Some(text),
            _ => None,
        })
    }

    pub fn final_answers(&self) -> Vec<FinalAnswer> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RenderOp::FinalAnswer(answer) => Some(answer),
                _ => None,
            })
            .collect()
    }

    /// Every running-flag change reported for `chat_id`.
    pub fn running_transitions(&self, chat_id: &str) -> Vec<bool> {
        self.host_ops()
            .into_iter()
            .filter_map(|op| match op {
                HostOp::RunningChanged(chat, running) if chat == chat_id => Some(running),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.host_ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, op: RenderOp) {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).push(op);
    }

    fn record_host(&self, op: HostOp) {
        self.host_ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
    }
}

impl Renderer for RecordingRenderer {
    fn notice(&self, kind: NoticeKind, message: &str) {
        self.record(RenderOp::Notice(kind, message.to_string()));
    }

    fn block_opened(&self, id: BlockId, kind: BlockKind) {
        self.record(RenderOp::BlockOpened(id, kind));
    }

    fn block_text(&self, id: BlockId, text: &str) {
        self.record(RenderOp::BlockText(id, text.to_string()));
    }

    fn block_closed(&self, id: BlockId) {
        self.record(RenderOp::BlockClosed(id));
    }

    fn block_removed(&self, id: BlockId) {
        self.record(RenderOp::BlockRemoved(id));
    }

    fn tool_opened(&self, tool: &ToolInvocation) {
        self.record(RenderOp::ToolOpened(tool.clone()));
    }

    fn tool_updated(&self, tool: &ToolInvocation) {
        self.record(RenderOp::ToolUpdated(tool.clone()));
    }

    fn tool_resolved(&self, tool: &ToolInvocation) {
        self.record(RenderOp::ToolResolved(tool.clone()));
    }

    fn tools_grouped(&self, group: &ToolGroup) {
        self.record(RenderOp::ToolsGrouped(group.clone()));
    }

    fn progress_opened(&self, items: &[ProgressItem], position: usize) {
        self.record(RenderOp::ProgressOpened(items.to_vec(), position));
    }

    fn progress_updated(&self, items: &[ProgressItem]) {
        self.record(RenderOp::ProgressUpdated(items.to_vec()));
    }

    fn permission_opened(&self, request: &PermissionRequest) {
        self.record(RenderOp::PermissionOpened(request.clone()));
    }

    fn permission_resolved(&self, request_id: &str, decision: Option<ApprovalDecision>) {
        self.record(RenderOp::PermissionResolved(request_id.to_string(), decision));
    }

    fn question_opened(&self, negotiation: &QuestionNegotiation) {
        self.record(RenderOp::QuestionOpened(negotiation.clone()));
    }

    fn question_updated(&self, negotiation: &QuestionNegotiation) {
        self.record(RenderOp::QuestionUpdated(negotiation.clone()));
    }

    fn question_resolved(&self, request_id: &str, answers: &BTreeMap<String, String>) {
        self.record(RenderOp::QuestionResolved(
            request_id.to_string(),
            answers.clone(),
        ));
    }

    fn final_answer(&self, answer: &FinalAnswer) {
        self.record(RenderOp::FinalAnswer(answer.clone()));
    }
}

impl SessionHost for RecordingRenderer {
    fn running_changed(&self, chat_id: &str, running: bool) {
        self.record_host(HostOp::RunningChanged(chat_id.to_string(), running));
    }

    fn needs_attention(&self, chat_id: &str) {
        self.record_host(HostOp::NeedsAttention(chat_id.to_string()));
    }

    fn turn_completed(&self, chat_id: &str, outcome: TurnOutcome) {
        self.record_host(HostOp::TurnCompleted(chat_id.to_string(), outcome));
    }

    fn idle(&self, chat_id: &str) {
        self.record_host(HostOp::Idle(chat_id.to_string()));
    }

    fn toast(&self, level: ToastLevel, message: &str) {
        self.record_host(HostOp::Toast(level, message.to_string()));
    }

    fn queue_changed(&self, chat_id: &str, len: usize) {
        self.record_host(HostOp::QueueChanged(chat_id.to_string(), len));
    }

    fn reload(&self) {
        self.record_host(HostOp::Reload);
    }
}
