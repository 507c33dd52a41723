use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::queue::MessageQueue;
use crate::error::Result;
use crate::types::PermissionChoice;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnOutcome {
    /// Authoritative `result` event.
    Result,
    Cancelled,
    /// Failed submit, transport failure, or an unanswered `error`.
    ErrorTerminal,
    /// Process exited (or stream ended) without a `result`.
    DoneNoResult,
    /// The session closed while the turn was running.
    Closed,
}

/// Mutable per-session state. Only the owning session touches it.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub running: bool,
    /// Incremented once per turn start.
    pub run_id: u64,
    pub queue: MessageQueue,
    pub model: Option<String>,
    /// Action inbox of the running turn.
    pub actions: Option<mpsc::UnboundedSender<TurnAction>>,
    pub closed: bool,
}

/// Result of [`super::SessionRunner::submit`].
#[derive(Debug)]
pub enum SubmitOutcome {
    /// A new turn started. The handle completes after the turn's cleanup.
    Started {
        run_id: u64,
        handle: JoinHandle<TurnOutcome>,
    },
    /// A turn is running; the message waits at this 1-based position.
    Queued { position: usize },
}

impl SubmitOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }
}

/// User action routed into the running turn.
#[derive(Debug)]
pub(crate) enum TurnAction {
    Decide {
        request_id: String,
        choice: PermissionChoice,
        reply: oneshot::Sender<Result<()>>,
    },
    SelectOption {
        request_id: String,
        question: usize,
        option: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    FreeText {
        request_id: String,
        question: usize,
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SubmitAnswers {
        request_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
}
