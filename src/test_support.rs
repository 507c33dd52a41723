//! Scripted [`AgentService`] for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

use crate::error::{GatekeepError, Result};
use crate::service::AgentService;
use crate::stream::ByteStream;
use crate::types::{
    AlwaysAllowRule, ApprovalDecision, ChatMessage, ChatRole, ModelList, TurnRequest,
};

/// One outbound call, in the order the service saw it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CreateChat,
    Submit(String),
    Cancel(String),
    Decide(String, ApprovalDecision),
    Rule(AlwaysAllowRule),
    Answer(String, String),
    Health,
    ListModels,
    Save(ChatRole, String),
}

enum ScriptedTurn {
    Lines(Vec<String>),
    Channel(mpsc::UnboundedReceiver<Result<Bytes>>),
    Fail(String),
}

/// Live feed into a scripted turn's byte stream.
pub(crate) struct TurnFeed {
    tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl TurnFeed {
    pub fn send_event(&self, event: Value) {
        self.send_raw(&line(event));
    }

    pub fn send_raw(&self, raw: &str) {
        let _ = self.tx.send(Ok(Bytes::from(raw.to_string())));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Err(GatekeepError::Stream(message.to_string())));
    }

    /// End the byte stream.
    pub fn close(self) {}
}

/// `data: <json>\n`
pub(crate) fn line(event: Value) -> String {
    format!("data: {event}\n")
}

#[derive(Default)]
pub(crate) struct ScriptedService {
    calls: Mutex<Vec<Call>>,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    health: Mutex<VecDeque<std::result::Result<String, String>>>,
    health_default: Mutex<Option<String>>,
    models: Mutex<ModelList>,
    fail_outbound: AtomicBool,
    assistant_gate: Mutex<Option<Arc<Semaphore>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        locked(&self.calls).clone()
    }

    pub fn saved(&self, role: ChatRole) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Save(r, text) if r == role => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Next submit streams these lines, then ends.
    pub fn push_turn_lines(&self, lines: Vec<String>) {
        locked(&self.turns).push_back(ScriptedTurn::Lines(lines));
    }

    /// Next submit streams whatever the returned feed sends.
    pub fn push_turn_channel(&self) -> TurnFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        locked(&self.turns).push_back(ScriptedTurn::Channel(rx));
        TurnFeed { tx }
    }

    /// Next submit fails before any byte is read.
    pub fn push_submit_failure(&self, message: &str) {
        locked(&self.turns).push_back(ScriptedTurn::Fail(message.to_string()));
    }

    pub fn set_health(&self, token: &str) {
        *locked(&self.health_default) = Some(token.to_string());
    }

    /// Queue one health answer ahead of the default.
    pub fn push_health(&self, token: &str) {
        locked(&self.health).push_back(Ok(token.to_string()));
    }

    pub fn push_health_failure(&self) {
        locked(&self.health).push_back(Err("connection refused".into()));
    }

    pub fn set_models(&self, models: ModelList) {
        *locked(&self.models) = models;
    }

    /// Make every call other than submit and health fail.
    pub fn fail_outbound(&self, fail: bool) {
        self.fail_outbound.store(fail, Ordering::SeqCst);
    }

    /// Hold assistant saves until the returned semaphore gets a permit.
    pub fn hold_assistant_saves(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *locked(&self.assistant_gate) = Some(gate.clone());
        gate
    }

    fn record(&self, call: Call) {
        locked(&self.calls).push(call);
    }

    fn outbound(&self) -> Result<()> {
        if self.fail_outbound.load(Ordering::SeqCst) {
            Err(GatekeepError::api(503, "scripted failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AgentService for ScriptedService {
    async fn create_chat(&self) -> Result<String> {
        self.record(Call::CreateChat);
        self.outbound()?;
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn submit_turn(&self, request: &TurnRequest) -> Result<ByteStream> {
        self.record(Call::Submit(request.prompt.clone()));
        let next = locked(&self.turns).pop_front();
        match next {
            Some(ScriptedTurn::Lines(lines)) => Ok(futures::stream::iter(
                lines.into_iter().map(|l| Ok(Bytes::from(l))),
            )
            .boxed()),
            Some(ScriptedTurn::Channel(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(ScriptedTurn::Fail(message)) => Err(GatekeepError::api(500, message)),
            None => Ok(futures::stream::empty().boxed()),
        }
    }

    async fn cancel_turn(&self, chat_id: &str) -> Result<()> {
        self.record(Call::Cancel(chat_id.to_string()));
        self.outbound()
    }

    async fn decide_approval(&self, request_id: &str, decision: ApprovalDecision) -> Result<()> {
        self.record(Call::Decide(request_id.to_string(), decision));
        self.outbound()
    }

    async fn create_always_allow_rule(&self, rule: &AlwaysAllowRule) -> Result<()> {
        self.record(Call::Rule(rule.clone()));
        self.outbound()
    }

    async fn answer_question(&self, request_id: &str, answer: &str) -> Result<()> {
        self.record(Call::Answer(request_id.to_string(), answer.to_string()));
        self.outbound()
    }

    async fn health_probe(&self) -> Result<String> {
        self.record(Call::Health);
        let queued = locked(&self.health).pop_front();
        match queued {
            Some(Ok(token)) => Ok(token),
            Some(Err(message)) => Err(GatekeepError::Stream(message)),
            None => locked(&self.health_default)
                .clone()
                .ok_or_else(|| GatekeepError::Stream("no health scripted".into())),
        }
    }

    async fn list_models(&self) -> Result<ModelList> {
        self.record(Call::ListModels);
        self.outbound()?;
        Ok(locked(&self.models).clone())
    }

    async fn save_message(&self, message: &ChatMessage) -> Result<()> {
        if message.role == ChatRole::Assistant {
            let gate = locked(&self.assistant_gate).clone();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
        }
        self.record(Call::Save(message.role, message.content.clone()));
        self.outbound()
    }
}
