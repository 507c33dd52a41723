//! One chat session: turn lifecycle, queue draining, user actions.
//!
//! A session runs at most one turn at a time. Each turn start bumps the
//! session's `run_id`; terminal cleanup only runs while that id is still
//! current, so a late-finishing turn can never clobber a newer one.

mod context;
mod queue;
mod state;
mod turn;


pub use context::EngineContext;
pub use queue::MessageQueue;
pub use state::{SubmitOutcome, TurnOutcome};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GatekeepError, Result};
use crate::render::{Renderer, SessionHost, ToastLevel};
use crate::restart::RestartWatcher;
use crate::stream::{decode_stream, ByteStream};
use crate::types::{ChatMessage, ChatRole, PermissionChoice, QueuedMessage, TurnRequest};
use state::{SessionState, TurnAction};
use turn::{Completion, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOrigin {
    User,
    Queue,
}

/// Handle to one session. Cheap to clone.
#[derive(Clone)]
pub struct SessionRunner {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    chat_id: String,
    ctx: Arc<EngineContext>,
    renderer: Arc<dyn Renderer>,
    host: Arc<dyn SessionHost>,
    state: Mutex<SessionState>,
    closed: CancellationToken,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Running -> idle for `run_id`, at most once. Returns whether this call
    /// performed the transition.
    fn mark_idle(&self, run_id: u64) -> bool {
        {
            let mut state = self.lock();
            if state.run_id != run_id || !state.running {
                return false;
            }
            state.running = false;
            state.actions = None;
        }
        self.ctx.session_stopped();
        self.host.running_changed(&self.chat_id, false);
        info!(chat_id = %self.chat_id, run_id, "turn finished");
        true
    }
}

impl SessionRunner {
    /// Open a session, restoring its durable queue.
    pub fn open(
        chat_id: impl Into<String>,
        ctx: Arc<EngineContext>,
        renderer: Arc<dyn Renderer>,
        host: Arc<dyn SessionHost>,
    ) -> Self {
        let chat_id = chat_id.into();
        let queue = MessageQueue::restore(chat_id.clone(), ctx.store.clone()).unwrap_or_else(|err| {
            warn!(chat_id = %chat_id, error = %err, "could not restore queue");
            MessageQueue::empty(chat_id.clone(), ctx.store.clone())
        });

        let mut prefs = ctx.store.load_prefs().unwrap_or_default();
        let model = prefs.last_model.clone();
        if prefs.last_chat_id.as_deref() != Some(chat_id.as_str()) {
            prefs.last_chat_id = Some(chat_id.clone());
            if let Err(err) = ctx.store.save_prefs(&prefs) {
                warn!(error = %err, "failed to remember last chat");
            }
        }

        let queued = queue.len();
        let state = SessionState {
            running: false,
            run_id: 0,
            queue,
            model,
            actions: None,
            closed: false,
        };
        let inner = Arc::new(SessionInner {
            chat_id,
            ctx,
            renderer,
            host,
            state: Mutex::new(state),
            closed: CancellationToken::new(),
        });
        if queued > 0 {
            inner.host.queue_changed(&inner.chat_id, queued);
        }
        if inner.ctx.cached_epoch().is_none() {
            // Baseline for restart detection; the context probes at most once.
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let ctx = inner.ctx.clone();
                runtime.spawn(async move {
                    ctx.epoch().await;
                });
            }
        }
        Self { inner }
    }

    pub fn chat_id(&self) -> &str {
        &self.inner.chat_id
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn run_id(&self) -> u64 {
        self.inner.lock().run_id
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.inner.lock().queue.items()
    }

    /// Server epoch this process treats as the restart baseline.
    pub fn known_epoch(&self) -> Option<String> {
        self.inner.ctx.cached_epoch()
    }

    pub fn model(&self) -> Option<String> {
        self.inner.lock().model.clone()
    }

    /// Model for subsequent turns; remembered as the preferred model.
    pub fn set_model(&self, model: Option<String>) {
        self.inner.lock().model = model.clone();
        let Some(model) = model else {
            return;
        };
        let store = &self.inner.ctx.store;
        let mut prefs = store.load_prefs().unwrap_or_default();
        prefs.last_model = Some(model);
        if let Err(err) = store.save_prefs(&prefs) {
            warn!(error = %err, "failed to remember model");
        }
    }

    pub fn draft(&self) -> Option<String> {
        self.inner
            .ctx
            .store
            .load_draft(&self.inner.chat_id)
            .unwrap_or_else(|err| {
                warn!(error = %err, "failed to load draft");
                None
            })
    }

    pub fn set_draft(&self, text: &str) -> Result<()> {
        self.inner.ctx.store.save_draft(&self.inner.chat_id, text)
    }

    /// Start a turn, or queue the message while one is running.
    pub fn submit(&self, message: QueuedMessage) -> Result<SubmitOutcome> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(GatekeepError::SessionClosed);
        }
        if state.running {
            let position = state.queue.push(message);
            drop(state);
            info!(chat_id = %self.inner.chat_id, position, "message queued");
            self.inner.host.queue_changed(&self.inner.chat_id, position);
            return Ok(SubmitOutcome::Queued { position });
        }
        Ok(start_turn(&self.inner, state, message, TurnOrigin::User))
    }

    /// Ask the agent to stop. The turn ends through its `cancelled` event.
    pub async fn cancel(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        info!(chat_id = %self.inner.chat_id, "cancel requested");
        self.inner.ctx.service.cancel_turn(&self.inner.chat_id).await
    }

    pub async fn decide(&self, request_id: &str, choice: PermissionChoice) -> Result<()> {
        let request_id = request_id.to_string();
        self.send_action(|reply| TurnAction::Decide {
            request_id,
            choice,
            reply,
        })
        .await
    }

    pub async fn select_option(&self, request_id: &str, question: usize, option: usize) -> Result<()> {
        let request_id = request_id.to_string();
        self.send_action(|reply| TurnAction::SelectOption {
            request_id,
            question,
            option,
            reply,
        })
        .await
    }

    pub async fn set_free_text(&self, request_id: &str, question: usize, text: &str) -> Result<()> {
        let request_id = request_id.to_string();
        let text = text.to_string();
        self.send_action(|reply| TurnAction::FreeText {
            request_id,
            question,
            text,
            reply,
        })
        .await
    }

    pub async fn submit_answers(&self, request_id: &str) -> Result<()> {
        let request_id = request_id.to_string();
        self.send_action(|reply| TurnAction::SubmitAnswers { request_id, reply })
            .await
    }

    /// Cold-start resumption of a restored queue, after a settle delay.
    pub fn resume_queue(&self) -> Option<tokio::task::JoinHandle<()>> {
        let (count, run_id) = {
            let state = self.inner.lock();
            if state.closed || state.running || state.queue.is_empty() {
                return None;
            }
            (state.queue.len(), state.run_id)
        };
        self.inner.host.toast(
            ToastLevel::Info,
            &format!("Restored {count} queued message(s)"),
        );
        let inner = self.inner.clone();
        let settle = inner.ctx.config.resume_settle;
        Some(tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            drain_next(&inner, run_id);
        }))
    }

    /// Tear down. A running turn stops reading and is not persisted.
    pub fn close(&self) {
        let was_running = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.actions = None;
            std::mem::replace(&mut state.running, false)
        };
        self.inner.closed.cancel();
        if was_running {
            self.inner.ctx.session_stopped();
            self.inner.host.running_changed(&self.inner.chat_id, false);
        }
        debug!(chat_id = %self.inner.chat_id, "session closed");
    }

    async fn send_action(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> TurnAction,
    ) -> Result<()> {
        let tx = self
            .inner
            .lock()
            .actions
            .clone()
            .ok_or_else(|| GatekeepError::InvalidState("no turn is running".into()))?;
        let (reply, rx) = oneshot::channel();
        tx.send(build(reply))
            .map_err(|_| GatekeepError::SessionClosed)?;
        rx.await.map_err(|_| GatekeepError::SessionClosed)?
    }
}

fn start_turn(
    inner: &Arc<SessionInner>,
    mut state: MutexGuard<'_, SessionState>,
    message: QueuedMessage,
    origin: TurnOrigin,
) -> SubmitOutcome {
    state.running = true;
    state.run_id += 1;
    let run_id = state.run_id;
    let (tx, rx) = mpsc::unbounded_channel();
    state.actions = Some(tx);
    let model = state.model.clone();
    drop(state);

    inner.ctx.session_started();
    inner.host.running_changed(&inner.chat_id, true);
    info!(chat_id = %inner.chat_id, run_id, ?origin, "turn started");

    let handle = tokio::spawn(run_turn(inner.clone(), run_id, message, model, rx, origin));
    SubmitOutcome::Started { run_id, handle }
}

async fn run_turn(
    inner: Arc<SessionInner>,
    run_id: u64,
    message: QueuedMessage,
    model: Option<String>,
    actions: mpsc::UnboundedReceiver<TurnAction>,
    origin: TurnOrigin,
) -> TurnOutcome {
    let ctx = inner.ctx.clone();
    let chat_id = inner.chat_id.clone();

    let user_message = ChatMessage::new(&chat_id, ChatRole::User, message.display_text.clone());
    if let Err(err) = ctx.service.save_message(&user_message).await {
        warn!(chat_id = %chat_id, error = %err, "failed to save user message");
    }

    let mut turn = Turn::new(
        &chat_id,
        &ctx.config,
        ctx.service.clone(),
        inner.renderer.clone(),
        inner.host.clone(),
    );
    let request = TurnRequest::from_queued(&chat_id, &message, model);
    let completion = match ctx.service.submit_turn(&request).await {
        Ok(bytes) => drive(&inner, &mut turn, bytes, actions).await,
        Err(err) => {
            warn!(chat_id = %chat_id, error = %err, "failed to start turn");
            if origin == TurnOrigin::Queue {
                emergency_clear(&inner, &err);
            }
            Some(turn.transport_failed(&err))
        }
    };

    let outcome = match completion {
        Some(completion) => finish(&inner, run_id, completion).await,
        None => TurnOutcome::Closed,
    };
    cleanup(&inner, run_id, outcome);
    outcome
}

/// Pump frames, actions and timers until the turn completes. `None` when
/// the session closed first.
async fn drive(
    inner: &SessionInner,
    turn: &mut Turn,
    bytes: ByteStream,
    mut actions: mpsc::UnboundedReceiver<TurnAction>,
) -> Option<Completion> {
    let mut frames = decode_stream(bytes, inner.ctx.config.line_prefix.clone());
    loop {
        let deadline = turn.next_deadline();
        let completion = tokio::select! {
            biased;
            _ = inner.closed.cancelled() => {
                debug!(chat_id = %inner.chat_id, "session closed mid-turn");
                return None;
            }
            Some(action) = actions.recv() => {
                turn.apply_action(action, Instant::now());
                None
            }
            frame = frames.next() => match frame {
                Some(Ok(frame)) => turn.handle(frame, Instant::now()),
                Some(Err(err)) => {
                    warn!(chat_id = %inner.chat_id, error = %err, "stream read failed");
                    Some(turn.transport_failed(&err))
                }
                None => Some(turn.stream_ended()),
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                turn.on_tick(Instant::now())
            }
        };
        if completion.is_some() {
            // Dropping `frames` ends the read without waiting for teardown.
            return completion;
        }
    }
}

/// Persist the assistant message and flip running off.
///
/// A cancelled turn goes idle before persisting so the user can resend
/// immediately.
async fn finish(inner: &SessionInner, run_id: u64, completion: Completion) -> TurnOutcome {
    let Completion { outcome, persist } = completion;
    if outcome == TurnOutcome::Cancelled {
        inner.mark_idle(run_id);
    }
    if let Some(text) = persist {
        let message = ChatMessage::new(&inner.chat_id, ChatRole::Assistant, text);
        if let Err(err) = inner.ctx.service.save_message(&message).await {
            warn!(chat_id = %inner.chat_id, error = %err, "failed to save assistant message");
        }
    }
    inner.mark_idle(run_id);
    outcome
}

/// Terminal cleanup, guarded by `run_id`.
fn cleanup(inner: &Arc<SessionInner>, run_id: u64, outcome: TurnOutcome) {
    let queued = {
        let state = inner.lock();
        if state.run_id != run_id || state.closed {
            debug!(chat_id = %inner.chat_id, run_id, current = state.run_id, "skipping stale turn cleanup");
            return;
        }
        state.queue.len()
    };
    inner.mark_idle(run_id);
    inner.host.turn_completed(&inner.chat_id, outcome);

    if queued > 0 {
        let drainer = inner.clone();
        let grace = inner.ctx.config.drain_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            drain_next(&drainer, run_id);
        });
    } else {
        inner.host.idle(&inner.chat_id);
    }

    let watcher = RestartWatcher::new(inner.ctx.clone());
    let host = inner.host.clone();
    tokio::spawn(async move {
        watcher.check(host.as_ref()).await;
    });
}

/// Start the next queued message if the session is still idle after the
/// turn identified by `after_run_id`.
fn drain_next(inner: &Arc<SessionInner>, after_run_id: u64) -> Option<SubmitOutcome> {
    let mut state = inner.lock();
    if state.closed || state.running || state.run_id != after_run_id {
        debug!(chat_id = %inner.chat_id, "drain skipped, session moved on");
        return None;
    }
    let Some(message) = state.queue.pop() else {
        drop(state);
        inner.host.idle(&inner.chat_id);
        return None;
    };
    let remaining = state.queue.len();
    let outcome = start_turn(inner, state, message, TurnOrigin::Queue);
    inner.host.queue_changed(&inner.chat_id, remaining);
    Some(outcome)
}

/// A queued message could not be sent: drop the rest of the queue rather
/// than retrying into the same failure.
fn emergency_clear(inner: &SessionInner, err: &GatekeepError) {
    let dropped = {
        let mut state = inner.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        dropped
    };
    warn!(chat_id = %inner.chat_id, dropped, error = %err, "queue cleared after drain failure");
    inner.host.queue_changed(&inner.chat_id, 0);
    inner.host.toast(
        ToastLevel::Error,
        &format!("Failed to send queued message ({err}); cleared {dropped} pending"),
    );
}
