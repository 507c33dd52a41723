//! Event routing for one turn.
//!
//! Synchronous: the session task feeds frames, timer ticks and user actions
//! in, and gets a [`Completion`] back once the turn reaches a terminal state.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::state::{TurnAction, TurnOutcome};
use crate::approval::ApprovalNegotiator;
use crate::assembler::BlockAssembler;
use crate::config::EngineConfig;
use crate::error::GatekeepError;
use crate::render::{Banner, FinalAnswer, NoticeKind, Renderer, SessionHost, Surface};
use crate::service::AgentService;
use crate::stream::Frame;
use crate::tools::ToolTracker;
use crate::types::{AgentEvent, BlockKey, BlockKind, ContentItem, DeltaFragment, PermissionRequest};

const CANCELLED_PLACEHOLDER: &str = "*Cancelled by user*";
const SUCCESS_BANNER: &str = "Task completed";
const RESULT_ERROR_BANNER: &str = "The agent reported an error";

/// Terminal state reached by a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Completion {
    pub outcome: TurnOutcome,
    /// Text to persist as the assistant message.
    pub persist: Option<String>,
}

pub(crate) struct Turn {
    surface: Surface,
    assembler: BlockAssembler,
    tools: ToolTracker,
    negotiator: ApprovalNegotiator,
    segment: u32,
    error_idle_timeout: Option<Duration>,
    error_deadline: Option<Instant>,
    last_error: Option<String>,
    terminal: Option<TurnOutcome>,
}

impl Turn {
    pub fn new(
        chat_id: &str,
        config: &EngineConfig,
        service: Arc<dyn AgentService>,
        renderer: Arc<dyn Renderer>,
        host: Arc<dyn SessionHost>,
    ) -> Self {
        Self {
            surface: Surface::new(renderer),
            assembler: BlockAssembler::new(config.delta_debounce),
            tools: ToolTracker::new(),
            negotiator: ApprovalNegotiator::new(chat_id, service, host, config.auto_submit_delay),
            segment: 0,
            error_idle_timeout: config.error_idle_timeout,
            error_deadline: None,
            last_error: None,
            terminal: None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.assembler.next_deadline(),
            self.negotiator.next_deadline(),
            self.error_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn agent_busy(&self) -> bool {
        self.tools.has_pending() || !self.negotiator.open_ids().is_empty()
    }

    /// Timers: coalesced renders, auto-submit, error idle timeout.
    pub fn on_tick(&mut self, now: Instant) -> Option<Completion> {
        self.assembler.flush_due(now, &mut self.surface);
        // Outbound answers run detached.
        drop(self.negotiator.poll_due(now, &mut self.surface));
        match self.error_deadline {
            Some(_) if self.agent_busy() => {
                self.error_deadline = None;
                None
            }
            Some(deadline) if deadline <= now && self.terminal.is_none() => {
                let message = self.last_error.clone().unwrap_or_default();
                warn!(error = %message, "no event after agent error, ending turn");
                Some(self.finish_error(&message))
            }
            _ => None,
        }
    }

    pub fn apply_action(&mut self, action: TurnAction, now: Instant) {
        match action {
            TurnAction::Decide {
                request_id,
                choice,
                reply,
            } => {
                let result = self
                    .negotiator
                    .decide(&request_id, choice, &mut self.surface)
                    .map(drop);
                let _ = reply.send(result);
            }
            TurnAction::SelectOption {
                request_id,
                question,
                option,
                reply,
            } => {
                let result = self.negotiator.select_option(
                    &request_id,
                    question,
                    option,
                    now,
                    &mut self.surface,
                );
                let _ = reply.send(result);
            }
            TurnAction::FreeText {
                request_id,
                question,
                text,
                reply,
            } => {
                let result =
                    self.negotiator
                        .set_free_text(&request_id, question, &text, &mut self.surface);
                let _ = reply.send(result);
            }
            TurnAction::SubmitAnswers { request_id, reply } => {
                let result = self
                    .negotiator
                    .submit_answers(&request_id, &mut self.surface)
                    .map(drop);
                let _ = reply.send(result);
            }
        }
    }

    /// Route one decoded frame.
    pub fn handle(&mut self, frame: Frame, now: Instant) -> Option<Completion> {
        if self.terminal.is_some() {
            return None;
        }
        let event = match frame {
            Frame::Event(event) => event,
            Frame::RawText(line) => {
                self.error_deadline = None;
                self.assembler
                    .append_raw(self.segment, &line, now, &mut self.surface);
                return None;
            }
        };
        if !matches!(event, AgentEvent::Error { .. }) {
            self.error_deadline = None;
        }

        match event {
            AgentEvent::Status { message } => {
                self.surface.notice(NoticeKind::Status, &message);
            }
            AgentEvent::System { subtype, model } => {
                debug!(subtype = ?subtype, model = ?model, "agent system event");
            }
            AgentEvent::Debug { message } => {
                debug!(message = %message, "agent debug");
            }
            AgentEvent::Text { content } => {
                self.assembler
                    .append_raw(self.segment, &content, now, &mut self.surface);
            }
            AgentEvent::MessageStart => {
                self.assembler.flush(&mut self.surface);
                self.segment += 1;
            }
            AgentEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let key = self.key(index);
                if content_block.is_tool() {
                    let name = content_block.name.as_deref().unwrap_or_default();
                    self.tools
                        .start(key, content_block.id.as_deref(), name, &mut self.surface);
                } else if content_block.is_reasoning() {
                    self.assembler
                        .open_block(key, BlockKind::Reasoning, &mut self.surface);
                } else if content_block.kind == "text" {
                    self.assembler
                        .open_block(key, BlockKind::Prose, &mut self.surface);
                } else {
                    debug!(kind = %content_block.kind, index, "ignoring content block");
                }
            }
            AgentEvent::ContentBlockDelta { index, delta } => {
                let key = self.key(index);
                match delta.fragment() {
                    DeltaFragment::ToolInput(json) => self.tools.input_delta(key, json),
                    DeltaFragment::Text(text) => self.assembler.apply_delta(
                        key,
                        BlockKind::Prose,
                        text,
                        now,
                        &mut self.surface,
                    ),
                    DeltaFragment::Thinking(text) => self.assembler.apply_delta(
                        key,
                        BlockKind::Reasoning,
                        text,
                        now,
                        &mut self.surface,
                    ),
                    DeltaFragment::Ignored => {}
                }
            }
            AgentEvent::ContentBlockStop { index } => {
                let key = self.key(index);
                if self.tools.owns_block(key) {
                    self.tools.stop(key, &mut self.surface);
                } else {
                    self.assembler.close_block(key, &mut self.surface);
                }
            }
            AgentEvent::Assistant { message } => {
                for (position, part) in message.content.parts().into_iter().enumerate() {
                    let position = position as u32;
                    match part {
                        ContentItem::Text { text } if !text.is_empty() => {
                            self.assembler.reconcile(
                                self.segment,
                                position,
                                BlockKind::Prose,
                                &text,
                                &mut self.surface,
                            );
                        }
                        ContentItem::Thinking { thinking } if !thinking.is_empty() => {
                            self.assembler.reconcile(
                                self.segment,
                                position,
                                BlockKind::Reasoning,
                                &thinking,
                                &mut self.surface,
                            );
                        }
                        ContentItem::ToolUse { id, name, input } => {
                            self.tools.complete(&id, &name, input, &mut self.surface);
                        }
                        _ => {}
                    }
                }
            }
            AgentEvent::User { message } => {
                for part in message.content.parts() {
                    if let ContentItem::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } = part
                    {
                        self.tools
                            .resolve(&tool_use_id, &content, is_error, &mut self.surface);
                    }
                }
            }
            AgentEvent::Result {
                result,
                duration_ms,
                is_error,
            } => {
                info!(duration_ms = ?duration_ms, is_error, "turn result");
                return Some(self.finish_result(&result, is_error));
            }
            AgentEvent::PermissionRequest {
                request_id,
                tool,
                path,
                description,
                always_allow_pattern,
                input: _,
            } => {
                let request = PermissionRequest {
                    request_id,
                    tool,
                    path,
                    description,
                    always_allow_pattern,
                    resolved: false,
                };
                self.negotiator.open_permission(request, &mut self.surface);
            }
            AgentEvent::PermissionDecision {
                request_id,
                approved,
            } => {
                if let Some(request_id) = request_id {
                    self.negotiator
                        .decision_received(&request_id, approved, &mut self.surface);
                }
            }
            AgentEvent::UserQuestion {
                request_id,
                questions,
            } => {
                self.negotiator
                    .open_question(&request_id, questions, &mut self.surface);
            }
            AgentEvent::Cancelled { message } => {
                return Some(self.finish_cancelled(&message));
            }
            AgentEvent::SessionCompacting { message } => {
                self.surface.notice(NoticeKind::Compacting, &message);
            }
            AgentEvent::SessionCompacted { message } => {
                self.surface.notice(NoticeKind::Compacted, &message);
            }
            AgentEvent::SessionReset { message } => {
                self.surface.notice(NoticeKind::SessionReset, &message);
            }
            AgentEvent::Error { message } => {
                warn!(error = %message, "agent error event");
                self.surface.notice(NoticeKind::Error, &message);
                self.last_error = Some(message);
                // A running tool or an open negotiation can stay silent for
                // long stretches; the error alone is not a sign the agent died.
                self.error_deadline = if self.agent_busy() {
                    None
                } else {
                    self.error_idle_timeout.map(|timeout| now + timeout)
                };
            }
            AgentEvent::Done { exit_code } => {
                return Some(self.finish_done(exit_code));
            }
            AgentEvent::Unknown => {}
        }
        None
    }

    /// The byte stream ended without a terminal event.
    pub fn stream_ended(&mut self) -> Completion {
        debug!("stream ended without terminal event");
        self.finish_done(None)
    }

    /// Submit or read failure.
    pub fn transport_failed(&mut self, err: &GatekeepError) -> Completion {
        let message = format!("Connection error: {err}");
        self.surface.notice(NoticeKind::Error, &message);
        self.finish_error(&message)
    }

    fn key(&self, index: u32) -> BlockKey {
        BlockKey::new(self.segment, index)
    }

    fn finish_result(&mut self, result: &str, is_error: bool) -> Completion {
        self.settle();
        let prose = self.assembler.prose_text();
        self.assembler.remove_prose(&mut self.surface);
        // What the user watched stream wins; `result` covers turns that
        // streamed no prose.
        let text = if prose.is_empty() {
            result.trim().to_string()
        } else {
            prose
        };
        let banner = is_error.then(|| Banner::Error(RESULT_ERROR_BANNER.to_string()));
        self.render_final(TurnOutcome::Result, text.clone(), banner);
        self.complete(TurnOutcome::Result, Some(text))
    }

    fn finish_cancelled(&mut self, message: &str) -> Completion {
        self.settle();
        let partial = self.assembler.prose_text();
        self.assembler.remove_prose(&mut self.surface);
        let label = if message.trim().is_empty() {
            "Cancelled"
        } else {
            message
        };
        self.render_final(
            TurnOutcome::Cancelled,
            partial.clone(),
            Some(Banner::Cancelled(label.to_string())),
        );
        let persist = if partial.is_empty() {
            CANCELLED_PLACEHOLDER.to_string()
        } else {
            partial
        };
        self.complete(TurnOutcome::Cancelled, Some(persist))
    }

    fn finish_done(&mut self, exit_code: Option<i32>) -> Completion {
        self.settle();
        let text = self.assembler.prose_text();
        self.assembler.remove_prose(&mut self.surface);
        let banner = match exit_code {
            Some(0) if text.is_empty() => Some(Banner::Success(SUCCESS_BANNER.to_string())),
            Some(0) => None,
            Some(code) => Some(Banner::Warning(format!("Agent exited with code {code}"))),
            None => Some(Banner::Warning(
                "Agent stream ended without a result".to_string(),
            )),
        };
        let persist = match (&banner, text.is_empty()) {
            (_, false) => Some(text.clone()),
            (Some(Banner::Success(msg) | Banner::Warning(msg)), true) => Some(msg.clone()),
            _ => None,
        };
        self.render_final(TurnOutcome::DoneNoResult, text, banner);
        self.complete(TurnOutcome::DoneNoResult, persist)
    }

    fn finish_error(&mut self, message: &str) -> Completion {
        self.settle();
        let text = self.assembler.prose_text();
        self.assembler.remove_prose(&mut self.surface);
        let persist = if text.is_empty() {
            format!("Error: {message}")
        } else {
            text.clone()
        };
        self.render_final(
            TurnOutcome::ErrorTerminal,
            text,
            Some(Banner::Error(message.to_string())),
        );
        self.complete(TurnOutcome::ErrorTerminal, Some(persist))
    }

    /// Flush pending renders, close open blocks, group trailing compact
    /// cards.
    fn settle(&mut self) {
        self.assembler.finalize_all(&mut self.surface);
        self.tools.group_trailing(&mut self.surface);
    }

    fn render_final(&mut self, outcome: TurnOutcome, text: String, banner: Option<Banner>) {
        self.surface.final_answer(&FinalAnswer {
            outcome,
            text,
            banner,
        });
    }

    fn complete(&mut self, outcome: TurnOutcome, persist: Option<String>) -> Completion {
        self.terminal = Some(outcome);
        self.error_deadline = None;
        let open = self.negotiator.open_ids();
        if !open.is_empty() {
            warn!(?open, "turn ended with unresolved negotiations");
        }
        Completion {
            outcome,
            persist: persist.filter(|text| !text.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{RecordingRenderer, RenderOp};
    use crate::stream::parse_line;
    use crate::test_support::ScriptedService;
    use serde_json::{json, Value};

    fn turn(config: &EngineConfig) -> (Turn, Arc<RecordingRenderer>) {
        let recorder = Arc::new(RecordingRenderer::new());
        let turn = Turn::new(
            "c1",
            config,
            Arc::new(ScriptedService::new()),
            recorder.clone(),
            recorder.clone(),
        );
        (turn, recorder)
    }

    fn frame(value: Value) -> Frame {
        parse_line(&format!("data: {value}"), "data: ").unwrap()
    }

    fn feed(turn: &mut Turn, events: Vec<Value>) -> Option<Completion> {
        let now = Instant::now();
        events
            .into_iter()
            .find_map(|event| turn.handle(frame(event), now))
    }

    #[test]
    fn done_after_result_is_ignored() {
        let config = EngineConfig::default();
        let (mut turn, recorder) = turn(&config);
        let completion = feed(
            &mut turn,
            vec![
                json!({"type": "result", "result": "Done"}),
                json!({"type": "done", "exit_code": 0}),
            ],
        )
        .unwrap();
        assert_eq!(completion.outcome, TurnOutcome::Result);
        assert!(turn
            .handle(frame(json!({"type": "done", "exit_code": 0})), Instant::now())
            .is_none());
        assert_eq!(recorder.final_answers().len(), 1);
    }

    #[test]
    fn result_text_falls_back_to_streamed_prose() {
        let config = EngineConfig::default();
        let (mut turn, recorder) = turn(&config);
        let completion = feed(
            &mut turn,
            vec![
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text"}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "All good"}}),
                json!({"type": "result", "result": ""}),
            ],
        )
        .unwrap();
        assert_eq!(completion.persist.as_deref(), Some("All good"));
        assert!(recorder
            .ops()
            .iter()
            .any(|op| matches!(op, RenderOp::BlockRemoved(_))));
    }

    #[test]
    fn result_payload_used_when_nothing_streamed() {
        let config = EngineConfig::default();
        let (mut turn, recorder) = turn(&config);
        let completion = feed(&mut turn, vec![json!({"type": "result", "result": "Done"})]).unwrap();
        assert_eq!(completion.persist.as_deref(), Some("Done"));
        assert_eq!(recorder.final_answers()[0].text, "Done");
    }

    #[test]
    fn done_without_text_gets_success_banner() {
        let config = EngineConfig::default();
        let (mut turn, recorder) = turn(&config);
        let completion = feed(&mut turn, vec![json!({"type": "done", "exit_code": 0})]).unwrap();
        assert_eq!(completion.outcome, TurnOutcome::DoneNoResult);
        assert_eq!(
            recorder.final_answers()[0].banner,
            Some(Banner::Success(SUCCESS_BANNER.into()))
        );
    }

    #[test]
    fn failed_exit_gets_warning_banner() {
        let config = EngineConfig::default();
        let (mut turn, recorder) = turn(&config);
        feed(
            &mut turn,
            vec![
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "partial"}}),
                json!({"type": "done", "exit_code": 1}),
            ],
        )
        .unwrap();
        let answer = &recorder.final_answers()[0];
        assert_eq!(answer.text, "partial");
        assert!(matches!(answer.banner, Some(Banner::Warning(_))));
    }

    #[test]
    fn cancelled_without_text_persists_placeholder() {
        let config = EngineConfig::default();
        let (mut turn, _) = turn(&config);
        let completion = feed(
            &mut turn,
            vec![json!({"type": "cancelled", "message": "Stopped"})],
        )
        .unwrap();
        assert_eq!(completion.outcome, TurnOutcome::Cancelled);
        assert_eq!(completion.persist.as_deref(), Some(CANCELLED_PLACEHOLDER));
    }

    #[test]
    fn lone_error_is_not_terminal_until_idle_timeout() {
        let config = EngineConfig {
            error_idle_timeout: Some(Duration::from_secs(30)),
            ..EngineConfig::default()
        };
        let (mut turn, _) = turn(&config);
        let start = Instant::now();
        assert!(turn
            .handle(frame(json!({"type": "error", "message": "rate limited"})), start)
            .is_none());
        assert_eq!(turn.next_deadline(), Some(start + Duration::from_secs(30)));
        assert!(turn.on_tick(start + Duration::from_secs(29)).is_none());

        let completion = turn.on_tick(start + Duration::from_secs(30)).unwrap();
        assert_eq!(completion.outcome, TurnOutcome::ErrorTerminal);
    }

    #[test]
    fn any_event_after_error_disarms_timeout() {
        let config = EngineConfig::default();
        let (mut turn, _) = turn(&config);
        let now = Instant::now();
        turn.handle(frame(json!({"type": "error", "message": "transient"})), now);
        turn.handle(frame(json!({"type": "status", "message": "retrying"})), now);
        assert_eq!(turn.next_deadline(), None);
    }

    #[test]
    fn disabled_timeout_keeps_error_turn_running() {
        let config = EngineConfig {
            error_idle_timeout: None,
            ..EngineConfig::default()
        };
        let (mut turn, _) = turn(&config);
        let now = Instant::now();
        turn.handle(frame(json!({"type": "error", "message": "x"})), now);
        assert_eq!(turn.next_deadline(), None);
        assert!(turn.on_tick(now + Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn stderr_error_during_running_tool_keeps_turn_alive() {
        let config = EngineConfig {
            error_idle_timeout: Some(Duration::from_secs(30)),
            ..EngineConfig::default()
        };
        let (mut turn, _) = turn(&config);
        let start = Instant::now();
        feed(
            &mut turn,
            vec![json!({"type": "assistant", "message": {"content": [{"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "cargo test"}}]}})],
        );
        turn.handle(frame(json!({"type": "error", "message": "warning on stderr"})), start);
        assert_eq!(turn.next_deadline(), None);
        assert!(turn.on_tick(start + Duration::from_secs(31)).is_none());

        let later = start + Duration::from_secs(40);
        turn.handle(
            frame(json!({"type": "user", "message": {"content": [{"type": "tool_result", "tool_use_id": "t1", "content": "ok"}]}})),
            later,
        );
        let completion = turn
            .handle(frame(json!({"type": "result", "result": "All tests pass"})), later)
            .unwrap();
        assert_eq!(completion.outcome, TurnOutcome::Result);
        assert_eq!(completion.persist.as_deref(), Some("All tests pass"));
    }

    #[test]
    fn message_start_separates_block_indices() {
        let config = EngineConfig {
            delta_debounce: Duration::ZERO,
            ..EngineConfig::default()
        };
        let (mut turn, recorder) = turn(&config);
        feed(
            &mut turn,
            vec![
                json!({"type": "stream_event", "event": {"type": "message_start", "message": {}}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "first"}}),
                json!({"type": "content_block_stop", "index": 0}),
                json!({"type": "stream_event", "event": {"type": "message_start", "message": {}}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "second"}}),
            ],
        );
        let opened = recorder
            .ops()
            .iter()
            .filter(|op| matches!(op, RenderOp::BlockOpened(..)))
            .count();
        assert_eq!(opened, 2);
    }

    #[test]
    fn tool_lifecycle_through_events() {
        let config = EngineConfig::default();
        let (mut turn, recorder) = turn(&config);
        feed(
            &mut turn,
            vec![
                json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "t1", "name": "mcp__approval-gate__Bash"}}),
                json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"command\":\"ls\"}"}}),
                json!({"type": "content_block_stop", "index": 1}),
                json!({"type": "assistant", "message": {"content": [{"type": "tool_use", "id": "t1", "name": "mcp__approval-gate__Bash", "input": {"command": "ls"}}]}}),
                json!({"type": "user", "message": {"content": [{"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "a.rs"}]}]}}),
            ],
        );
        let resolved: Vec<_> = recorder
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                RenderOp::ToolResolved(tool) => Some(tool),
                _ => None,
            })
            .collect();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "Bash");
        assert_eq!(resolved[0].input_summary, "ls");
        assert_eq!(resolved[0].result_text.as_deref(), Some("a.rs"));
    }

    #[test]
    fn malformed_line_appends_to_prose() {
        let config = EngineConfig::default();
        let (mut turn, _) = turn(&config);
        let now = Instant::now();
        turn.handle(Frame::RawText("plain output".into()), now);
        let completion = turn
            .handle(frame(json!({"type": "done", "exit_code": 0})), now)
            .unwrap();
        assert_eq!(completion.persist.as_deref(), Some("plain output"));
    }
}
