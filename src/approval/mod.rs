//! Permission and question negotiations raised mid-turn.
//!
//! User actions update the card immediately and send their single upstream
//! call from a spawned task, so a slow or failing server never blocks the
//! event loop or leaves a card clickable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{GatekeepError, Result};
use crate::render::{SessionHost, Surface};
use crate::service::AgentService;
use crate::types::{
    AlwaysAllowRule, ApprovalDecision, PermissionChoice, PermissionRequest, Question,
    QuestionNegotiation,
};

pub struct ApprovalNegotiator {
    chat_id: String,
    service: Arc<dyn AgentService>,
    host: Arc<dyn SessionHost>,
    permissions: HashMap<String, PermissionRequest>,
    questions: HashMap<String, QuestionNegotiation>,
    auto_submit: HashMap<String, Instant>,
    auto_submit_delay: Duration,
}

impl ApprovalNegotiator {
    pub fn new(
        chat_id: impl Into<String>,
        service: Arc<dyn AgentService>,
        host: Arc<dyn SessionHost>,
        auto_submit_delay: Duration,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            service,
            host,
            permissions: HashMap::new(),
            questions: HashMap::new(),
            auto_submit: HashMap::new(),
            auto_submit_delay,
        }
    }

    pub fn permission(&self, request_id: &str) -> Option<&PermissionRequest> {
        self.permissions.get(request_id)
    }

    pub fn question(&self, request_id: &str) -> Option<&QuestionNegotiation> {
        self.questions.get(request_id)
    }

    /// Request ids still waiting for a user decision.
    pub fn open_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .permissions
            .values()
            .filter(|p| !p.resolved)
            .map(|p| p.request_id.clone())
            .chain(
                self.questions
                    .values()
                    .filter(|q| !q.resolved)
                    .map(|q| q.request_id.clone()),
            )
            .collect();
        ids.sort();
        ids
    }

    pub fn open_permission(&mut self, request: PermissionRequest, surface: &mut Surface) {
        if self.permissions.contains_key(&request.request_id) {
            debug!(request_id = %request.request_id, "duplicate permission request");
            return;
        }
        info!(request_id = %request.request_id, tool = %request.tool, "permission requested");
        surface.open_permission(&request);
        self.permissions.insert(request.request_id.clone(), request);
        self.host.needs_attention(&self.chat_id);
    }

    /// Resolve a permission card from a user action.
    ///
    /// The card goes read-only before the returned task sends anything.
    pub fn decide(
        &mut self,
        request_id: &str,
        choice: PermissionChoice,
        surface: &mut Surface,
    ) -> Result<JoinHandle<()>> {
        let request = self
            .permissions
            .get_mut(request_id)
            .ok_or_else(|| GatekeepError::UnknownNegotiation(request_id.to_string()))?;
        if request.resolved {
            return Err(GatekeepError::AlreadyResolved(request_id.to_string()));
        }
        let rule = match choice {
            PermissionChoice::AlwaysAllow => {
                let pattern = request.always_allow_pattern.clone().ok_or_else(|| {
                    GatekeepError::InvalidState(format!(
                        "permission {request_id} does not offer always-allow"
                    ))
                })?;
                Some(AlwaysAllowRule::new(request.tool.clone(), pattern))
            }
            _ => None,
        };

        request.resolved = true;
        let decision = ApprovalDecision::from(choice);
        surface.resolve_permission(request_id, Some(decision));

        let service = self.service.clone();
        let request_id = request_id.to_string();
        Ok(tokio::spawn(async move {
            if let Some(rule) = rule {
                if let Err(err) = service.create_always_allow_rule(&rule).await {
                    warn!(request_id = %request_id, error = %err, "failed to persist always-allow rule");
                }
            }
            if let Err(err) = service.decide_approval(&request_id, decision).await {
                warn!(request_id = %request_id, error = %err, "failed to send approval decision");
            }
        }))
    }

    /// A decision made elsewhere (another client, an auto-approve rule).
    /// Marks the card resolved without sending anything.
    pub fn decision_received(&mut self, request_id: &str, approved: Option<bool>, surface: &mut Surface) {
        let Some(request) = self.permissions.get_mut(request_id) else {
            return;
        };
        if request.resolved {
            return;
        }
        request.resolved = true;
        let decision = approved.map(|ok| {
            if ok {
                ApprovalDecision::Allow
            } else {
                ApprovalDecision::Deny
            }
        });
        surface.resolve_permission(request_id, decision);
    }

    pub fn open_question(&mut self, request_id: &str, questions: Vec<Question>, surface: &mut Surface) {
        if self.questions.contains_key(request_id) {
            debug!(request_id, "duplicate question negotiation");
            return;
        }
        info!(request_id, count = questions.len(), "question asked");
        let negotiation = QuestionNegotiation::new(request_id, questions);
        surface.open_question(&negotiation);
        self.questions.insert(request_id.to_string(), negotiation);
        self.host.needs_attention(&self.chat_id);
    }

    /// Pick an option. Siblings are deselected; a lone question arms
    /// auto-submit.
    pub fn select_option(
        &mut self,
        request_id: &str,
        question: usize,
        option: usize,
        now: Instant,
        surface: &mut Surface,
    ) -> Result<()> {
        let negotiation = open_question_mut(&mut self.questions, request_id)?;
        let valid = negotiation
            .questions
            .get(question)
            .map(|q| option < q.options.len())
            .unwrap_or(false);
        if !valid {
            return Err(GatekeepError::InvalidState(format!(
                "no option {option} for question {question} of {request_id}"
            )));
        }
        negotiation.selected[question] = Some(option);
        surface.update_question(negotiation);
        if negotiation.questions.len() == 1 {
            self.auto_submit
                .insert(request_id.to_string(), now + self.auto_submit_delay);
        }
        Ok(())
    }

    /// Typed text overrides the picked option and cancels auto-submit.
    pub fn set_free_text(
        &mut self,
        request_id: &str,
        question: usize,
        text: &str,
        surface: &mut Surface,
    ) -> Result<()> {
        let negotiation = open_question_mut(&mut self.questions, request_id)?;
        let Some(slot) = negotiation.free_text.get_mut(question) else {
            return Err(GatekeepError::InvalidState(format!(
                "no question {question} in {request_id}"
            )));
        };
        *slot = text.to_string();
        surface.update_question(negotiation);
        self.auto_submit.remove(request_id);
        Ok(())
    }

    /// Aggregate answers and send them upstream once.
    pub fn submit_answers(&mut self, request_id: &str, surface: &mut Surface) -> Result<JoinHandle<()>> {
        let negotiation = open_question_mut(&mut self.questions, request_id)?;
        negotiation.answers = negotiation.collect_answers();
        negotiation.resolved = true;
        self.auto_submit.remove(request_id);
        surface.resolve_question(request_id, &negotiation.answers);

        let payload = serde_json::to_string(&negotiation.answers)?;
        let service = self.service.clone();
        let request_id = request_id.to_string();
        Ok(tokio::spawn(async move {
            if let Err(err) = service.answer_question(&request_id, &payload).await {
                warn!(request_id = %request_id, error = %err, "failed to send answers");
            }
        }))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.auto_submit.values().min().copied()
    }

    /// Fire every auto-submit whose delay has elapsed.
    pub fn poll_due(&mut self, now: Instant, surface: &mut Surface) -> Vec<JoinHandle<()>> {
        let due: Vec<String> = self
            .auto_submit
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due.into_iter()
            .filter_map(|id| match self.submit_answers(&id, surface) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    self.auto_submit.remove(&id);
                    debug!(request_id = %id, error = %err, "auto-submit skipped");
                    None
                }
            })
            .collect()
    }
}

fn open_question_mut<'a>(
    questions: &'a mut HashMap<String, QuestionNegotiation>,
    request_id: &str,
) -> Result<&'a mut QuestionNegotiation> {
    let negotiation = questions
        .get_mut(request_id)
        .ok_or_else(|| GatekeepError::UnknownNegotiation(request_id.to_string()))?;
    if negotiation.resolved {
        return Err(GatekeepError::AlreadyResolved(request_id.to_string()));
    }
    Ok(negotiation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{HostOp, RecordingRenderer, RenderOp};
    use crate::test_support::{Call, ScriptedService};
    use crate::types::{MatchType, QuestionOption, RuleAction};

    struct Fixture {
        negotiator: ApprovalNegotiator,
        surface: Surface,
        recorder: Arc<RecordingRenderer>,
        service: Arc<ScriptedService>,
    }

    fn fixture() -> Fixture {
        let recorder = Arc::new(RecordingRenderer::new());
        let service = Arc::new(ScriptedService::new());
        Fixture {
            negotiator: ApprovalNegotiator::new(
                "chat-1",
                service.clone(),
                recorder.clone(),
                Duration::from_millis(300),
            ),
            surface: Surface::new(recorder.clone()),
            recorder,
            service,
        }
    }

    fn bash_request(pattern: Option<&str>) -> PermissionRequest {
        PermissionRequest {
            request_id: "r1".into(),
            tool: "Bash".into(),
            path: None,
            description: Some("git status".into()),
            always_allow_pattern: pattern.map(str::to_string),
            resolved: false,
        }
    }

    fn question(text: &str, options: &[&str]) -> Question {
        Question {
            text: text.into(),
            header: None,
            options: options
                .iter()
                .map(|label| QuestionOption {
                    label: label.to_string(),
                    description: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn allow_once_sends_exactly_one_decision() {
        let mut f = fixture();
        f.negotiator.open_permission(bash_request(None), &mut f.surface);
        assert_eq!(f.recorder.host_ops(), vec![HostOp::NeedsAttention("chat-1".into())]);

        let handle = f
            .negotiator
            .decide("r1", PermissionChoice::AllowOnce, &mut f.surface)
            .unwrap();
        assert!(f.negotiator.permission("r1").unwrap().resolved);
        handle.await.unwrap();

        let err = f
            .negotiator
            .decide("r1", PermissionChoice::Deny, &mut f.surface)
            .unwrap_err();
        assert!(matches!(err, GatekeepError::AlreadyResolved(_)));
        assert_eq!(
            f.service.calls(),
            vec![Call::Decide("r1".into(), ApprovalDecision::Allow)]
        );
    }

    #[tokio::test]
    async fn always_allow_persists_rule_before_deciding() {
        let mut f = fixture();
        f.negotiator.open_permission(bash_request(Some("git")), &mut f.surface);
        f.negotiator
            .decide("r1", PermissionChoice::AlwaysAllow, &mut f.surface)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            f.service.calls(),
            vec![
                Call::Rule(AlwaysAllowRule {
                    tool: "Bash".into(),
                    match_type: MatchType::Prefix,
                    pattern: "git".into(),
                    action: RuleAction::Allow,
                }),
                Call::Decide("r1".into(), ApprovalDecision::Allow),
            ]
        );
    }

    #[tokio::test]
    async fn card_is_read_only_even_when_the_call_fails() {
        let mut f = fixture();
        f.service.fail_outbound(true);
        f.negotiator.open_permission(bash_request(None), &mut f.surface);
        f.negotiator
            .decide("r1", PermissionChoice::Deny, &mut f.surface)
            .unwrap()
            .await
            .unwrap();
        assert!(f.negotiator.permission("r1").unwrap().resolved);
        assert!(f.recorder.ops().contains(&RenderOp::PermissionResolved(
            "r1".into(),
            Some(ApprovalDecision::Deny)
        )));
    }

    #[tokio::test]
    async fn external_decision_resolves_without_outbound_call() {
        let mut f = fixture();
        f.negotiator.open_permission(bash_request(None), &mut f.surface);
        f.negotiator.decision_received("r1", Some(true), &mut f.surface);
        assert!(f.negotiator.open_ids().is_empty());
        assert!(f.service.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_request_is_rejected() {
        let mut f = fixture();
        let err = f
            .negotiator
            .decide("nope", PermissionChoice::AllowOnce, &mut f.surface)
            .unwrap_err();
        assert!(matches!(err, GatekeepError::UnknownNegotiation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn single_question_auto_submits_after_delay() {
        let mut f = fixture();
        f.negotiator
            .open_question("q1", vec![question("Which db?", &["sqlite", "postgres"])], &mut f.surface);
        let now = Instant::now();
        f.negotiator
            .select_option("q1", 0, 0, now, &mut f.surface)
            .unwrap();
        f.negotiator
            .select_option("q1", 0, 1, now, &mut f.surface)
            .unwrap();
        assert_eq!(f.negotiator.question("q1").unwrap().selected, vec![Some(1)]);

        assert!(f
            .negotiator
            .poll_due(now + Duration::from_millis(299), &mut f.surface)
            .is_empty());
        let handles = f
            .negotiator
            .poll_due(now + Duration::from_millis(300), &mut f.surface);
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(
            f.service.calls(),
            vec![Call::Answer("q1".into(), r#"{"Which db?":"postgres"}"#.into())]
        );
        assert_eq!(f.negotiator.next_deadline(), None);
    }

    #[tokio::test]
    async fn free_text_overrides_and_cancels_auto_submit() {
        let mut f = fixture();
        f.negotiator
            .open_question("q1", vec![question("Name?", &["a"])], &mut f.surface);
        let now = Instant::now();
        f.negotiator
            .select_option("q1", 0, 0, now, &mut f.surface)
            .unwrap();
        f.negotiator
            .set_free_text("q1", 0, "custom", &mut f.surface)
            .unwrap();
        assert_eq!(f.negotiator.next_deadline(), None);

        f.negotiator
            .submit_answers("q1", &mut f.surface)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(
            f.service.calls(),
            vec![Call::Answer("q1".into(), r#"{"Name?":"custom"}"#.into())]
        );
        assert!(matches!(
            f.negotiator.submit_answers("q1", &mut f.surface),
            Err(GatekeepError::AlreadyResolved(_))
        ));
    }

    #[tokio::test]
    async fn multiple_questions_do_not_auto_submit() {
        let mut f = fixture();
        f.negotiator.open_question(
            "q1",
            vec![question("A?", &["x"]), question("B?", &["y"])],
            &mut f.surface,
        );
        f.negotiator
            .select_option("q1", 0, 0, Instant::now(), &mut f.surface)
            .unwrap();
        assert_eq!(f.negotiator.next_deadline(), None);

        f.negotiator
            .submit_answers("q1", &mut f.surface)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(
            f.service.calls(),
            vec![Call::Answer("q1".into(), r#"{"A?":"x","B?":""}"#.into())]
        );
    }
}
