//! Permission and question negotiation types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A single tool/path action awaiting allow/deny.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub request_id: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When present, the card offers "always allow" for this pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_allow_pattern: Option<String>,
    pub resolved: bool,
}

/// The user's choice on a permission card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PermissionChoice {
    AllowOnce,
    Deny,
    AlwaysAllow,
}

/// Decision sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ApprovalDecision {
    Allow,
    Deny,
}

impl From<PermissionChoice> for ApprovalDecision {
    fn from(choice: PermissionChoice) -> Self {
        match choice {
            PermissionChoice::AllowOnce | PermissionChoice::AlwaysAllow => Self::Allow,
            PermissionChoice::Deny => Self::Deny,
        }
    }
}

/// How an always-allow rule matches future calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchType {
    /// Base command name of a shell invocation.
    Prefix,
    /// File path glob.
    Glob,
}

impl MatchType {
    /// Shell-style tools match by command prefix, everything else by path glob.
    pub fn for_tool(tool: &str) -> Self {
        if crate::tools::is_shell_tool(tool) {
            Self::Prefix
        } else {
            Self::Glob
        }
    }
}

/// Action of a persisted rule. Rules created from a card are always `Allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

/// Persistent permission rule created by "always allow".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlwaysAllowRule {
    pub tool: String,
    pub match_type: MatchType,
    pub pattern: String,
    pub action: RuleAction,
}

impl AlwaysAllowRule {
    pub fn new(tool: impl Into<String>, pattern: impl Into<String>) -> Self {
        let tool = tool.into();
        Self {
            match_type: MatchType::for_tool(&tool),
            tool,
            pattern: pattern.into(),
            action: RuleAction::Allow,
        }
    }
}

/// A fixed answer choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OptionWire")]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OptionWire {
    Label(String),
    Full {
        label: String,
        #[serde(default)]
        description: Option<String>,
    },
}

impl From<OptionWire> for QuestionOption {
    fn from(wire: OptionWire) -> Self {
        match wire {
            OptionWire::Label(label) => Self {
                label,
                description: None,
            },
            OptionWire::Full { label, description } => Self { label, description },
        }
    }
}

/// One question of a negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "question", alias = "text")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

/// A question negotiation and its in-progress answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionNegotiation {
    pub request_id: String,
    pub questions: Vec<Question>,
    /// Option picked per question (by position).
    pub selected: Vec<Option<usize>>,
    /// Free text typed per question; overrides the selected option.
    pub free_text: Vec<String>,
    /// Aggregated answers, filled on submission.
    pub answers: BTreeMap<String, String>,
    pub resolved: bool,
}

impl QuestionNegotiation {
    pub fn new(request_id: impl Into<String>, questions: Vec<Question>) -> Self {
        let count = questions.len();
        Self {
            request_id: request_id.into(),
            questions,
            selected: vec![None; count],
            free_text: vec![String::new(); count],
            answers: BTreeMap::new(),
            resolved: false,
        }
    }

    /// Answer for one question: typed text wins over the picked option.
    pub fn answer_for(&self, question: usize) -> String {
        let typed = self
            .free_text
            .get(question)
            .map(|t| t.trim())
            .unwrap_or_default();
        if !typed.is_empty() {
            return typed.to_string();
        }
        self.selected
            .get(question)
            .copied()
            .flatten()
            .and_then(|opt| self.questions.get(question)?.options.get(opt))
            .map(|opt| opt.label.clone())
            .unwrap_or_default()
    }

    /// `question-text -> answer` for every question.
    pub fn collect_answers(&self) -> BTreeMap<String, String> {
        self.questions
            .iter()
            .enumerate()
            .map(|(idx, q)| (q.text.clone(), self.answer_for(idx)))
            .collect()
    }
}
