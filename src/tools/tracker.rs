use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{is_progress_tool, normalize_tool_name, summarize_input, tool_result_text, tool_tier};
use crate::render::{Surface, ToolGroup};
use crate::types::{BlockKey, ProgressItem, ProgressStatus, ToolInvocation, ToolStatus, ToolTier};

/// Placeholder summary of a card opened before its input is known.
const STUB_SUMMARY: &str = "…";

/// Minimum trailing run of compact cards that gets collapsed.
const GROUP_MIN_RUN: usize = 3;

#[derive(Debug, Deserialize)]
struct ProgressWire {
    #[serde(default)]
    content: String,
    #[serde(default)]
    status: String,
    #[serde(default, rename = "activeForm", alias = "active_form")]
    active_form: Option<String>,
}

impl From<ProgressWire> for ProgressItem {
    fn from(wire: ProgressWire) -> Self {
        Self {
            content: wire.content,
            status: wire.status.parse().unwrap_or(ProgressStatus::Pending),
            active_form: wire.active_form,
        }
    }
}

/// Per-turn tool state.
#[derive(Debug, Default)]
pub struct ToolTracker {
    tools: Vec<ToolInvocation>,
    by_key: HashMap<BlockKey, String>,
    partial_input: HashMap<String, String>,
    progress: Vec<ProgressItem>,
    progress_open: bool,
    progress_ids: HashSet<String>,
    next_group: u32,
}

impl ToolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invocations in first-seen order.
    pub fn tools(&self) -> &[ToolInvocation] {
        &self.tools
    }

    pub fn tool(&self, id: &str) -> Option<&ToolInvocation> {
        self.tools.iter().find(|t| t.id == id)
    }

    pub fn progress(&self) -> &[ProgressItem] {
        &self.progress
    }

    /// True while some invocation has not seen its result yet.
    pub fn has_pending(&self) -> bool {
        self.tools.iter().any(|t| t.status == ToolStatus::Pending)
    }

    pub fn owns_block(&self, key: BlockKey) -> bool {
        self.by_key.contains_key(&key)
    }

    /// Early signal from a tool block start. Opens a stub card.
    pub fn start(&mut self, key: BlockKey, id: Option<&str>, name: &str, surface: &mut Surface) {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.by_key.insert(key, id.clone());

        if is_progress_tool(name) {
            self.progress_ids.insert(id);
            return;
        }
        if self.tool(&id).is_some() {
            return;
        }

        let tier = tool_tier(name);
        if tier == ToolTier::Normal {
            self.group_trailing(surface);
        }
        let tool = ToolInvocation {
            id,
            name: normalize_tool_name(name).to_string(),
            tier,
            input_summary: STUB_SUMMARY.to_string(),
            input_json: Value::Null,
            status: ToolStatus::Pending,
            result_text: None,
            input_recap: None,
            stub: true,
        };
        surface.open_tool(&tool);
        self.tools.push(tool);
    }

    /// Accumulate streamed partial input for the tool at `key`.
    pub fn input_delta(&mut self, key: BlockKey, fragment: &str) {
        if let Some(id) = self.by_key.get(&key) {
            self.partial_input
                .entry(id.clone())
                .or_default()
                .push_str(fragment);
        }
    }

    /// Tool block finished streaming. Completes the stub from the
    /// accumulated input when it parses.
    pub fn stop(&mut self, key: BlockKey, surface: &mut Surface) {
        let Some(id) = self.by_key.get(&key).cloned() else {
            return;
        };
        let Some(raw) = self.partial_input.remove(&id) else {
            return;
        };
        let input = match serde_json::from_str::<Value>(&raw) {
            Ok(input) => input,
            Err(err) => {
                debug!(tool_id = %id, error = %err, "partial tool input did not parse");
                return;
            }
        };
        let name = match self.tool(&id) {
            Some(tool) => tool.name.clone(),
            None if self.progress_ids.contains(&id) => super::PROGRESS_TOOL.to_string(),
            None => return,
        };
        self.complete(&id, &name, input, surface);
    }

    /// Full input is known (from the assistant message or a finished
    /// stream). Updates a stub in place or opens a new card.
    pub fn complete(&mut self, id: &str, name: &str, input: Value, surface: &mut Surface) {
        if is_progress_tool(name) || self.progress_ids.contains(id) {
            self.progress_ids.insert(id.to_string());
            self.update_progress(&input, surface);
            return;
        }

        let summary = summarize_input(name, &input);
        if let Some(tool) = self.tools.iter_mut().find(|t| t.id == id) {
            if !tool.stub && tool.input_json == input {
                return;
            }
            tool.input_summary = summary;
            tool.input_json = input;
            tool.stub = false;
            surface.update_tool(tool);
            return;
        }

        let tier = tool_tier(name);
        if tier == ToolTier::Normal {
            self.group_trailing(surface);
        }
        let tool = ToolInvocation {
            id: id.to_string(),
            name: normalize_tool_name(name).to_string(),
            tier,
            input_summary: summary,
            input_json: input,
            status: ToolStatus::Pending,
            result_text: None,
            input_recap: None,
            stub: false,
        };
        surface.open_tool(&tool);
        self.tools.push(tool);
    }

    /// Correlate a tool result with its invocation.
    pub fn resolve(&mut self, tool_use_id: &str, content: &Value, is_error: bool, surface: &mut Surface) {
        if self.progress_ids.contains(tool_use_id) {
            return;
        }
        let Some(tool) = self.tools.iter_mut().find(|t| t.id == tool_use_id) else {
            debug!(tool_use_id, "result for unknown tool call");
            return;
        };
        tool.status = if is_error {
            ToolStatus::ResolvedError
        } else {
            ToolStatus::ResolvedOk
        };
        tool.result_text = Some(tool_result_text(content));
        tool.input_recap = serde_json::to_string_pretty(&tool.input_json).ok();
        surface.resolve_tool(tool);
    }

    /// Collapse the trailing run of compact cards when it is long enough.
    pub fn group_trailing(&mut self, surface: &mut Surface) {
        let run = surface.layout().trailing_tools(|id| {
            self.tool(id)
                .map(|t| t.tier == ToolTier::Compact)
                .unwrap_or(false)
        });
        if run.len() < GROUP_MIN_RUN {
            return;
        }
        let group = ToolGroup {
            id: self.next_group,
            label: self.group_label(&run),
            tool_ids: run,
        };
        self.next_group += 1;
        surface.group_tools(&group);
    }

    fn group_label(&self, ids: &[String]) -> String {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for tool in ids.iter().filter_map(|id| self.tool(id)) {
            match counts.iter_mut().find(|(name, _)| *name == tool.name) {
                Some((_, count)) => *count += 1,
                None => counts.push((tool.name.as_str(), 1)),
            }
        }
        counts
            .iter()
            .map(|(name, count)| format!("{name} ×{count}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn update_progress(&mut self, input: &Value, surface: &mut Surface) {
        let Some(todos) = input.get("todos").cloned() else {
            return;
        };
        let items: Vec<ProgressItem> = match serde_json::from_value::<Vec<ProgressWire>>(todos) {
            Ok(items) => items.into_iter().map(Into::into).collect(),
            Err(err) => {
                warn!(error = %err, "malformed progress list");
                return;
            }
        };
        self.progress = items;
        if self.progress_open {
            surface.update_progress(&self.progress);
        } else {
            self.progress_open = true;
            surface.open_progress(&self.progress);
        }
    }
}
