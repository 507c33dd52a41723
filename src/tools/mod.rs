//! Tool invocation tracking: tiers, input summaries, progress list, grouping.

mod summary;
mod tracker;

pub use summary::{summarize_input, tool_result_text, SUMMARY_MAX_CHARS};
pub use tracker::ToolTracker;

use crate::types::ToolTier;

/// Tool whose calls update the progress widget instead of opening a card.
pub const PROGRESS_TOOL: &str = "TodoWrite";

/// Read-only / informational tools rendered as compact cards.
const COMPACT_TOOLS: &[&str] = &[
    "LS",
    "Read",
    "Grep",
    "Glob",
    "WebFetch",
    "WebSearch",
    "ListMcpResourcesTool",
    "ReadMcpResourceTool",
];

const SHELL_TOOLS: &[&str] = &["Bash", "BashOutput", "KillShell"];

const MCP_PREFIX: &str = "mcp__";

/// Strip an MCP proxy prefix: `mcp__approval-gate__Bash` -> `Bash`.
pub fn normalize_tool_name(name: &str) -> &str {
    match name.strip_prefix(MCP_PREFIX) {
        Some(rest) => rest.split_once("__").map(|(_, tool)| tool).unwrap_or(rest),
        None => name,
    }
}

pub fn tool_tier(name: &str) -> ToolTier {
    if COMPACT_TOOLS.contains(&normalize_tool_name(name)) {
        ToolTier::Compact
    } else {
        ToolTier::Normal
    }
}

pub fn is_shell_tool(name: &str) -> bool {
    SHELL_TOOLS.contains(&normalize_tool_name(name))
}

pub fn is_progress_tool(name: &str) -> bool {
    normalize_tool_name(name) == PROGRESS_TOOL
}
