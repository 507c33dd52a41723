use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use gatekeep::render::{RecordingRenderer, RenderOp, Surface};
use gatekeep::tools::{summarize_input, tool_result_text, ToolTracker};

#[test]
fn summaries_for_known_and_unknown_tools() {
    assert_eq!(summarize_input("Bash", &json!({"command": "ls -la"})), "ls -la");
    assert_eq!(
        summarize_input("Grep", &json!({"pattern": "foo", "path": "/x"})),
        "foo in /x"
    );
    assert_eq!(
        summarize_input("mcp__approval-gate__Read", &json!({"file_path": "/src/main.rs"})),
        "/src/main.rs"
    );
    assert_eq!(
        summarize_input("Custom", &json!({"a": "b", "c": "d"})),
        r#"a="b" c="d""#
    );
}

#[test]
fn long_descriptions_of_unknown_tools_are_truncated() {
    let description = "word ".repeat(100);
    let summary = summarize_input("Task", &json!({ "description": description, "depth": 2 }));
    assert_eq!(summary.chars().count(), gatekeep::tools::SUMMARY_MAX_CHARS);
    assert!(summary.ends_with('…'));
}

#[test]
fn result_text_joins_text_parts() {
    let content = json!([
        {"type": "text", "text": "line one"},
        {"type": "text", "text": "line two"},
    ]);
    assert_eq!(tool_result_text(&content), "line one\nline two");
    assert_eq!(tool_result_text(&json!("plain")), "plain");
}

fn tracker() -> (ToolTracker, Surface, Arc<RecordingRenderer>) {
    let recorder = Arc::new(RecordingRenderer::new());
    (ToolTracker::new(), Surface::new(recorder.clone()), recorder)
}

fn groups(recorder: &RecordingRenderer) -> Vec<gatekeep::render::ToolGroup> {
    recorder
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            RenderOp::ToolsGrouped(group) => Some(group),
            _ => None,
        })
        .collect()
}

#[test]
fn four_compact_cards_collapse_before_a_normal_card() {
    let (mut tools, mut surface, recorder) = tracker();
    tools.complete("t1", "Read", json!({"file_path": "/a"}), &mut surface);
    tools.complete("t2", "Read", json!({"file_path": "/b"}), &mut surface);
    tools.complete("t3", "Grep", json!({"pattern": "fn", "path": "/"}), &mut surface);
    tools.complete("t4", "Glob", json!({"pattern": "*.rs"}), &mut surface);
    tools.complete("t5", "Edit", json!({"file_path": "/a"}), &mut surface);

    let groups = groups(&recorder);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].tool_ids, vec!["t1", "t2", "t3", "t4"]);
    assert_eq!(groups[0].label, "Read ×2, Grep ×1, Glob ×1");
}

#[test]
fn two_compact_cards_are_never_grouped() {
    let (mut tools, mut surface, recorder) = tracker();
    tools.complete("t1", "Read", json!({"file_path": "/a"}), &mut surface);
    tools.complete("t2", "LS", json!({"path": "/"}), &mut surface);
    tools.complete("t3", "Bash", json!({"command": "cargo fmt"}), &mut surface);
    tools.group_trailing(&mut surface);

    assert!(groups(&recorder).is_empty());
}
