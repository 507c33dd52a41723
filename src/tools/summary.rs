use serde_json::Value;

use super::normalize_tool_name;

/// Cap for a single string field shown as the summary of an unknown tool.
pub const SUMMARY_MAX_CHARS: usize = 80;

/// Keys tried, in order, for tools without a dedicated rule.
const DESCRIPTIVE_KEYS: &[&str] = &[
    "command",
    "file_path",
    "path",
    "notebook_path",
    "url",
    "query",
    "pattern",
    "description",
    "prompt",
];

/// Reduce tool input to a one-line summary.
pub fn summarize_input(tool: &str, input: &Value) -> String {
    let tool = normalize_tool_name(tool);
    let field = |key: &str| input.get(key).and_then(Value::as_str).map(str::to_string);

    let summary = match tool {
        "Bash" => field("command"),
        "Read" | "Write" | "Edit" | "MultiEdit" => field("file_path"),
        "NotebookEdit" => field("notebook_path"),
        "LS" => field("path"),
        "Grep" | "Glob" => field("pattern").map(|pattern| match field("path") {
            Some(path) if !path.is_empty() => format!("{pattern} in {path}"),
            _ => pattern,
        }),
        "WebFetch" => field("url"),
        "WebSearch" => field("query"),
        _ => None,
    };

    summary.unwrap_or_else(|| summarize_unknown(input))
}

fn summarize_unknown(input: &Value) -> String {
    let Value::Object(map) = input else {
        return String::new();
    };

    if let Some(value) = DESCRIPTIVE_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
    {
        return truncate(&condense_whitespace(value), SUMMARY_MAX_CHARS);
    }

    let strings: Vec<(&String, &str)> = map
        .iter()
        .filter_map(|(key, value)| value.as_str().map(|s| (key, s)))
        .collect();
    if let [(_, only)] = strings.as_slice() {
        return truncate(&condense_whitespace(only), SUMMARY_MAX_CHARS);
    }

    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys.into_iter()
        .take(2)
        .map(|key| format!("{key}={}", compact_json(&map[key])))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Display text of a tool result: strings as-is, text parts joined,
/// anything else pretty-printed.
pub fn tool_result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(parts) if parts.iter().all(is_text_part) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

fn is_text_part(part: &Value) -> bool {
    part.get("type").and_then(Value::as_str) == Some("text")
}

fn compact_json(value: &Value) -> String {
    let raw = serde_json::to_string(value).unwrap_or_default();
    truncate(&raw, SUMMARY_MAX_CHARS)
}

fn condense_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
