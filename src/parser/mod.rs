//! Transcript parser: pure functions turning JSONL transcript text into an
//! [`AgentActivity`].
//!
//! Nothing here holds state or touches the filesystem, so every function
//! is safe to call concurrently from any worker.  Malformed input is
//! skipped at the smallest granularity possible (one line, one field).

mod event;
pub mod timestamp;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::activity::{Action, AgentActivity, AgentKind, Status};

pub use event::{ContentItem, MessageBody, MessageContent, Role, ToolCall, TranscriptEvent};
pub use timestamp::parse_timestamp;

/// Default cap on retained actions.
pub const DEFAULT_MAX_ACTIONS: usize = 10;
/// Bound on distinct paths remembered per activity; oldest drop first.
pub const MAX_FILES_WORKED: usize = 200;
/// Display bound for an action's target.
pub const ACTION_TARGET_MAX: usize = 120;

/// Knobs for [`parse_content`].
#[derive(Debug, Clone)]
pub struct ParseOptions<'a> {
    /// Maximum actions extracted from this content, and retained overall.
    pub max_actions: usize,
    /// Kind recorded on a freshly created activity.
    pub agent_kind: AgentKind,
    /// Activity to fold the new lines onto (previous parse of the same
    /// file).  `None` means `content` is the whole transcript.
    pub previous: Option<&'a AgentActivity>,
    /// Used for `last_activity` when no message carries a timestamp.
    pub fallback_time: DateTime<Utc>,
}

impl Default for ParseOptions<'_> {
    fn default() -> Self {
        Self {
            max_actions: DEFAULT_MAX_ACTIONS,
            agent_kind: AgentKind::Openclaw,
            previous: None,
            fallback_time: Utc::now(),
        }
    }
}

/// Parse one line as JSON.  Blank or malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Parse one line into a [`TranscriptEvent`].  Valid JSON of an unknown
/// shape becomes [`TranscriptEvent::Unrecognized`].
pub fn parse_event(line: &str) -> Option<TranscriptEvent> {
    parse_line(line).map(|v| serde_json::from_value(v).unwrap_or(TranscriptEvent::Unrecognized))
}

/// Identifier derived from a transcript filename: the name without its
/// final extension (`abc.jsonl` -> `abc`, `run.retry.jsonl` -> `run.retry`).
pub fn session_id_from_filename(filename: &str) -> String {
    std::path::Path::new(filename)
        .file_stem()
        .and_then(|n| n.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(filename)
        .to_string()
}

/// Fold transcript `content` into an activity.
///
/// The returned value is always a new row: when `options.previous` is set
/// it is cloned and the new lines are applied on top, otherwise a fresh
/// row identified by `filename` is built.
pub fn parse_content(content: &str, filename: &str, options: &ParseOptions<'_>) -> AgentActivity {
    let id = session_id_from_filename(filename);
    let mut activity = match options.previous {
        Some(prev) => prev.clone(),
        None => AgentActivity::new(id, options.agent_kind, options.fallback_time),
    };

    let mut pending = activity.pending_tool_calls;
    let mut last_message: Option<MessageBody> = None;
    let mut latest: Option<DateTime<Utc>> = None;
    let mut new_actions: Vec<(Action, Vec<String>)> = Vec::new();

    for event in content.lines().filter_map(parse_event) {
        match event {
            TranscriptEvent::Session { id, cwd } => {
                if let Some(id) = id.filter(|s| !s.is_empty()) {
                    activity.session_id = id;
                }
                if let Some(cwd) = cwd.filter(|s| !s.is_empty()) {
                    activity.cwd = Some(cwd);
                }
            }
            TranscriptEvent::ModelChange { model_id } => {
                if let Some(model) = model_id.filter(|s| !s.is_empty()) {
                    activity.model = model;
                }
            }
            TranscriptEvent::Message { timestamp, message } => {
                let at = match timestamp.as_ref().or(message.timestamp.as_ref()) {
                    Some(raw) => parse_timestamp(Some(raw)),
                    None => options.fallback_time,
                };
                latest = Some(latest.map_or(at, |l| l.max(at)));

                match message.role {
                    Role::Assistant => {
                        for call in message.tool_calls() {
                            activity.tool_call_count += 1;
                            pending += 1;
                            if new_actions.len() >= options.max_actions {
                                continue;
                            }
                            let targets = extract_target(call.name, call.arguments);
                            let action = Action {
                                name: call.name.to_string(),
                                target: targets
                                    .first()
                                    .map(|t| truncate(t, ACTION_TARGET_MAX))
                                    .unwrap_or_default(),
                                timestamp: at,
                            };
                            new_actions.push((action, targets));
                        }
                    }
                    Role::ToolResult => pending = pending.saturating_sub(1),
                    Role::User => pending = 0,
                    Role::Other => {}
                }
                last_message = Some(message);
            }
            TranscriptEvent::Unrecognized => {}
        }
    }

    for (action, targets) in new_actions {
        for target in targets {
            if !activity.files_worked.contains(&target) {
                activity.files_worked.push(target);
            }
        }
        activity.recent_actions.push(action);
    }
    if activity.recent_actions.len() > options.max_actions {
        let excess = activity.recent_actions.len() - options.max_actions;
        activity.recent_actions.drain(..excess);
    }
    if activity.files_worked.len() > MAX_FILES_WORKED {
        let excess = activity.files_worked.len() - MAX_FILES_WORKED;
        activity.files_worked.drain(..excess);
    }
    if let Some(last) = activity.recent_actions.last() {
        activity.last_action = Some(last.clone());
    }

    if let Some(latest) = latest {
        activity.last_activity = match options.previous {
            Some(prev) => prev.last_activity.max(latest),
            None => latest,
        };
    }

    activity.pending_tool_calls = pending;
    if last_message.is_some() || options.previous.is_none() {
        activity.status = determine_status(last_message.as_ref(), pending);
    }

    activity
}

/// Targets a tool call operates on.
///
/// Read/write style tools report their `path` (or `file_path`) argument;
/// exec style tools report path-looking tokens of their `command`.
/// Tools outside this set report nothing.
pub fn extract_target(tool_name: &str, arguments: &Value) -> Vec<String> {
    match tool_name.to_ascii_lowercase().as_str() {
        "read" | "write" | "edit" | "multiedit" | "read_file" | "write_file" | "edit_file" => {
            path_argument(arguments).into_iter().collect()
        }
        "exec" | "bash" | "shell" | "exec_shell" | "process" => arguments
            .get("command")
            .and_then(Value::as_str)
            .map(command_paths)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn path_argument(arguments: &Value) -> Option<String> {
    ["path", "file_path"]
        .iter()
        .filter_map(|key| arguments.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|p| !p.is_empty())
        .map(str::to_string)
}

fn command_paths(command: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in command.split_whitespace() {
        let token = token
            .trim_start_matches(['"', '\'', '(', '`'])
            .trim_end_matches(['"', '\'', ')', ';', ',', '`']);
        let looks_like_path = token.len() > 1
            && (token.starts_with('~') || token.starts_with('.') || token.starts_with('/'));
        if looks_like_path && !out.iter().any(|p| p == token) {
            out.push(token.to_string());
        }
    }
    out
}

/// Classify an agent from its most recent message and the number of tool
/// calls still awaiting results.
///
/// | last message                              | status       |
/// |-------------------------------------------|--------------|
/// | none                                      | `idle`       |
/// | assistant with tool calls                 | `executing`  |
/// | `toolResult`                              | `thinking`   |
/// | user                                      | `processing` |
/// | assistant, no calls, nothing pending      | `idle`       |
/// | anything else                             | `active`     |
pub fn determine_status(last_message: Option<&MessageBody>, pending_tool_calls: usize) -> Status {
    let Some(message) = last_message else {
        return Status::Idle;
    };
    match message.role {
        Role::Assistant if message.has_tool_calls() => Status::Executing,
        Role::ToolResult => Status::Thinking,
        Role::User => Status::Processing,
        Role::Assistant if pending_tool_calls == 0 => Status::Idle,
        _ => Status::Active,
    }
}

/// Bound `text` to `max_len` characters, marking the cut with `...`.
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    if max_len < 3 {
        return text.chars().take(max_len).collect();
    }
    let mut out: String = text.chars().take(max_len - 3).collect();
    out.push_str("...");
    out
}

/// [`truncate`] for loosely typed input; anything but a string is `""`.
pub fn truncate_value(value: &Value, max_len: usize) -> String {
    value
        .as_str()
        .map(|s| truncate(s, max_len))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line(v: Value) -> String {
        format!("{v}\n")
    }

    fn assistant_call(name: &str, args: Value) -> String {
        line(json!({
            "type": "message",
            "timestamp": "2025-03-01T10:00:00Z",
            "message": {"role": "assistant", "content": [
                {"type": "toolCall", "id": "c", "name": name, "arguments": args}
            ]}
        }))
    }

    fn role_message(role: &str) -> MessageBody {
        serde_json::from_value(json!({"role": role, "content": []})).unwrap()
    }

    #[test]
    fn parse_line_skips_noise() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("{\"type\":\"sess").is_none());
        assert_eq!(parse_line(" {\"a\":1} ").unwrap()["a"], 1);
    }

    #[test]
    fn filename_ids_strip_only_the_extension() {
        assert_eq!(session_id_from_filename("abc.jsonl"), "abc");
        assert_eq!(session_id_from_filename("/x/run.jsonl"), "run");
        assert_eq!(session_id_from_filename("run.retry.jsonl"), "run.retry");
        assert_eq!(session_id_from_filename("plain"), "plain");
    }

    #[test]
    fn session_model_and_read_scenario() {
        let content = [
            line(json!({"type": "session", "id": "s1", "cwd": "/tmp"})),
            line(json!({"type": "model_change", "modelId": "claude-opus"})),
            assistant_call("Read", json!({"path": "/a.ex"})),
        ]
        .concat();

        let a = parse_content(&content, "abc.jsonl", &ParseOptions::default());
        assert_eq!(a.id, "abc");
        assert_eq!(a.session_id, "s1");
        assert_eq!(a.model, "claude-opus");
        assert_eq!(a.cwd.as_deref(), Some("/tmp"));
        assert_eq!(a.tool_call_count, 1);
        assert_eq!(a.files_worked, ["/a.ex"]);
        assert_eq!(a.status, Status::Executing);
        let last = a.last_action.unwrap();
        assert_eq!(last.name, "Read");
        assert_eq!(last.target, "/a.ex");
        assert_eq!(a.last_activity.to_rfc3339(), "2025-03-01T10:00:00+00:00");
    }

    #[test]
    fn last_model_change_wins_and_session_id_falls_back_to_filename() {
        let content = [
            line(json!({"type": "model_change", "modelId": "a"})),
            line(json!({"type": "model_change", "modelId": "b"})),
        ]
        .concat();
        let a = parse_content(&content, "/x/y/sess-9.jsonl", &ParseOptions::default());
        assert_eq!(a.model, "b");
        assert_eq!(a.session_id, "sess-9");
        assert_eq!(a.status, Status::Idle);
    }

    #[test]
    fn extraction_is_capped_earliest_first() {
        let items: Vec<Value> = (0..20)
            .map(|i| json!({"type": "toolCall", "name": "Read", "arguments": {"path": format!("/f{i}")}}))
            .collect();
        let content = line(json!({
            "type": "message",
            "message": {"role": "assistant", "content": items}
        }));
        let opts = ParseOptions {
            max_actions: 5,
            ..ParseOptions::default()
        };
        let a = parse_content(&content, "s.jsonl", &opts);
        assert_eq!(a.recent_actions.len(), 5);
        assert_eq!(a.recent_actions[0].target, "/f0");
        assert_eq!(a.recent_actions[4].target, "/f4");
        assert_eq!(a.tool_call_count, 20);
    }

    #[test]
    fn only_assistant_messages_contribute_actions() {
        let content = line(json!({
            "type": "message",
            "message": {"role": "user", "content": [
                {"type": "toolCall", "name": "Read", "arguments": {"path": "/nope"}}
            ]}
        }));
        let a = parse_content(&content, "s.jsonl", &ParseOptions::default());
        assert!(a.recent_actions.is_empty());
        assert!(a.files_worked.is_empty());
        assert_eq!(a.status, Status::Processing);
    }

    #[test]
    fn truncated_trailing_line_does_not_abort() {
        let mut content = assistant_call("Write", json!({"file_path": "/w.rs"}));
        content.push_str("{\"type\":\"message\",\"message\":{\"role\":\"us");
        let a = parse_content(&content, "s.jsonl", &ParseOptions::default());
        assert_eq!(a.files_worked, ["/w.rs"]);
        assert_eq!(a.tool_call_count, 1);
    }

    #[test]
    fn folding_onto_previous_keeps_session_fields() {
        let first = [
            line(json!({"type": "session", "id": "s1", "cwd": "/repo"})),
            line(json!({"type": "model_change", "modelId": "m1"})),
            assistant_call("Read", json!({"path": "/a"})),
        ]
        .concat();
        let base = parse_content(&first, "s.jsonl", &ParseOptions::default());

        let appended = [
            line(json!({"type": "message", "timestamp": "2025-03-01T10:00:01Z",
                        "message": {"role": "toolResult", "content": []}})),
            assistant_call("Edit", json!({"path": "/a"})),
            assistant_call("Write", json!({"path": "/b"})),
        ]
        .concat();
        let opts = ParseOptions {
            max_actions: 2,
            previous: Some(&base),
            ..ParseOptions::default()
        };
        let next = parse_content(&appended, "s.jsonl", &opts);

        assert_eq!(next.session_id, "s1");
        assert_eq!(next.model, "m1");
        assert_eq!(next.cwd.as_deref(), Some("/repo"));
        assert_eq!(next.tool_call_count, 3);
        assert_eq!(next.files_worked, ["/a", "/b"]);
        let names: Vec<_> = next.recent_actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["Edit", "Write"]);
        assert_eq!(next.pending_tool_calls, 2);
        // the base row itself is untouched
        assert_eq!(base.tool_call_count, 1);
    }

    #[test]
    fn empty_delta_keeps_previous_status() {
        let base = parse_content(
            &assistant_call("Read", json!({"path": "/a"})),
            "s.jsonl",
            &ParseOptions::default(),
        );
        let opts = ParseOptions {
            previous: Some(&base),
            ..ParseOptions::default()
        };
        let next = parse_content("", "s.jsonl", &opts);
        assert_eq!(next, base);
    }

    #[test]
    fn extract_target_by_tool_kind() {
        assert_eq!(extract_target("read", &json!({"path": "/p"})), ["/p"]);
        assert_eq!(extract_target("Write", &json!({"file_path": "/q"})), ["/q"]);
        assert_eq!(
            extract_target("exec", &json!({"command": "cat ./a.txt /etc/hosts ~/x | grep foo 2>/dev/null"})),
            ["./a.txt", "/etc/hosts", "~/x"]
        );
        assert_eq!(
            extract_target("bash", &json!({"command": "ls \"/quoted/dir\"; cd ."})),
            ["/quoted/dir"]
        );
        assert!(extract_target("web_search", &json!({"path": "/p"})).is_empty());
        assert!(extract_target("read", &json!({})).is_empty());
        assert!(extract_target("exec", &json!({"command": 42})).is_empty());
    }

    #[test]
    fn status_decision_table() {
        let with_call: MessageBody = serde_json::from_value(json!({
            "role": "assistant",
            "content": [{"type": "toolCall", "name": "Read", "arguments": {}}]
        }))
        .unwrap();

        assert_eq!(determine_status(None, 0), Status::Idle);
        assert_eq!(determine_status(Some(&with_call), 0), Status::Executing);
        assert_eq!(determine_status(Some(&role_message("toolResult")), 1), Status::Thinking);
        assert_eq!(determine_status(Some(&role_message("user")), 0), Status::Processing);
        assert_eq!(determine_status(Some(&role_message("assistant")), 0), Status::Idle);
        assert_eq!(determine_status(Some(&role_message("assistant")), 2), Status::Active);
        assert_eq!(determine_status(Some(&role_message("system")), 0), Status::Active);
    }

    #[test]
    fn truncate_bounds() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly10!", 10), "exactly10!");
        let t = truncate("this is far too long", 10);
        assert_eq!(t, "this is...");
        assert_eq!(t.chars().count(), 10);
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
        assert_eq!(truncate("abcdef", 2), "ab");
        assert_eq!(truncate_value(&json!(17), 5), "");
        assert_eq!(truncate_value(&json!("abcdefgh"), 5), "ab...");
    }
}
