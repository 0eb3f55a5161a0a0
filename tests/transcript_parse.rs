//! Integration test: a realistic transcript parsed whole and in slices.

use agent_watch::activity::Status;
use agent_watch::parser::{parse_content, ParseOptions};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

fn options(previous: Option<&agent_watch::activity::AgentActivity>) -> ParseOptions<'_> {
    let fallback_time: DateTime<Utc> = Utc.timestamp_opt(0, 0).unwrap();
    ParseOptions {
        previous,
        fallback_time,
        ..ParseOptions::default()
    }
}

fn transcript() -> Vec<String> {
    vec![
        json!({"type": "session", "id": "run-42", "cwd": "/home/dev/app"}).to_string(),
        json!({"type": "model_change", "modelId": "gpt-5"}).to_string(),
        json!({"type": "message", "timestamp": "2025-06-01T09:00:00Z",
               "message": {"role": "user", "content": "fix the build"}}).to_string(),
        json!({"type": "message", "timestamp": "2025-06-01T09:00:05Z",
               "message": {"role": "assistant", "content": [
                   {"type": "text", "text": "Looking."},
                   {"type": "toolCall", "id": "1", "name": "bash",
                    "arguments": {"command": "cargo build --manifest-path ./Cargo.toml 2>&1 | tee /tmp/out"}}
               ]}}).to_string(),
        json!({"type": "message", "timestamp": "2025-06-01T09:00:20Z",
               "message": {"role": "toolResult", "content": [{"type": "text", "text": "error"}]}}).to_string(),
        json!({"type": "custom_event", "payload": 1}).to_string(),
        json!({"type": "message", "timestamp": 1748768430000i64,
               "message": {"role": "assistant", "content": [
                   {"type": "toolCall", "id": "2", "name": "edit",
                    "arguments": {"file_path": "/home/dev/app/src/lib.rs"}}
               ]}}).to_string(),
    ]
}

#[test]
fn whole_transcript() {
    let content = transcript().join("\n");
    let a = parse_content(&content, "run-42.jsonl", &options(None));

    assert_eq!(a.id, "run-42");
    assert_eq!(a.session_id, "run-42");
    assert_eq!(a.model, "gpt-5");
    assert_eq!(a.tool_call_count, 2);
    assert_eq!(a.pending_tool_calls, 1);
    assert_eq!(a.status, Status::Executing);
    assert_eq!(
        a.files_worked,
        vec!["./Cargo.toml", "/tmp/out", "/home/dev/app/src/lib.rs"]
    );
    let names: Vec<&str> = a.recent_actions.iter().map(|x| x.name.as_str()).collect();
    assert_eq!(names, ["bash", "edit"]);
    assert_eq!(a.recent_actions[0].target, "./Cargo.toml");
    assert_eq!(a.last_activity.timestamp_millis(), 1_748_768_430_000);
}

#[test]
fn sliced_transcript_matches_whole() {
    let lines = transcript();
    let whole = parse_content(&lines.join("\n"), "run-42.jsonl", &options(None));

    let mut folded = None;
    for chunk in lines.chunks(2) {
        let next = parse_content(
            &chunk.join("\n"),
            "run-42.jsonl",
            &options(folded.as_ref()),
        );
        folded = Some(next);
    }
    let folded = folded.unwrap();

    assert_eq!(folded.model, whole.model);
    assert_eq!(folded.cwd, whole.cwd);
    assert_eq!(folded.tool_call_count, whole.tool_call_count);
    assert_eq!(folded.pending_tool_calls, whole.pending_tool_calls);
    assert_eq!(folded.status, whole.status);
    assert_eq!(folded.files_worked, whole.files_worked);
    assert_eq!(folded.recent_actions, whole.recent_actions);
    assert_eq!(folded.last_activity, whole.last_activity);
}

#[test]
fn status_after_tool_result_is_thinking() {
    let content = transcript()[..5].join("\n");
    let a = parse_content(&content, "run-42.jsonl", &options(None));
    assert_eq!(a.status, Status::Thinking);
    assert_eq!(a.pending_tool_calls, 0);
}
