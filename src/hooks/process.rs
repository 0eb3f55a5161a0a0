//! Process-table lookup for agents that are running but may not have a
//! fresh transcript yet.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use tracing::trace;

use crate::activity::{AgentActivity, AgentKind, Status};

/// One row of `ps -eo pid=,etimes=,args=`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub elapsed_secs: u64,
    pub command: String,
}

const INTERPRETERS: &[&str] = &["node", "bun", "deno", "python", "python3"];

/// Parse `ps` output; malformed rows are skipped.
pub fn parse_ps_output(text: &str) -> Vec<ProcessInfo> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let elapsed_secs = parts.next()?.parse().ok()?;
            let command = parts.collect::<Vec<_>>().join(" ");
            if command.is_empty() {
                return None;
            }
            Some(ProcessInfo {
                pid,
                elapsed_secs,
                command,
            })
        })
        .collect()
}

fn basename(token: &str) -> &str {
    token.rsplit('/').next().unwrap_or(token)
}

fn kind_from_name(name: &str) -> Option<AgentKind> {
    match name {
        "claude" => Some(AgentKind::ClaudeCode),
        "codex" => Some(AgentKind::Codex),
        "opencode" => Some(AgentKind::Opencode),
        "openclaw" => Some(AgentKind::Openclaw),
        _ => None,
    }
}

/// Which agent a command line belongs to, if any.
///
/// Native binaries match on their basename; scripts run through an
/// interpreter match on the package path of the script.
pub fn classify_command(command: &str) -> Option<AgentKind> {
    let mut tokens = command.split_whitespace();
    let argv0 = basename(tokens.next()?);
    if let Some(kind) = kind_from_name(argv0) {
        return Some(kind);
    }
    if !INTERPRETERS.contains(&argv0) {
        return None;
    }
    let script = tokens.find(|t| !t.starts_with('-'))?;
    if let Some(kind) = kind_from_name(basename(script)) {
        return Some(kind);
    }
    [
        ("claude-code", AgentKind::ClaudeCode),
        ("@openai/codex", AgentKind::Codex),
        ("opencode", AgentKind::Opencode),
        ("openclaw", AgentKind::Openclaw),
    ]
    .into_iter()
    .find(|(marker, _)| script.contains(marker))
    .map(|(_, kind)| kind)
}

/// Run `ps` and turn every agent process into an activity row keyed
/// `proc-<pid>`.
pub async fn find_agent_processes(
    timeout: Duration,
) -> anyhow::Result<HashMap<String, AgentActivity>> {
    let output = tokio::time::timeout(
        timeout,
        tokio::process::Command::new("ps")
            .args(["-eo", "pid=,etimes=,args="])
            .kill_on_drop(true)
            .output(),
    )
    .await
    .context("ps timed out")?
    .context("failed to run ps")?;

    if !output.status.success() {
        anyhow::bail!("ps exited with {}", output.status);
    }

    let own_pid = std::process::id();
    let now = Utc::now();
    let mut found = HashMap::new();

    for proc_info in parse_ps_output(&String::from_utf8_lossy(&output.stdout)) {
        if proc_info.pid == own_pid {
            continue;
        }
        let Some(kind) = classify_command(&proc_info.command) else {
            continue;
        };
        let id = format!("proc-{}", proc_info.pid);
        // Process start time, whole seconds, so repeated polls agree.
        let started = Utc
            .timestamp_opt(now.timestamp() - proc_info.elapsed_secs as i64, 0)
            .single()
            .unwrap_or(now);
        let mut activity = AgentActivity::new(id.clone(), kind, started);
        activity.status = Status::Active;
        activity.cwd = tokio::fs::read_link(format!("/proc/{}/cwd", proc_info.pid))
            .await
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        trace!(pid = proc_info.pid, kind = kind.as_str(), "agent process found");
        found.insert(id, activity);
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ps_rows() {
        let out = "  101   35 /usr/local/bin/claude --resume\n\
                   garbage\n\
                   202 7 node /opt/lib/node_modules/@openai/codex/bin/codex.js\n\
                   303 1\n";
        let rows = parse_ps_output(out);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].pid, 101);
        assert_eq!(rows[0].elapsed_secs, 35);
        assert_eq!(rows[0].command, "/usr/local/bin/claude --resume");
    }

    #[test]
    fn classifies_agent_commands() {
        assert_eq!(classify_command("/usr/bin/claude -p hi"), Some(AgentKind::ClaudeCode));
        assert_eq!(classify_command("codex exec"), Some(AgentKind::Codex));
        assert_eq!(
            classify_command("node --no-warnings /usr/lib/node_modules/@anthropic-ai/claude-code/cli.js"),
            Some(AgentKind::ClaudeCode)
        );
        assert_eq!(
            classify_command("bun /home/u/.bun/bin/opencode"),
            Some(AgentKind::Opencode)
        );
        assert_eq!(classify_command("node server.js"), None);
        assert_eq!(classify_command("vim claude.md"), None);
        assert_eq!(classify_command(""), None);
    }
}
