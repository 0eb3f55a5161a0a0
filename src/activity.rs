//! Activity data model shared by the parser, the monitor and its
//! collaborators.
//!
//! An [`AgentActivity`] is one row per discovered session.  Rows are
//! produced wholesale by [`crate::parser::parse_content`] (or by a
//! process finder) and never patched field-by-field afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::timestamp;

/// Which coding agent produced a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    Openclaw,
    ClaudeCode,
    Opencode,
    Codex,
    #[default]
    #[serde(other)]
    Unknown,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Openclaw => "openclaw",
            AgentKind::ClaudeCode => "claude-code",
            AgentKind::Opencode => "opencode",
            AgentKind::Codex => "codex",
            AgentKind::Unknown => "unknown",
        }
    }
}

/// Coarse run state of an agent, classified from its most recent message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Idle,
    Executing,
    Thinking,
    Processing,
    Active,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Executing => "executing",
            Status::Thinking => "thinking",
            Status::Processing => "processing",
            Status::Active => "active",
        }
    }
}

/// A single tool invocation observed in a transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Tool name as written by the agent (`Read`, `exec`, ...).
    pub name: String,
    /// First argument-derived target, or empty.
    #[serde(default)]
    pub target: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Consolidated view of one agent session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentActivity {
    /// Stable identifier (transcript file stem, or `proc-<pid>`).
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub agent_type: AgentKind,
    #[serde(default = "unknown_model")]
    pub model: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub last_action: Option<Action>,
    /// Most-recent-last, never longer than the configured cap.
    #[serde(default)]
    pub recent_actions: Vec<Action>,
    /// Distinct paths in first-seen order.
    #[serde(default)]
    pub files_worked: Vec<String>,
    #[serde(with = "timestamp")]
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub tool_call_count: u64,
    /// Tool calls issued but not yet answered by a `toolResult`.
    #[serde(default)]
    pub pending_tool_calls: usize,
}

fn unknown_model() -> String {
    "unknown".to_string()
}

impl AgentActivity {
    /// An empty row for `id`, stamped at `at`.
    pub fn new(id: impl Into<String>, agent_type: AgentKind, at: DateTime<Utc>) -> Self {
        let id = id.into();
        Self {
            session_id: id.clone(),
            id,
            agent_type,
            model: unknown_model(),
            cwd: None,
            status: Status::Idle,
            last_action: None,
            recent_actions: Vec::new(),
            files_worked: Vec::new(),
            last_activity: at,
            tool_call_count: 0,
            pending_tool_calls: 0,
        }
    }

    /// Re-establish the list invariants on a row that came from outside
    /// (a restored checkpoint or a process finder).
    pub fn normalize(&mut self, max_recent_actions: usize) {
        if self.recent_actions.len() > max_recent_actions {
            let excess = self.recent_actions.len() - max_recent_actions;
            self.recent_actions.drain(..excess);
        }
        let mut seen = std::collections::HashSet::new();
        self.files_worked.retain(|f| seen.insert(f.clone()));
        self.last_action = self.recent_actions.last().cloned().or(self.last_action.take());
        if self.model.is_empty() {
            self.model = unknown_model();
        }
    }
}

/// What subscribers receive on every published change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    /// Logical monitor name, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<String>,
    /// Most recently active first.
    pub agents: Vec<AgentActivity>,
    #[serde(with = "timestamp")]
    pub published_at: DateTime<Utc>,
}

/// Order activities most-recently-active first.
pub fn sort_by_recency(agents: &mut [AgentActivity]) {
    agents.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.id.cmp(&b.id))
    });
}
