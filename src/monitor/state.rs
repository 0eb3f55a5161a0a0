use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::AgentActivity;
use crate::parser::timestamp;

/// Checkpoint handed to the save hook and recovered through the load hook.
///
/// Activities and offsets are written together, so a restored offset
/// always matches the restored activity it was folded into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorState {
    #[serde(default)]
    pub agents: HashMap<String, AgentActivity>,
    #[serde(default)]
    pub session_offsets: HashMap<PathBuf, u64>,
    #[serde(default, with = "timestamp::option")]
    pub last_poll: Option<DateTime<Utc>>,
}

impl MonitorState {
    /// Apply the activity invariants to every restored row and key each
    /// row by its own id.
    pub fn normalize(self, max_recent_actions: usize) -> Self {
        let agents = self
            .agents
            .into_iter()
            .filter_map(|(key, mut activity)| {
                if activity.id.is_empty() {
                    activity.id = key;
                }
                if activity.id.is_empty() {
                    return None;
                }
                if activity.session_id.is_empty() {
                    activity.session_id = activity.id.clone();
                }
                activity.normalize(max_recent_actions);
                Some((activity.id.clone(), activity))
            })
            .collect();
        Self {
            agents,
            session_offsets: self.session_offsets,
            last_poll: self.last_poll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Action, AgentKind};

    #[test]
    fn normalize_caps_actions_and_rekeys() {
        let now = Utc::now();
        let mut a = AgentActivity::new("", AgentKind::Openclaw, now);
        a.recent_actions = (0..8)
            .map(|i| Action {
                name: format!("t{i}"),
                target: String::new(),
                timestamp: now,
            })
            .collect();
        a.files_worked = vec!["/x".into(), "/x".into(), "/y".into()];

        let mut state = MonitorState::default();
        state.agents.insert("sess".into(), a);
        state
            .agents
            .insert(String::new(), AgentActivity::new("", AgentKind::Openclaw, now));

        let state = state.normalize(3);
        assert_eq!(state.agents.len(), 1);
        let sess = &state.agents["sess"];
        assert_eq!(sess.id, "sess");
        assert_eq!(sess.session_id, "sess");
        assert_eq!(sess.recent_actions.len(), 3);
        assert_eq!(sess.recent_actions[0].name, "t5");
        assert_eq!(sess.last_action.as_ref().map(|a| a.name.as_str()), Some("t7"));
        assert_eq!(sess.files_worked, vec!["/x", "/y"]);
    }
}
