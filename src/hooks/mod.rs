//! Optional capabilities the monitor calls out to.
//!
//! Every capability is a method on [`MonitorHooks`] with a default body,
//! so [`NoopHooks`] is a complete, capability-free implementation:
//! nothing is saved, the default state is "restored", no processes are
//! found and the gc trigger falls back to [`crate::utils::reclaim_memory`].
//! [`DaemonHooks`] is the implementation the binary uses.

pub mod process;
pub mod store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::activity::AgentActivity;
use crate::monitor::MonitorState;

#[async_trait]
pub trait MonitorHooks: Send + Sync + 'static {
    /// Persist a checkpoint under `file`.
    async fn save_state(&self, _file: &str, _state: &MonitorState) -> anyhow::Result<()> {
        Ok(())
    }

    /// Load the checkpoint stored under `file`, or return `defaults`.
    async fn load_state(&self, _file: &str, defaults: MonitorState) -> anyhow::Result<MonitorState> {
        Ok(defaults)
    }

    /// Ask the host to release memory after a stretch of polling.
    fn trigger_gc(&self, name: &str) {
        crate::utils::reclaim_memory(name);
    }

    /// Agent processes currently running, keyed by activity id.
    async fn find_processes(
        &self,
        _timeout: Duration,
    ) -> anyhow::Result<HashMap<String, AgentActivity>> {
        Ok(HashMap::new())
    }
}

/// No capabilities at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl MonitorHooks for NoopHooks {}

/// JSON checkpoints in `state_dir` plus a `ps`-based process finder.
#[derive(Debug, Clone)]
pub struct DaemonHooks {
    pub state_dir: PathBuf,
}

impl DaemonHooks {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }
}

#[async_trait]
impl MonitorHooks for DaemonHooks {
    async fn save_state(&self, file: &str, state: &MonitorState) -> anyhow::Result<()> {
        store::save_state_file(&self.state_dir.join(file), state).await
    }

    async fn load_state(&self, file: &str, defaults: MonitorState) -> anyhow::Result<MonitorState> {
        let path = self.state_dir.join(file);
        match store::load_state_file(&path).await? {
            Some(state) => Ok(state),
            None => {
                debug!(path = %path.display(), "no checkpoint found, starting empty");
                Ok(defaults)
            }
        }
    }

    async fn find_processes(
        &self,
        timeout: Duration,
    ) -> anyhow::Result<HashMap<String, AgentActivity>> {
        process::find_agent_processes(timeout).await
    }
}
