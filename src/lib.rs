//! agent_watch - tails agent session transcripts and reports what each
//! agent is doing.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod activity;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod hooks;
pub mod monitor;
pub mod parser;
pub mod utils;

/// Return the agent-watch home directory.
///
/// Resolution order:
/// 1. `AGENT_WATCH_HOME` environment variable
/// 2. `$HOME/.agent-watch`
pub fn agent_watch_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("AGENT_WATCH_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".agent-watch")
    }
}
