//! CLI subcommand handlers extracted from `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, the logic lives here.

use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use tracing::debug;

use crate::activity::AgentActivity;
use crate::config::FileConfig;
use crate::parser::{self, ParseOptions};

// ── Init ─────────────────────────────────────────────────────────────────────

/// Write a default `config.yaml` unless one already exists.
pub async fn init_config(config_path: &Path) -> anyhow::Result<()> {
    if tokio::fs::try_exists(config_path).await.unwrap_or(false) {
        println!("Config already exists: {}", config_path.display());
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }

    let config = FileConfig {
        sessions_dir: Some(crate::utils::default_sessions_dir()),
        gateway_addr: Some(crate::gateway::DEFAULT_GATEWAY_ADDR.to_string()),
        ..FileConfig::default()
    };
    config.save(config_path).await?;
    println!("Wrote {}", config_path.display());
    Ok(())
}

// ── Scan ─────────────────────────────────────────────────────────────────────

/// Parse a single transcript file and print the resulting activity.
pub async fn scan_file(path: &Path, max_actions: usize, json: bool) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read transcript: {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("transcript path has no file name")?;

    let fallback_time = tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .map(Into::into)
        .unwrap_or_else(|_| Utc::now());
    let activity = parser::parse_content(
        &String::from_utf8_lossy(&bytes),
        &filename,
        &ParseOptions {
            max_actions,
            fallback_time,
            ..ParseOptions::default()
        },
    );
    debug!(path = %path.display(), tool_calls = activity.tool_call_count, "transcript scanned");

    if json {
        println!("{}", serde_json::to_string_pretty(&activity)?);
    } else {
        print_activity(&activity);
    }
    Ok(())
}

/// Human-readable summary of one activity.
pub fn print_activity(activity: &AgentActivity) {
    println!("{}  [{}]", activity.id, activity.agent_type.as_str());
    println!("   Session:    {}", activity.session_id);
    println!("   Model:      {}", activity.model);
    if let Some(cwd) = &activity.cwd {
        println!("   Cwd:        {cwd}");
    }
    println!("   Status:     {}", activity.status.as_str());
    println!("   Last seen:  {}", activity.last_activity.to_rfc3339());
    println!(
        "   Tool calls: {} ({} pending)",
        activity.tool_call_count, activity.pending_tool_calls
    );
    for action in &activity.recent_actions {
        println!(
            "     {}  {:<12} {}",
            action.timestamp.format("%H:%M:%S"),
            action.name,
            parser::truncate(&action.target, 60)
        );
    }
    if !activity.files_worked.is_empty() {
        println!("   Files:      {}", activity.files_worked.len());
    }
}

// ── Status ───────────────────────────────────────────────────────────────────

/// Ask a running daemon for its health and current activities.
pub async fn check_status(addr: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(3))
        .build()?;

    let url = format!("http://{addr}/api/health");
    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            println!("✅ agent-watch daemon is running");
            println!("   Gateway: http://{addr}");
            if let Some(monitor) = body.get("monitor").filter(|m| !m.is_null()) {
                let field = |k: &str| monitor.get(k).cloned().unwrap_or_default();
                println!("   Sessions: {}", field("sessions_dir"));
                println!("   Polls:    {}", field("polls_completed"));
                println!("   Cache:    {}", field("cache_entries"));
            }

            let activities: Vec<AgentActivity> = client
                .get(format!("http://{addr}/api/activities"))
                .send()
                .await?
                .json()
                .await
                .context("failed to decode activities")?;
            println!("   Agents:   {}", activities.len());
            for activity in &activities {
                println!();
                print_activity(activity);
            }
            Ok(())
        }
        Ok(resp) => {
            println!("⚠️  agent-watch daemon responded with status: {}", resp.status());
            Ok(())
        }
        Err(e) => {
            println!("❌ agent-watch daemon is not reachable at http://{addr}");
            debug!(error = %e, "status request failed");
            Ok(())
        }
    }
}
