//! JSON checkpoint file for [`MonitorState`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use tracing::debug;

use crate::monitor::MonitorState;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write `state` to `path` as pretty JSON.
///
/// The file is written next to its destination and renamed into place so
/// a crash mid-write never leaves a half checkpoint behind.  Every write
/// gets its own temp file, so concurrent saves each land whole.
pub async fn save_state_file(path: &Path, state: &MonitorState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create state dir {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(state).context("serialize monitor state")?;
    let tmp = tmp_path(path);

    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("rename {} -> {}", tmp.display(), path.display()));
    }

    debug!(path = %path.display(), agents = state.agents.len(), "checkpoint saved");
    Ok(())
}

/// `<path>.<pid>.<seq>.tmp`
fn tmp_path(path: &Path) -> PathBuf {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}.{seq}.tmp", std::process::id()));
    PathBuf::from(name)
}

/// Read a checkpoint.  `Ok(None)` when the file does not exist.
pub async fn load_state_file(path: &Path) -> anyhow::Result<Option<MonitorState>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let state = serde_json::from_str(&contents)
        .with_context(|| format!("parse checkpoint {}", path.display()))?;
    Ok(Some(state))
}
