use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::activity::ActivitySnapshot;
use crate::hooks::{MonitorHooks, NoopHooks};

pub const DEFAULT_PERSISTENCE_FILE: &str = "agent_monitor_state.json";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 100;
pub const DEFAULT_MAX_RECENT_ACTIONS: usize = 10;
pub const DEFAULT_FILE_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_FILE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Immutable monitor configuration.
///
/// Build with [`MonitorConfig::minimal`] or [`MonitorConfig::with_overrides`]
/// and check with [`MonitorConfig::validate`].  `Default` leaves
/// `sessions_dir` unset and therefore does not validate.
#[derive(Clone)]
pub struct MonitorConfig {
    /// Directory holding `*.jsonl` session transcripts.
    pub sessions_dir: Option<PathBuf>,
    /// File name handed to the save/load hooks.
    pub persistence_file: String,
    pub poll_interval: Duration,
    pub cache_cleanup_interval: Duration,
    pub gc_interval: Duration,
    /// Budget for one file read (including retries) and for the process
    /// finder call.
    pub read_timeout: Duration,
    pub max_cache_entries: usize,
    pub max_recent_actions: usize,
    pub file_retry_attempts: u32,
    pub file_retry_delay: Duration,
    /// Save/load/gc/process-finder capabilities.
    pub hooks: Arc<dyn MonitorHooks>,
    /// Where snapshots are published when the active set changes.
    pub pubsub: Option<broadcast::Sender<ActivitySnapshot>>,
    /// Runtime that runs poll and persistence work.  `None` uses the
    /// runtime the monitor was started on.
    pub task_runner: Option<tokio::runtime::Handle>,
    /// Merge the process finder's results into each poll.
    pub process_monitoring: bool,
    /// Logical name used in logs, snapshots and the gc hook.
    pub name: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sessions_dir: None,
            persistence_file: DEFAULT_PERSISTENCE_FILE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cache_cleanup_interval: DEFAULT_CACHE_CLEANUP_INTERVAL,
            gc_interval: DEFAULT_GC_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            max_recent_actions: DEFAULT_MAX_RECENT_ACTIONS,
            file_retry_attempts: DEFAULT_FILE_RETRY_ATTEMPTS,
            file_retry_delay: DEFAULT_FILE_RETRY_DELAY,
            hooks: Arc::new(NoopHooks),
            pubsub: None,
            task_runner: None,
            process_monitoring: false,
            name: None,
        }
    }
}

impl fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("sessions_dir", &self.sessions_dir)
            .field("persistence_file", &self.persistence_file)
            .field("poll_interval", &self.poll_interval)
            .field("cache_cleanup_interval", &self.cache_cleanup_interval)
            .field("gc_interval", &self.gc_interval)
            .field("read_timeout", &self.read_timeout)
            .field("max_cache_entries", &self.max_cache_entries)
            .field("max_recent_actions", &self.max_recent_actions)
            .field("file_retry_attempts", &self.file_retry_attempts)
            .field("file_retry_delay", &self.file_retry_delay)
            .field("pubsub", &self.pubsub.is_some())
            .field("task_runner", &self.task_runner.is_some())
            .field("process_monitoring", &self.process_monitoring)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Partial overrides merged onto [`MonitorConfig::minimal`].
///
/// This is also the `monitor:` section of the YAML config file, so
/// durations are plain integers with a unit suffix.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub persistence_file: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub cache_cleanup_interval_secs: Option<u64>,
    #[serde(default)]
    pub gc_interval_secs: Option<u64>,
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_cache_entries: Option<usize>,
    #[serde(default)]
    pub max_recent_actions: Option<usize>,
    #[serde(default)]
    pub file_retry_attempts: Option<u32>,
    #[serde(default)]
    pub file_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub process_monitoring: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
}

impl MonitorConfig {
    /// Directory only; everything else default.
    pub fn minimal(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: Some(sessions_dir.into()),
            ..Self::default()
        }
    }

    /// Directory plus the overrides that are set.
    pub fn with_overrides(sessions_dir: impl Into<PathBuf>, overrides: ConfigOverrides) -> Self {
        let mut config = Self::minimal(sessions_dir);
        config.apply(overrides);
        config
    }

    /// Merge the set fields of `overrides` into `self`.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            persistence_file,
            poll_interval_ms,
            cache_cleanup_interval_secs,
            gc_interval_secs,
            read_timeout_ms,
            max_cache_entries,
            max_recent_actions,
            file_retry_attempts,
            file_retry_delay_ms,
            process_monitoring,
            name,
        } = overrides;

        if let Some(v) = persistence_file {
            self.persistence_file = v;
        }
        if let Some(v) = poll_interval_ms {
            self.poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = cache_cleanup_interval_secs {
            self.cache_cleanup_interval = Duration::from_secs(v);
        }
        if let Some(v) = gc_interval_secs {
            self.gc_interval = Duration::from_secs(v);
        }
        if let Some(v) = read_timeout_ms {
            self.read_timeout = Duration::from_millis(v);
        }
        if let Some(v) = max_cache_entries {
            self.max_cache_entries = v;
        }
        if let Some(v) = max_recent_actions {
            self.max_recent_actions = v;
        }
        if let Some(v) = file_retry_attempts {
            self.file_retry_attempts = v;
        }
        if let Some(v) = file_retry_delay_ms {
            self.file_retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = process_monitoring {
            self.process_monitoring = v;
        }
        if name.is_some() {
            self.name = name;
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn MonitorHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_pubsub(mut self, tx: broadcast::Sender<ActivitySnapshot>) -> Self {
        self.pubsub = Some(tx);
        self
    }

    pub fn with_task_runner(mut self, handle: tokio::runtime::Handle) -> Self {
        self.task_runner = Some(handle);
        self
    }

    /// Check the constraints the monitor relies on.  Only a config that
    /// passes here may start a monitor.
    pub fn validate(self) -> anyhow::Result<Self> {
        if self.sessions_dir.is_none() {
            anyhow::bail!("config: sessions_dir is required");
        }
        for (field, value) in [
            ("poll_interval", self.poll_interval),
            ("cache_cleanup_interval", self.cache_cleanup_interval),
            ("gc_interval", self.gc_interval),
            ("read_timeout", self.read_timeout),
        ] {
            if value.is_zero() {
                anyhow::bail!("config: {field} must be non-zero (would create busy loop)");
            }
        }
        if self.max_cache_entries == 0 {
            anyhow::bail!("config: max_cache_entries must be at least 1");
        }
        if self.max_recent_actions == 0 {
            anyhow::bail!("config: max_recent_actions must be at least 1");
        }
        if self.persistence_file.trim().is_empty() {
            anyhow::bail!("config: persistence_file must not be empty");
        }
        Ok(self)
    }

    /// Display name for logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("agent-monitor")
    }
}

// ---------------------------------------------------------------------------
// On-disk config
// ---------------------------------------------------------------------------

/// Top-level `config.yaml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Transcript directory.  Relative paths resolve against the home dir.
    #[serde(default)]
    pub sessions_dir: Option<PathBuf>,
    #[serde(default)]
    pub monitor: ConfigOverrides,
    /// Gateway listen address, e.g. `127.0.0.1:3900`.
    #[serde(default)]
    pub gateway_addr: Option<String>,
}

impl FileConfig {
    /// Read and parse a YAML configuration file.  A missing file yields
    /// the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<FileConfig> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(FileConfig::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };

        let mut config: FileConfig = if contents.trim().is_empty() {
            FileConfig::default()
        } else {
            serde_yaml::from_str(&contents).context("failed to parse config YAML")?
        };

        if let Some(dir) = &config.sessions_dir {
            if dir.is_relative() {
                config.sessions_dir = Some(crate::agent_watch_home().join(dir));
            }
        }

        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Serialize and write the configuration back to a YAML file.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_yaml::to_string(self).context("serialize config YAML")?;
        tokio::fs::write(path, &contents)
            .await
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Build the monitor config, with `sessions_dir` falling back to the
    /// OpenClaw default location.
    pub fn monitor_config(&self) -> MonitorConfig {
        let dir = self
            .sessions_dir
            .clone()
            .unwrap_or_else(crate::utils::default_sessions_dir);
        MonitorConfig::with_overrides(dir, self.monitor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_does_not_validate() {
        let err = MonitorConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("sessions_dir"));
    }

    #[test]
    fn minimal_config_validates_with_defaults() {
        let cfg = MonitorConfig::minimal("/tmp/sessions").validate().unwrap();
        assert_eq!(cfg.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.max_recent_actions, DEFAULT_MAX_RECENT_ACTIONS);
        assert_eq!(cfg.persistence_file, DEFAULT_PERSISTENCE_FILE);
        assert!(!cfg.process_monitoring);
        assert!(cfg.pubsub.is_none());
    }

    #[test]
    fn overrides_merge_onto_minimal() {
        let cfg = MonitorConfig::with_overrides(
            "/tmp/s",
            ConfigOverrides {
                poll_interval_ms: Some(250),
                max_cache_entries: Some(7),
                name: Some("dev".into()),
                ..ConfigOverrides::default()
            },
        );
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.max_cache_entries, 7);
        assert_eq!(cfg.display_name(), "dev");
        assert_eq!(cfg.gc_interval, DEFAULT_GC_INTERVAL);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cfg = MonitorConfig::with_overrides(
            "/tmp/s",
            ConfigOverrides {
                poll_interval_ms: Some(0),
                ..ConfigOverrides::default()
            },
        );
        assert!(cfg.validate().is_err());
    }
}
