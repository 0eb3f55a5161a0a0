//! Integration test: `config.yaml` loading and monitor config validation.

use std::time::Duration;

use agent_watch::config::{FileConfig, MonitorConfig, DEFAULT_POLL_INTERVAL};
use tempfile::TempDir;

#[tokio::test]
async fn yaml_overrides_apply_to_monitor_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    tokio::fs::write(
        &path,
        r#"
sessions_dir: /var/tmp/sessions
gateway_addr: 127.0.0.1:4999
monitor:
  poll_interval_ms: 1500
  max_cache_entries: 7
  process_monitoring: true
  name: laptop
"#,
    )
    .await
    .unwrap();

    let file = FileConfig::load(&path).await.unwrap();
    assert_eq!(file.gateway_addr.as_deref(), Some("127.0.0.1:4999"));

    let cfg = file.monitor_config().validate().unwrap();
    assert_eq!(cfg.sessions_dir.as_deref(), Some(std::path::Path::new("/var/tmp/sessions")));
    assert_eq!(cfg.poll_interval, Duration::from_millis(1500));
    assert_eq!(cfg.max_cache_entries, 7);
    assert!(cfg.process_monitoring);
    assert_eq!(cfg.display_name(), "laptop");
}

#[tokio::test]
async fn missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let file = FileConfig::load(&dir.path().join("absent.yaml")).await.unwrap();
    let cfg = file.monitor_config().validate().unwrap();
    assert_eq!(cfg.poll_interval, DEFAULT_POLL_INTERVAL);
    assert!(cfg.sessions_dir.unwrap().ends_with("sessions"));
}

#[tokio::test]
async fn unknown_keys_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    tokio::fs::write(&path, "monitor:\n  poll_every: 3\n").await.unwrap();
    assert!(FileConfig::load(&path).await.is_err());
}

#[tokio::test]
async fn saved_config_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    let mut file = FileConfig {
        sessions_dir: Some(dir.path().join("sessions")),
        ..FileConfig::default()
    };
    file.monitor.gc_interval_secs = Some(42);
    file.save(&path).await.unwrap();

    let loaded = FileConfig::load(&path).await.unwrap();
    assert_eq!(loaded.sessions_dir, file.sessions_dir);
    let cfg = loaded.monitor_config();
    assert_eq!(cfg.gc_interval, Duration::from_secs(42));
}

#[test]
fn zero_values_fail_validation() {
    let mut cfg = MonitorConfig::minimal("/tmp/s");
    cfg.max_recent_actions = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = MonitorConfig::minimal("/tmp/s");
    cfg.gc_interval = Duration::ZERO;
    assert!(cfg.validate().is_err());
}
