//! Configuration file to backend effects, through the daemon loop.

use chrono::{Duration, TimeZone, Utc};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use zd_core::MemoryBackend;
use zd_daemon::{ConfigError, Daemon};

const CONFIG: &str = r#"
tasks:
  - task: scrub
    target: tank
    frequency: weekly
    when: Mon 00:00
  - task: snapshot and replicate
    target: tank/home
    frequency: daily
    when: "00:00"
    retention: 3
    recursive: true
    to:
      - backup/home@nas1
"#;

fn config_file(contents: &str, suffix: &str) -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(suffix).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_pool("tank");
    backend.add_dataset(None, "tank/home");
    backend.add_dataset(None, "tank/home/alice");
    backend.add_host("nas1");
    backend
}

#[tokio::test]
async fn test_week_of_daily_replication() {
    let file = config_file(CONFIG, ".yaml");
    let backend = backend();
    let mut daemon = Daemon::start(file.path(), backend.clone()).await.unwrap();

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    for day in 0..7 {
        let report = daemon.step(start + Duration::days(day)).await.unwrap();
        assert!(report.replications.iter().all(|r| r.all_succeeded()));
        // minutes between midnights run nothing
        let idle = daemon
            .step(start + Duration::days(day) + Duration::minutes(1))
            .await
            .unwrap();
        assert!(idle.is_empty());
    }

    assert_eq!(backend.snapshots(None, "tank/home").len(), 3);
    assert_eq!(backend.snapshots(None, "tank/home/alice").len(), 3);
    assert_eq!(backend.snapshots(Some("nas1"), "backup/home").len(), 7);
    assert_eq!(backend.snapshots(Some("nas1"), "backup/home/alice").len(), 7);
    assert_eq!(backend.scrubbed_pools(), vec!["tank"]);
}

#[tokio::test]
async fn test_unreachable_destination_does_not_stop_snapshots() {
    let file = config_file(CONFIG, ".yaml");
    let backend = backend();
    backend.remove_host("nas1");
    let mut daemon = Daemon::start(file.path(), backend.clone()).await.unwrap();

    let report = daemon
        .step(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        .await
        .unwrap();
    assert!(report.snapshots[0].all_succeeded());
    assert!(!report.replications[0].all_succeeded());
    assert_eq!(report.replications[0].failed(), 2);
}

#[tokio::test]
async fn test_missing_target_rejects_config() {
    let file = config_file(CONFIG, ".yaml");
    let backend = Arc::new(MemoryBackend::new());
    backend.add_pool("tank");

    let err = Daemon::start(file.path(), backend).await.err().unwrap();
    assert!(matches!(err, ConfigError::TargetNotFound { ref target, .. } if target == "tank/home"));
}

#[tokio::test]
async fn test_toml_config() {
    let file = config_file(
        r#"
[[tasks]]
task = "snapshot"
target = "tank/home"
frequency = "hourly"
when = 30
retention = 2
"#,
        ".toml",
    );
    let backend = backend();
    let mut daemon = Daemon::start(file.path(), backend.clone()).await.unwrap();

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
    for hour in 0..4 {
        daemon.step(start + Duration::hours(hour)).await;
    }
    assert_eq!(
        backend.snapshots(None, "tank/home"),
        vec![
            "auto_2024-01-01_02-30-00_hourly".to_string(),
            "auto_2024-01-01_03-30-00_hourly".to_string(),
        ]
    );
}
