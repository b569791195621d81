//! End-to-end scheduling scenarios against the in-memory backend.

mod common;

use common::{backend_with, daily, jan, Harness};
use zd_core::backend::{BackendCall, BackendOp};
use zd_core::{
    Cadence, PlanError, ReplicationOutcome, ReplicationTarget, Task, TaskKind,
};

fn labels(days: std::ops::RangeInclusive<u32>) -> Vec<String> {
    days.map(daily).collect()
}

#[tokio::test]
async fn test_daily_snapshot_replicate_and_prune() {
    let backend = backend_with(&[]);
    let task = Task::new(TaskKind::SnapshotAndReplication, "tank", Cadence::Daily, "00:00")
        .with_retention(3)
        .to(ReplicationTarget::local("backup/tank"));
    let mut harness = Harness::new(backend.clone(), vec![task]);

    let reports = harness.run_days(1..=6).await;
    assert_eq!(reports.len(), 6);

    assert_eq!(
        reports[0].replications[0].outcome("tank", "backup/tank"),
        Some(&ReplicationOutcome::FullSend {
            snapshot: format!("tank@{}", daily(1)),
        })
    );
    for (i, report) in reports.iter().enumerate().skip(1) {
        assert_eq!(
            report.replications[0].outcome("tank", "backup/tank"),
            Some(&ReplicationOutcome::Incremental {
                applied: vec![format!("tank@{}", daily(i as u32 + 1))],
            })
        );
    }

    // source keeps three, the destination is never pruned
    assert_eq!(backend.snapshots(None, "tank"), labels(4..=6));
    assert_eq!(backend.snapshots(None, "backup/tank"), labels(1..=6));
}

#[tokio::test]
async fn test_failed_increment_resumes_next_day() {
    let backend = backend_with(&[]);
    backend.add_host("h1");
    let task = Task::new(TaskKind::SnapshotAndReplication, "tank", Cadence::Daily, "00:00")
        .with_retention(3)
        .to(ReplicationTarget::remote("backup/tank", "h1"));
    let mut harness = Harness::new(backend.clone(), vec![task]);

    harness.run_days(1..=2).await;
    backend.fail(BackendOp::SendIncremental, &format!("tank@{}", daily(3)));
    let day3 = harness.run_days(3..=3).await;
    assert_eq!(
        day3[0].replications[0].outcome("tank", "backup/tank@h1"),
        Some(&ReplicationOutcome::PartialChain {
            applied: vec![],
            failed: format!("tank@{}", daily(3)),
            error: format!(
                "tank@{}: injected SendIncremental failure",
                daily(3)
            ),
            skipped: 0,
        })
    );

    backend.clear_failures();
    let day4 = harness.run_days(4..=4).await;
    assert_eq!(
        day4[0].replications[0].outcome("tank", "backup/tank@h1"),
        Some(&ReplicationOutcome::Incremental {
            applied: vec![format!("tank@{}", daily(3)), format!("tank@{}", daily(4))],
        })
    );
    assert_eq!(backend.snapshots(Some("h1"), "backup/tank"), labels(1..=4));
}

#[tokio::test]
async fn test_outage_longer_than_retention_breaks_the_chain() {
    let backend = backend_with(&[]);
    let task = Task::new(TaskKind::SnapshotAndReplication, "tank", Cadence::Daily, "00:00")
        .with_retention(2)
        .to(ReplicationTarget::local("backup/tank"));
    let mut harness = Harness::new(backend.clone(), vec![task]);

    harness.run_days(1..=1).await;
    backend.fail(BackendOp::SendIncremental, &format!("tank@{}", daily(2)));
    harness.run_days(2..=2).await;

    // day 1 was pruned from the source, so nothing is shared any more
    let day3 = harness.run_days(3..=3).await;
    assert_eq!(
        day3[0].replications[0].outcome("tank", "backup/tank"),
        Some(&ReplicationOutcome::NotPlanned {
            reason: PlanError::NoCommonAncestor,
        })
    );
    assert_eq!(backend.snapshots(None, "backup/tank"), labels(1..=1));
}

#[tokio::test]
async fn test_recursive_replication_to_remote_host() {
    let backend = backend_with(&["tank/a", "tank/a/b", "tank/c"]);
    backend.add_host("h1");
    let task = Task::new(TaskKind::SnapshotAndReplication, "tank", Cadence::Daily, "00:00")
        .with_retention(5)
        .recursive()
        .raw()
        .to(ReplicationTarget::remote("backup/tank", "h1"));
    let mut harness = Harness::new(backend.clone(), vec![task]);

    let reports = harness.run_days(1..=2).await;
    assert!(reports.iter().all(|r| r.replications[0].all_succeeded()));

    for dataset in ["backup/tank", "backup/tank/a", "backup/tank/a/b", "backup/tank/c"] {
        assert_eq!(backend.snapshots(Some("h1"), dataset), labels(1..=2), "{}", dataset);
    }
    assert!(backend.calls().iter().all(|call| match call {
        BackendCall::SendFull { raw, .. } | BackendCall::SendIncremental { raw, .. } => *raw,
        _ => true,
    }));
}

#[tokio::test]
async fn test_separate_snapshot_and_replication_tasks() {
    let backend = backend_with(&[]);
    // replication listed first; the snapshot phase still runs before it
    let tasks = vec![
        Task::new(TaskKind::Replication, "tank", Cadence::Daily, "00:00")
            .to(ReplicationTarget::local("backup/one"))
            .to(ReplicationTarget::local("backup/two")),
        Task::new(TaskKind::Snapshot, "tank", Cadence::Daily, "00:00").with_retention(7),
    ];
    let mut harness = Harness::new(backend.clone(), tasks);

    harness.run_days(1..=3).await;
    assert_eq!(backend.snapshots(None, "backup/one"), labels(1..=3));
    assert_eq!(backend.snapshots(None, "backup/two"), labels(1..=3));
}

#[tokio::test]
async fn test_cadences_are_pruned_independently() {
    let backend = backend_with(&[]);
    let tasks = vec![
        Task::new(TaskKind::Snapshot, "tank", Cadence::Daily, "00:00").with_retention(2),
        Task::new(TaskKind::Snapshot, "tank", Cadence::Hourly, "00").with_retention(10),
    ];
    let mut harness = Harness::new(backend.clone(), tasks);

    harness.run_days(1..=5).await;
    let all = backend.snapshots(None, "tank");
    let daily_count = all.iter().filter(|l| l.ends_with("_daily")).count();
    let hourly_count = all.iter().filter(|l| l.ends_with("_hourly")).count();
    assert_eq!(daily_count, 2);
    assert_eq!(hourly_count, 5);
}

#[tokio::test]
async fn test_hourly_task_fires_once_per_hour() {
    let backend = backend_with(&[]);
    let task = Task::new(TaskKind::Snapshot, "tank", Cadence::Hourly, "15").with_retention(24);
    let mut harness = Harness::new(backend.clone(), vec![task]);

    let reports = harness.run_hour(jan(1)).await;
    assert_eq!(reports.len(), 60);
    assert_eq!(
        backend.snapshots(None, "tank"),
        vec!["auto_2024-01-01_00-15-00_hourly".to_string()]
    );
}

#[tokio::test]
async fn test_weekly_scrub_on_mondays() {
    let backend = backend_with(&[]);
    let task = Task::new(TaskKind::Scrub, "tank", Cadence::Weekly, "Mon 00:00");
    let mut harness = Harness::new(backend.clone(), vec![task]);

    harness.run_days(1..=14).await;
    assert_eq!(backend.scrubbed_pools(), vec!["tank", "tank"]);
}

#[tokio::test]
async fn test_tick_report_json() {
    let backend = backend_with(&[]);
    let task = Task::new(TaskKind::SnapshotAndReplication, "tank", Cadence::Daily, "00:00")
        .with_retention(1)
        .to(ReplicationTarget::local("backup/tank"));
    let mut harness = Harness::new(backend, vec![task]);

    let reports = harness.run_days(1..=1).await;
    let json = serde_json::to_value(&reports[0]).unwrap();
    assert_eq!(json["at"], "2024-01-01T00:00:00Z");
    assert_eq!(
        json["replications"][0]["destinations"][0]["outcome"]["status"],
        "full_send"
    );
    assert_eq!(
        json["snapshots"][0]["datasets"][0]["created"],
        format!("tank@{}", daily(1))
    );
}
