//! Cadence predicate and the per-minute task scheduler.
//!
//! A task is due when a UTC projection of the current minute equals its
//! `when` string:
//!
//! | cadence | projection    | example     |
//! |---------|---------------|-------------|
//! | hourly  | `mm`          | `05`        |
//! | daily   | `HH:mm`       | `02:30`     |
//! | weekly  | `Weekday HH:mm` | `Mon 00:00` |
//! | monthly | `MM HH:mm` (month of year) | `01 04:00` |
//!
//! A wall-clock minute is not evaluated twice in a row and missed minutes are
//! never caught up, so a tick that overruns the next minute skips that
//! minute's tasks.

use crate::backend::StorageBackend;
use crate::executor::{ScrubReport, SnapshotReport, TaskExecutor};
use crate::label::Cadence;
use crate::replication::ReplicationReport;
use crate::task::{Task, TaskKind};
use chrono::{DateTime, Duration as TimeDelta, NaiveTime, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// `chrono` format of the projection compared against `when`.
pub fn when_format(cadence: Cadence) -> &'static str {
    match cadence {
        Cadence::Hourly => "%M",
        Cadence::Daily => "%H:%M",
        Cadence::Weekly => "%a %H:%M",
        Cadence::Monthly => "%m %H:%M",
    }
}

/// Project `now` onto the `when` format of `cadence`.
pub fn project(cadence: Cadence, now: DateTime<Utc>) -> String {
    now.format(when_format(cadence)).to_string()
}

/// Whether a task with `cadence` and `when` runs at `now`.
pub fn is_due(cadence: Cadence, when: &str, now: DateTime<Utc>) -> bool {
    project(cadence, now) == when
}

/// Whether `when` is a value [`project`] can produce for `cadence`.
/// A task whose `when` fails this check would never run.
pub fn is_valid_when(cadence: Cadence, when: &str) -> bool {
    fn two_digits(s: &str, max: u32) -> Option<u32> {
        if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse().ok().filter(|v| *v <= max)
    }
    fn clock(s: &str) -> bool {
        s.len() == 5 && NaiveTime::parse_from_str(s, "%H:%M").is_ok()
    }

    match cadence {
        Cadence::Hourly => two_digits(when, 59).is_some(),
        Cadence::Daily => clock(when),
        Cadence::Weekly => when
            .split_once(' ')
            .is_some_and(|(day, time)| WEEKDAYS.contains(&day) && clock(time)),
        Cadence::Monthly => when.split_once(' ').is_some_and(|(month, time)| {
            two_digits(month, 12).is_some_and(|m| m >= 1) && clock(time)
        }),
    }
}

/// Start of the minute containing `now`.
pub fn minute_of(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

/// Time left until the start of the next wall-clock minute.
pub fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let next = minute_of(now) + TimeDelta::minutes(1);
    (next - now).to_std().unwrap_or_default()
}

/// Due tasks grouped by phase, each phase in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueTasks {
    /// Tasks that take snapshots.
    pub snapshot: Vec<Task>,
    /// Tasks that replicate.
    pub replication: Vec<Task>,
    /// Tasks that scrub.
    pub scrub: Vec<Task>,
}

impl DueTasks {
    /// Group `tasks` by phase. A combined task lands in both the snapshot
    /// and the replication phase.
    pub fn collect<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut due = Self::default();
        for task in tasks {
            if task.kind == TaskKind::Scrub {
                due.scrub.push(task.clone());
            }
            if task.kind.snapshots() {
                due.snapshot.push(task.clone());
            }
            if task.kind.replicates() {
                due.replication.push(task.clone());
            }
        }
        due
    }

    /// Whether no task is due.
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty() && self.replication.is_empty() && self.scrub.is_empty()
    }
}

/// Everything one tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Minute the tick was evaluated for.
    pub at: DateTime<Utc>,
    /// Snapshot phase results.
    pub snapshots: Vec<SnapshotReport>,
    /// Replication phase results.
    pub replications: Vec<ReplicationReport>,
    /// Scrub phase results.
    pub scrubs: Vec<ScrubReport>,
}

impl TickReport {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            snapshots: Vec::new(),
            replications: Vec::new(),
            scrubs: Vec::new(),
        }
    }

    /// Whether nothing ran.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.replications.is_empty() && self.scrubs.is_empty()
    }
}

/// Holds the task list and evaluates it once per minute.
pub struct Scheduler {
    executor: TaskExecutor,
    tasks: Vec<Task>,
    last_tick: Option<DateTime<Utc>>,
}

impl Scheduler {
    /// Create a scheduler over `backend` with `tasks` in configuration order.
    pub fn new(backend: Arc<dyn StorageBackend>, tasks: Vec<Task>) -> Self {
        Self {
            executor: TaskExecutor::new(backend),
            tasks,
            last_tick: None,
        }
    }

    /// Current task list.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Swap in a freshly loaded task list.
    pub fn replace_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }

    /// Minute of the last evaluated tick.
    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.last_tick
    }

    /// Tasks due at `now`, grouped by phase.
    pub fn due_at(&self, now: DateTime<Utc>) -> DueTasks {
        DueTasks::collect(self.tasks.iter().filter(|t| t.is_due(now)))
    }

    /// Evaluate the minute containing `now`. Returns `None` if that minute
    /// is the one evaluated last. A clock stepped backwards is evaluated
    /// again at the earlier minute.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Option<TickReport> {
        let minute = minute_of(now);
        if self.last_tick == Some(minute) {
            debug!(%minute, "Minute already evaluated");
            return None;
        }
        self.last_tick = Some(minute);

        let due = self.due_at(minute);
        if due.is_empty() {
            debug!(%minute, "No task due");
        }
        Some(self.run(minute, due).await)
    }

    /// Run every task now, regardless of cadence. Does not touch the
    /// last-tick marker.
    pub async fn run_all(&self, now: DateTime<Utc>) -> TickReport {
        self.run(now, DueTasks::collect(&self.tasks)).await
    }

    /// Run the phases in order: snapshots, replications, scrubs.
    pub async fn run(&self, now: DateTime<Utc>, due: DueTasks) -> TickReport {
        let mut report = TickReport::new(now);
        if !due.is_empty() {
            info!(
                snapshot = due.snapshot.len(),
                replication = due.replication.len(),
                scrub = due.scrub.len(),
                "Running due tasks"
            );
        }

        for task in &due.snapshot {
            report.snapshots.push(self.executor.snapshot(task, now).await);
        }
        for task in &due.replication {
            report.replications.push(self.executor.replicate(task).await);
        }
        for task in &due.scrub {
            report.scrubs.push(self.executor.scrub(task).await);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MemoryBackend};
    use crate::target::ReplicationTarget;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_weekly_due_only_at_exact_minute() {
        // 2024-01-01 is a Monday
        assert!(is_due(Cadence::Weekly, "Mon 00:00", at(2024, 1, 1, 0, 0)));
        assert!(!is_due(Cadence::Weekly, "Mon 00:00", at(2024, 1, 1, 0, 1)));
        assert!(!is_due(Cadence::Weekly, "Mon 00:00", at(2024, 1, 2, 0, 0)));
    }

    #[test]
    fn test_projections() {
        let now = at(2024, 3, 9, 14, 5);
        assert_eq!(project(Cadence::Hourly, now), "05");
        assert_eq!(project(Cadence::Daily, now), "14:05");
        assert_eq!(project(Cadence::Weekly, now), "Sat 14:05");
        assert_eq!(project(Cadence::Monthly, now), "03 14:05");
    }

    #[test]
    fn test_hourly_and_daily_due() {
        assert!(is_due(Cadence::Hourly, "30", at(2024, 5, 1, 7, 30)));
        assert!(is_due(Cadence::Hourly, "30", at(2024, 5, 1, 8, 30)));
        assert!(!is_due(Cadence::Hourly, "30", at(2024, 5, 1, 8, 31)));
        assert!(is_due(Cadence::Daily, "23:59", at(2024, 5, 1, 23, 59)));
        assert!(!is_due(Cadence::Daily, "23:59", at(2024, 5, 1, 11, 59)));
    }

    #[test]
    fn test_monthly_uses_month_of_year() {
        assert!(is_due(Cadence::Monthly, "01 00:00", at(2024, 1, 1, 0, 0)));
        assert!(!is_due(Cadence::Monthly, "01 00:00", at(2024, 2, 1, 0, 0)));
    }

    #[test]
    fn test_seconds_are_ignored() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 42).unwrap();
        assert!(is_due(Cadence::Weekly, "Mon 00:00", now));
    }

    #[test]
    fn test_valid_when() {
        assert!(is_valid_when(Cadence::Hourly, "00"));
        assert!(is_valid_when(Cadence::Hourly, "59"));
        assert!(!is_valid_when(Cadence::Hourly, "60"));
        assert!(!is_valid_when(Cadence::Hourly, "5"));
        assert!(is_valid_when(Cadence::Daily, "02:30"));
        assert!(!is_valid_when(Cadence::Daily, "2:30"));
        assert!(!is_valid_when(Cadence::Daily, "24:00"));
        assert!(is_valid_when(Cadence::Weekly, "Sun 03:00"));
        assert!(!is_valid_when(Cadence::Weekly, "Sunday 03:00"));
        assert!(!is_valid_when(Cadence::Weekly, "03:00"));
        assert!(is_valid_when(Cadence::Monthly, "12 00:00"));
        assert!(!is_valid_when(Cadence::Monthly, "00 00:00"));
        assert!(!is_valid_when(Cadence::Monthly, "13 00:00"));
    }

    #[test]
    fn test_until_next_minute() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 45).unwrap();
        assert_eq!(until_next_minute(now), Duration::from_secs(15));
        assert_eq!(until_next_minute(at(2024, 1, 1, 0, 0)), Duration::from_secs(60));
    }

    #[test]
    fn test_combined_task_lands_in_both_phases() {
        let tasks = vec![
            Task::new(TaskKind::Scrub, "tank", Cadence::Weekly, "Sun 00:00"),
            Task::new(TaskKind::SnapshotAndReplication, "tank/a", Cadence::Daily, "00:00"),
            Task::new(TaskKind::Replication, "tank/b", Cadence::Daily, "00:00"),
        ];
        let due = DueTasks::collect(&tasks);
        assert_eq!(due.scrub.len(), 1);
        assert_eq!(due.snapshot.len(), 1);
        assert_eq!(due.replication.len(), 2);
        assert_eq!(due.replication[0].target, "tank/a");
    }

    fn fixture() -> (Arc<MemoryBackend>, Vec<Task>) {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_pool("tank");
        // scrub listed first, replication before snapshot: phases still
        // run snapshot, replication, scrub
        let tasks = vec![
            Task::new(TaskKind::Scrub, "tank", Cadence::Weekly, "Mon 00:00"),
            Task::new(TaskKind::Replication, "tank", Cadence::Daily, "00:00")
                .to(ReplicationTarget::local("backup")),
            Task::new(TaskKind::Snapshot, "tank", Cadence::Daily, "00:00").with_retention(3),
        ];
        (backend, tasks)
    }

    #[tokio::test]
    async fn test_tick_phase_order() {
        let (backend, tasks) = fixture();
        let mut scheduler = Scheduler::new(backend.clone(), tasks);

        let report = scheduler.tick(at(2024, 1, 1, 0, 0)).await.unwrap();
        assert_eq!(report.snapshots.len(), 1);
        assert_eq!(report.replications.len(), 1);
        assert_eq!(report.scrubs.len(), 1);
        // replication saw the snapshot taken in the same tick
        assert!(report.replications[0].all_succeeded());

        let label = "auto_2024-01-01_00-00-00_daily".to_string();
        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::CreateSnapshot {
                    dataset: "tank".to_string(),
                    label: label.clone(),
                },
                BackendCall::SendFull {
                    snapshot: format!("tank@{}", label),
                    destination: "backup".to_string(),
                    raw: false,
                },
                BackendCall::Scrub("tank".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_tick_at_most_once_per_minute() {
        let (backend, tasks) = fixture();
        let mut scheduler = Scheduler::new(backend.clone(), tasks);

        assert!(scheduler.tick(at(2024, 1, 1, 0, 0)).await.is_some());
        let again = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        assert!(scheduler.tick(again).await.is_none());
        assert_eq!(scheduler.last_tick(), Some(at(2024, 1, 1, 0, 0)));

        let next = scheduler.tick(at(2024, 1, 1, 0, 1)).await.unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn test_tick_runs_again_after_clock_steps_back() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_pool("tank");
        let tasks = vec![Task::new(TaskKind::Snapshot, "tank", Cadence::Daily, "10:30").with_retention(2)];
        let mut scheduler = Scheduler::new(backend.clone(), tasks);

        let report = scheduler.tick(at(2024, 1, 1, 11, 0)).await.unwrap();
        assert!(report.is_empty());

        let report = scheduler.tick(at(2024, 1, 1, 10, 30)).await.unwrap();
        assert_eq!(report.snapshots.len(), 1);
        assert_eq!(scheduler.last_tick(), Some(at(2024, 1, 1, 10, 30)));
        assert_eq!(
            backend.snapshots(None, "tank"),
            vec!["auto_2024-01-01_10-30-00_daily"]
        );
    }

    #[tokio::test]
    async fn test_skipped_minute_is_not_caught_up() {
        let (backend, tasks) = fixture();
        let mut scheduler = Scheduler::new(backend.clone(), tasks);

        scheduler.tick(at(2023, 12, 31, 23, 59)).await;
        // the 00:00 tick was missed
        let report = scheduler.tick(at(2024, 1, 1, 0, 1)).await.unwrap();
        assert!(report.is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_all_ignores_cadence() {
        let (backend, tasks) = fixture();
        let scheduler = Scheduler::new(backend.clone(), tasks);

        let report = scheduler.run_all(at(2024, 6, 15, 13, 37)).await;
        assert_eq!(report.snapshots.len(), 1);
        assert_eq!(report.scrubs.len(), 1);
        assert_eq!(scheduler.last_tick(), None);
    }

    #[tokio::test]
    async fn test_replace_tasks() {
        let (backend, tasks) = fixture();
        let mut scheduler = Scheduler::new(backend, tasks);
        scheduler.replace_tasks(Vec::new());
        assert!(scheduler.tasks().is_empty());
        assert!(scheduler.tick(at(2024, 1, 1, 0, 0)).await.unwrap().is_empty());
    }
}
