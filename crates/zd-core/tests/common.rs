//! Common fixtures for zd-core integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use zd_core::{MemoryBackend, Scheduler, Task, TickReport};

/// Midnight UTC on the given day of January 2024. Jan 1st is a Monday.
pub fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

/// Daily auto label taken at midnight on `day` of January 2024.
pub fn daily(day: u32) -> String {
    format!("auto_2024-01-{:02}_00-00-00_daily", day)
}

/// Backend with a local pool `tank` and the given child datasets.
pub fn backend_with(children: &[&str]) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_pool("tank");
    for child in children {
        backend.add_dataset(None, child);
    }
    backend
}

/// Scheduler that drives `tasks` one day at a time.
pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub scheduler: Scheduler,
}

impl Harness {
    pub fn new(backend: Arc<MemoryBackend>, tasks: Vec<Task>) -> Self {
        Self {
            scheduler: Scheduler::new(backend.clone(), tasks),
            backend,
        }
    }

    /// Tick at midnight of each day in `days`, returning the reports.
    pub async fn run_days(&mut self, days: std::ops::RangeInclusive<u32>) -> Vec<TickReport> {
        let mut reports = Vec::new();
        for day in days {
            if let Some(report) = self.scheduler.tick(jan(day)).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Tick every minute of the hour after `start`.
    pub async fn run_hour(&mut self, start: DateTime<Utc>) -> Vec<TickReport> {
        let mut reports = Vec::new();
        for minute in 0..60 {
            if let Some(report) = self.scheduler.tick(start + Duration::minutes(minute)).await {
                reports.push(report);
            }
        }
        reports
    }
}
