//! Shared health state for the /health endpoint.
//! Updated by the backfill worker at the start and end of every run.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// Shared run metrics. Written by the worker, read by the API.
#[derive(Default)]
pub struct HealthState {
    /// True while a backfill run is in progress.
    pub running: AtomicBool,
    /// Unix seconds when the last run finished (0 = never).
    pub last_run_at: AtomicI64,
    pub runs_completed: AtomicU64,
    /// Pairs whose update failed in the last run.
    pub last_failed_pairs: AtomicU64,
    /// Pairs with calendar gaps after the last run.
    pub last_incomplete_pairs: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub backfill_running: bool,
    pub last_run_at: Option<i64>,
    pub runs_completed: u64,
    pub last_failed_pairs: u64,
    pub last_incomplete_pairs: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_started(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    pub fn run_finished(&self, at_unix: i64, failed: u64, incomplete: u64) {
        self.last_failed_pairs.store(failed, Ordering::Relaxed);
        self.last_incomplete_pairs.store(incomplete, Ordering::Relaxed);
        self.last_run_at.store(at_unix, Ordering::Relaxed);
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last_run_at = self.last_run_at.load(Ordering::Relaxed);
        HealthSnapshot {
            status: "healthy",
            backfill_running: self.running.load(Ordering::Relaxed),
            last_run_at: (last_run_at > 0).then_some(last_run_at),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            last_failed_pairs: self.last_failed_pairs.load(Ordering::Relaxed),
            last_incomplete_pairs: self.last_incomplete_pairs.load(Ordering::Relaxed),
        }
    }
}
