//! Worker counters.
//!
//! Key counters:
//! - connections_opened: run loops that opened a connection
//! - restarts: run loops restarted after an unexpected exit
//! - jobs_retried / jobs_failed: job attempts that hit errors

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::Connection;

use super::observer::WorkerObserver;
use crate::error::StoreError;

/// Observer that counts worker events.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    restarts: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_failed: AtomicU64,
    halted: AtomicU64,
}

/// Point-in-time copy of [`WorkerCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCountersSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub restarts: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub halted: u64,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WorkerCountersSnapshot {
        WorkerCountersSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            halted: self.halted.load(Ordering::Relaxed),
        }
    }
}

impl WorkerObserver for WorkerCounters {
    fn connection_opened(&self, _generation: u64, _conn: &Connection) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_closed(&self, _generation: u64) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    fn job_retried(&self, _label: &str, _attempts_left: u32) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    fn job_failed(&self, _label: &str, _error: &StoreError) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn worker_restarted(&self, _generation: u64) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    fn worker_halted(&self, _error: &StoreError) {
        self.halted.fetch_add(1, Ordering::Relaxed);
    }
}
