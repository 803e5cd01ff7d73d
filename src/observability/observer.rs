//! Diagnostic hook for the worker lifecycle.
//!
//! Applications that need to inspect the live connection (debug actions,
//! crash testing) install an observer when building the store instead of
//! reaching for process-wide state.

use rusqlite::Connection;

use crate::error::StoreError;

/// Receives worker lifecycle events. All methods default to no-ops.
///
/// Methods are called on the worker thread and must not block on store
/// operations.
pub trait WorkerObserver: Send + Sync {
    /// A run loop opened its connection.
    fn connection_opened(&self, _generation: u64, _conn: &Connection) {}

    /// A run loop disposed its connection.
    fn connection_closed(&self, _generation: u64) {}

    /// A job hit a database error and was requeued.
    fn job_retried(&self, _label: &str, _attempts_left: u32) {}

    /// A job failed permanently.
    fn job_failed(&self, _label: &str, _error: &StoreError) {}

    /// A run loop ended without a stop request and a new one was started.
    fn worker_restarted(&self, _generation: u64) {}

    /// The worker gave up: no further jobs will run.
    fn worker_halted(&self, _error: &StoreError) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl WorkerObserver for NoopObserver {}
