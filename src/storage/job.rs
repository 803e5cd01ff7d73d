//! Units of database work executed by the worker thread.
//!
//! A [`Job`] owns its body and an attempt budget. The paired [`JobHandle`]
//! receives exactly one terminal outcome over a single-shot channel, so a job
//! cannot be completed twice and a waiter cannot miss the result.

use std::borrow::Cow;
use std::fmt;

use rusqlite::Connection;
use tokio::sync::oneshot;

use crate::error::StoreError;

/// Type-erased job body plus its completion sender.
trait Task: Send {
    /// Run the body. On success the outcome is delivered.
    fn run(&mut self, conn: &Connection) -> Result<(), StoreError>;

    /// Deliver a failure. Returns false if an outcome was already delivered.
    fn fail(&mut self, error: StoreError) -> bool;
}

struct TaskFn<T, F> {
    body: F,
    done: Option<oneshot::Sender<Result<T, StoreError>>>,
}

impl<T, F> Task for TaskFn<T, F>
where
    T: Send,
    F: FnMut(&Connection) -> Result<T, StoreError> + Send,
{
    fn run(&mut self, conn: &Connection) -> Result<(), StoreError> {
        let value = (self.body)(conn)?;
        if let Some(done) = self.done.take() {
            // Receiver dropped means nobody is waiting
            let _ = done.send(Ok(value));
        }
        Ok(())
    }

    fn fail(&mut self, error: StoreError) -> bool {
        match self.done.take() {
            Some(done) => {
                let _ = done.send(Err(error));
                true
            }
            None => false,
        }
    }
}

/// A unit of database work with a bounded retry budget.
pub struct Job {
    label: Cow<'static, str>,
    attempts_left: u32,
    task: Box<dyn Task>,
}

impl Job {
    /// Create a job and the handle its result is delivered to.
    ///
    /// `attempts` is clamped to at least one.
    pub fn new<T, F>(
        label: impl Into<Cow<'static, str>>,
        attempts: u32,
        body: F,
    ) -> (Job, JobHandle<T>)
    where
        T: Send + 'static,
        F: FnMut(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = Job {
            label: label.into(),
            attempts_left: attempts.max(1),
            task: Box::new(TaskFn {
                body,
                done: Some(tx),
            }),
        };
        (job, JobHandle { rx })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn attempts_left(&self) -> u32 {
        self.attempts_left
    }

    /// Execute the body against the connection.
    ///
    /// On success the job is complete and its waiter is woken. On error the
    /// job stays pending; the caller decides between [`Job::sqlite_failed`]
    /// and [`Job::fail`]. Only the worker thread calls this.
    pub fn perform(&mut self, conn: &Connection) -> Result<(), StoreError> {
        self.task.run(conn)
    }

    /// Record a failed attempt. Returns true while attempts remain.
    pub fn sqlite_failed(&mut self, error: &StoreError) -> bool {
        self.attempts_left = self.attempts_left.saturating_sub(1);
        tracing::debug!(
            job = %self.label,
            attempts_left = self.attempts_left,
            error = %error,
            "Job attempt failed"
        );
        self.attempts_left > 0
    }

    /// Mark the job permanently failed and wake its waiter.
    pub fn fail(mut self, error: StoreError) {
        let label = self.label.clone();
        if !self.task.fail(error) {
            tracing::warn!(job = %label, "Job failed after it already completed");
        }
    }

    /// Fail the job with [`StoreError::Cancelled`] without running it.
    pub fn cancelled(self) {
        tracing::debug!(job = %self.label, "Job cancelled");
        self.fail(StoreError::Cancelled);
    }

    /// Run the job to a terminal state on the calling thread, retrying
    /// database errors immediately while the budget lasts.
    ///
    /// The outcome is delivered to the job's handle as usual.
    pub(crate) fn run_inline(mut self, conn: &Connection) {
        loop {
            match self.perform(conn) {
                Ok(()) => return,
                Err(e) if e.is_database() && !e.is_connection_fatal() && self.sqlite_failed(&e) => {
                    tracing::warn!(
                        job = %self.label,
                        attempts_left = self.attempts_left,
                        error = %e,
                        "Retrying job"
                    );
                }
                Err(e) => return self.fail(e),
            }
        }
    }
}

/// Run a body as an inline job on the worker thread and return its outcome.
pub(crate) fn run_step<T, F>(
    conn: &Connection,
    label: impl Into<Cow<'static, str>>,
    attempts: u32,
    body: F,
) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnMut(&Connection) -> Result<T, StoreError> + Send + 'static,
{
    let (job, handle) = Job::new(label, attempts, body);
    job.run_inline(conn);
    handle.wait()
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("label", &self.label)
            .field("attempts_left", &self.attempts_left)
            .finish_non_exhaustive()
    }
}

/// Receiving side of a job's single-shot completion signal.
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T, StoreError>>,
}

impl<T> JobHandle<T> {
    /// Block until the job reaches a terminal state and return its outcome.
    ///
    /// Parks the calling thread without touching any runtime, so it is safe
    /// on a thread that drives a tokio runtime. Prefer
    /// [`JobHandle::wait_async`] in async code.
    pub fn wait(self) -> Result<T, StoreError> {
        futures::executor::block_on(self.rx).unwrap_or(Err(StoreError::Abandoned))
    }

    /// Block until the job completes; true if it succeeded.
    pub fn wait_done(self) -> bool {
        self.wait().is_ok()
    }

    /// Await the job's outcome.
    pub async fn wait_async(self) -> Result<T, StoreError> {
        self.rx.await.unwrap_or(Err(StoreError::Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn busy() -> StoreError {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[test]
    fn test_perform_delivers_value() {
        let conn = Connection::open_in_memory().unwrap();
        let (mut job, handle) = Job::new("answer", 1, |conn: &Connection| {
            Ok(conn.query_row("SELECT 42", [], |row| row.get::<_, i64>(0))?)
        });
        job.perform(&conn).unwrap();
        drop(job);
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn test_attempt_budget() {
        let (mut job, _handle) = Job::new("budget", 3, |_: &Connection| Ok(()));
        assert!(job.sqlite_failed(&busy()));
        assert!(job.sqlite_failed(&busy()));
        assert!(!job.sqlite_failed(&busy()));
        assert_eq!(job.attempts_left(), 0);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let (job, _handle) = Job::new("clamped", 0, |_: &Connection| Ok(()));
        assert_eq!(job.attempts_left(), 1);
    }

    #[test]
    fn test_cancelled_reports_failure() {
        let (job, handle) = Job::new("cancel", 1, |_: &Connection| Ok(()));
        job.cancelled();
        assert!(matches!(handle.wait(), Err(StoreError::Cancelled)));
    }

    #[test]
    fn test_dropped_job_is_abandoned() {
        let (job, handle) = Job::new("dropped", 1, |_: &Connection| Ok(()));
        drop(job);
        assert!(matches!(handle.wait(), Err(StoreError::Abandoned)));
    }

    #[test]
    fn test_fail_after_success_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        let (mut job, handle) = Job::new("twice", 1, |_: &Connection| Ok(7));
        job.perform(&conn).unwrap();
        job.fail(StoreError::Cancelled);
        assert_eq!(handle.wait().unwrap(), 7);
    }

    #[test]
    fn test_run_inline_retries_then_succeeds() {
        let conn = Connection::open_in_memory().unwrap();
        let mut calls = 0;
        let (job, handle) = Job::new("flaky", 3, move |_: &Connection| {
            calls += 1;
            if calls < 3 {
                Err(busy())
            } else {
                Ok(calls)
            }
        });
        job.run_inline(&conn);
        assert_eq!(handle.wait().unwrap(), 3);
    }

    #[test]
    fn test_run_step_exhausts_budget() {
        let conn = Connection::open_in_memory().unwrap();
        let mut calls = 0;
        let result = run_step(&conn, "doomed", 2, move |_: &Connection| -> Result<(), StoreError> {
            calls += 1;
            assert!(calls <= 2, "ran past its budget");
            Err(busy())
        });
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn test_wait_blocks_inside_runtime() {
        let (job, handle) = Job::new("threaded", 1, |_: &Connection| Ok(5));
        let worker = std::thread::spawn(move || {
            let conn = Connection::open_in_memory().unwrap();
            job.run_inline(&conn);
        });
        assert_eq!(handle.wait().unwrap(), 5);
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn test_wait_async() {
        let conn = Connection::open_in_memory().unwrap();
        let (mut job, handle) = Job::new("async", 1, |_: &Connection| Ok("done"));
        job.perform(&conn).unwrap();
        assert_eq!(handle.wait_async().await.unwrap(), "done");
    }
}
