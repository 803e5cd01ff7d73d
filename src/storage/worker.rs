//! Dedicated database thread.
//!
//! The worker owns exactly one SQLite connection. Its run loop:
//! - Opens the connection (failure halts the worker for good)
//! - Runs the [`Initializer`] to completion (failure or panic halts it)
//! - Pops jobs off the head of the queue until stopped or the connection
//!   becomes unusable
//!
//! Database errors are retried by putting the job back at the head of the
//! queue. A loop that ends without a stop request is replaced by a new one
//! with the backlog intact. Every loop carries a generation number; a loop
//! whose generation is no longer current never touches the queue again.

use std::collections::VecDeque;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use rusqlite::{Connection, OpenFlags};

use super::job::{run_step, Job};
use super::schema::apply_pragmas;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::observability::WorkerObserver;

/// Work run on every fresh connection before any queued job.
pub trait Initializer: Send + Sync {
    fn initialize(&self, conn: &Connection) -> Result<(), StoreError>;
}

impl<F> Initializer for F
where
    F: Fn(&Connection) -> Result<(), StoreError> + Send + Sync,
{
    fn initialize(&self, conn: &Connection) -> Result<(), StoreError> {
        self(conn)
    }
}

/// Why a run loop ended.
#[derive(Debug)]
enum LoopExit {
    /// Stop requested, or the loop is no longer current.
    Stopped,
    /// A connection-fatal database error.
    Unusable,
    /// Open or initialization failed.
    Halted(String),
    Panicked,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Job>,
    running: bool,
    stop_requested: bool,
    halted: Option<String>,
    generation: u64,
}

struct Shared {
    config: StoreConfig,
    initializer: Arc<dyn Initializer>,
    observer: Arc<dyn WorkerObserver>,
    state: Mutex<State>,
    /// Signalled when a job is queued or stop is requested.
    available: Condvar,
    /// Signalled when a run loop exits.
    exited: Condvar,
}

/// Handle to the single-threaded owner of one database connection.
#[derive(Clone)]
pub struct Worker {
    shared: Arc<Shared>,
}

impl Worker {
    /// Create a stopped worker. The thread starts on [`Worker::start`] or the
    /// first [`Worker::enqueue`].
    pub fn new(
        config: StoreConfig,
        initializer: Arc<dyn Initializer>,
        observer: Arc<dyn WorkerObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                initializer,
                observer,
                state: Mutex::new(State::default()),
                available: Condvar::new(),
                exited: Condvar::new(),
            }),
        }
    }

    /// Spawn the run loop unless one is running or stop was requested.
    pub fn start(&self) -> Result<(), StoreError> {
        let mut state = self.shared.lock();
        if state.running {
            tracing::warn!("Worker already running, ignoring start");
            return Ok(());
        }
        if state.stop_requested {
            tracing::warn!("Worker stop requested, ignoring start");
            return Ok(());
        }
        if let Some(reason) = &state.halted {
            tracing::warn!(reason = %reason, "Worker halted, ignoring start");
            return Ok(());
        }
        Shared::spawn(&self.shared, &mut state)
    }

    /// Append a job to the queue, starting the run loop if needed.
    ///
    /// After [`Worker::stop`] the job is cancelled without running.
    pub fn enqueue(&self, job: Job) {
        let mut state = self.shared.lock();
        if state.stop_requested {
            drop(state);
            job.cancelled();
            return;
        }
        if let Some(reason) = state.halted.clone() {
            drop(state);
            job.fail(StoreError::WorkerHalted(reason));
            return;
        }

        state.queue.push_back(job);
        self.shared.available.notify_one();

        if !state.running {
            if let Err(e) = Shared::spawn(&self.shared, &mut state) {
                tracing::error!(error = %e, "Failed to start worker");
                let drained = self.shared.halt(&mut state, e.to_string());
                drop(state);
                fail_all(drained, &e.to_string());
            }
        }
    }

    /// Request the run loop to stop. Does not wait for it.
    ///
    /// The in-flight job finishes; queued jobs are cancelled once the loop
    /// observes the request.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        if !state.stop_requested {
            tracing::info!(queued = state.queue.len(), "Worker stop requested");
        }
        state.stop_requested = true;
        self.shared.available.notify_all();
    }

    /// Block until no run loop is active.
    ///
    /// Only returns once the worker is stopped or halted; call
    /// [`Worker::stop`] first.
    pub fn join(&self) {
        let mut state = self.shared.lock();
        while state.running {
            state = self
                .shared
                .exited
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Number of jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Reason the worker halted, if it did.
    pub fn halted(&self) -> Option<String> {
        self.shared.lock().halted.clone()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new run loop generation. Caller holds the state lock.
    fn spawn(shared: &Arc<Shared>, state: &mut State) -> Result<(), StoreError> {
        let generation = state.generation + 1;
        let loop_shared = Arc::clone(shared);
        thread::Builder::new()
            .name(format!("keeper-worker-{generation}"))
            .spawn(move || run_loop(loop_shared, generation))
            .map_err(StoreError::Spawn)?;
        state.generation = generation;
        state.running = true;
        Ok(())
    }

    /// Mark the worker halted and take the backlog. Caller holds the lock.
    fn halt(&self, state: &mut State, reason: String) -> Vec<Job> {
        self.observer
            .worker_halted(&StoreError::WorkerHalted(reason.clone()));
        state.halted = Some(reason);
        state.queue.drain(..).collect()
    }

    fn open_connection(&self) -> Result<Connection, StoreError> {
        let path = &self.config.path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        apply_pragmas(&conn, self.config.journal_mode, self.config.busy_timeout_ms)?;
        Ok(conn)
    }

    /// Body of one run loop generation.
    fn run(&self, generation: u64) -> LoopExit {
        let conn = match self.open_connection() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(
                    path = %self.config.path.display(),
                    error = %e,
                    "Failed to open database, worker halted"
                );
                return LoopExit::Halted(format!("failed to open database: {e}"));
            }
        };
        tracing::info!(generation, path = %self.config.path.display(), "Worker started");
        self.observer.connection_opened(generation, &conn);

        let exit = self.process(&conn, generation);

        if let Err((_, e)) = conn.close() {
            tracing::warn!(generation, error = %e, "Failed to close connection cleanly");
        }
        self.observer.connection_closed(generation);
        tracing::info!(generation, ?exit, "Worker loop exited");
        exit
    }

    fn process(&self, conn: &Connection, generation: u64) -> LoopExit {
        let initializer = Arc::clone(&self.initializer);
        // A panicking initializer would panic again on every restart
        let init = panic::catch_unwind(AssertUnwindSafe(|| {
            run_step(
                conn,
                "initialize",
                self.config.job_attempts,
                move |conn: &Connection| initializer.initialize(conn),
            )
        }));
        match init {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(generation, error = %e, "Initialization failed, worker halted");
                return LoopExit::Halted(format!("initialization failed: {e}"));
            }
            Err(_) => {
                tracing::error!(generation, "Initialization panicked, worker halted");
                return LoopExit::Halted("initialization panicked".to_string());
            }
        }

        while let Some(mut job) = self.next_job(generation) {
            let label = job.label().to_string();
            match job.perform(conn) {
                Ok(()) => tracing::debug!(job = %label, "Job completed"),
                Err(e) if e.is_database() => {
                    let fatal = e.is_connection_fatal();
                    if job.sqlite_failed(&e) {
                        tracing::warn!(
                            job = %label,
                            attempts_left = job.attempts_left(),
                            error = %e,
                            "Database error, retrying job"
                        );
                        self.observer.job_retried(&label, job.attempts_left());
                        self.requeue_front(job);
                    } else {
                        tracing::error!(job = %label, error = %e, "Job failed, attempts exhausted");
                        self.observer.job_failed(&label, &e);
                        job.fail(e);
                    }
                    if fatal {
                        tracing::warn!(generation, "Connection unusable, ending worker loop");
                        return LoopExit::Unusable;
                    }
                }
                Err(e) => {
                    tracing::error!(job = %label, error = %e, "Job failed");
                    self.observer.job_failed(&label, &e);
                    job.fail(e);
                }
            }
        }
        LoopExit::Stopped
    }

    /// Block until a job is available for this generation.
    fn next_job(&self, generation: u64) -> Option<Job> {
        let mut state = self.lock();
        loop {
            if state.generation != generation || state.stop_requested {
                return None;
            }
            if let Some(job) = state.queue.pop_front() {
                return Some(job);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn requeue_front(&self, job: Job) {
        self.lock().queue.push_front(job);
    }

    /// Settle the worker after a run loop ends.
    fn on_loop_exit(shared: &Arc<Shared>, generation: u64, exit: LoopExit) {
        let mut state = shared.lock();
        if state.generation != generation {
            tracing::debug!(generation, "Stale worker loop exited");
            return;
        }
        state.running = false;

        let (drained, reason) = if state.stop_requested {
            (state.queue.drain(..).collect(), None)
        } else {
            match exit {
                LoopExit::Halted(reason) => {
                    let drained = shared.halt(&mut state, reason.clone());
                    (drained, Some(reason))
                }
                other => {
                    if matches!(other, LoopExit::Panicked) {
                        tracing::error!(generation, "Worker thread panicked");
                    }
                    match Shared::spawn(shared, &mut state) {
                        Ok(()) => {
                            tracing::info!(
                                generation = state.generation,
                                queued = state.queue.len(),
                                "Worker restarted"
                            );
                            shared.observer.worker_restarted(state.generation);
                            (Vec::new(), None)
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to restart worker");
                            let reason = e.to_string();
                            (shared.halt(&mut state, reason.clone()), Some(reason))
                        }
                    }
                }
            }
        };
        shared.exited.notify_all();
        drop(state);

        match reason {
            Some(reason) => fail_all(drained, &reason),
            None => {
                if !drained.is_empty() {
                    tracing::info!(count = drained.len(), "Cancelling queued jobs");
                }
                drained.into_iter().for_each(Job::cancelled);
            }
        }
    }
}

fn fail_all(jobs: Vec<Job>, reason: &str) {
    for job in jobs {
        job.fail(StoreError::WorkerHalted(reason.to_string()));
    }
}

/// Reports the loop's exit to the worker, including exits by panic.
struct ExitGuard {
    shared: Arc<Shared>,
    generation: u64,
    exit: Option<LoopExit>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let exit = if thread::panicking() {
            LoopExit::Panicked
        } else {
            self.exit.take().unwrap_or(LoopExit::Stopped)
        };
        Shared::on_loop_exit(&self.shared, self.generation, exit);
    }
}

fn run_loop(shared: Arc<Shared>, generation: u64) {
    let mut guard = ExitGuard {
        shared: Arc::clone(&shared),
        generation,
        exit: None,
    };
    guard.exit = Some(shared.run(generation));
}
