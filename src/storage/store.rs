//! Public key-value API.
//!
//! Writes land in the [`PendingBuffer`] and are applied by flush jobs on the
//! worker thread. Reads consult the buffer first, so a load always sees the
//! caller's own earlier store or clear on the same instance.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use super::job::{Job, JobHandle};
use super::migration::{migrate, MigrationOutcome};
use super::pending::{PendingBuffer, PendingValue};
use super::schema::{
    clear_row, count_rows, initialize_schema, read_row, write_row, StoredRow, MIGRATION_MARKER_ID,
};
use super::worker::Worker;
use crate::codec::{IdentityCodec, ValueCodec};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::feature::StoreFeature;
use crate::legacy::LegacyStore;
use crate::observability::{NoopObserver, WorkerObserver};

/// Builder for a [`Store`] with optional collaborators.
pub struct StoreBuilder {
    config: StoreConfig,
    codec: Arc<dyn ValueCodec>,
    legacy: Option<Arc<dyn LegacyStore>>,
    observer: Arc<dyn WorkerObserver>,
}

impl StoreBuilder {
    /// Byte transform applied around every store and load.
    pub fn codec<C: ValueCodec + 'static>(mut self, codec: Arc<C>) -> Self {
        self.codec = codec;
        self
    }

    /// Legacy store to migrate from on first startup.
    pub fn legacy<L: LegacyStore + 'static>(mut self, legacy: Arc<L>) -> Self {
        self.legacy = Some(legacy);
        self
    }

    /// Diagnostic hook for worker lifecycle events.
    pub fn observer<O: WorkerObserver + 'static>(mut self, observer: Arc<O>) -> Self {
        self.observer = observer;
        self
    }

    /// Start the worker and wait for schema setup and migration.
    ///
    /// Blocks the calling thread until the worker is ready.
    pub fn open(self) -> Result<Store, StoreError> {
        self.config.validate()?;
        let attempts = self.config.job_attempts;

        let codec = Arc::clone(&self.codec);
        let legacy = self.legacy;
        let migration = Arc::new(Mutex::new(None));
        let last_migration = Arc::clone(&migration);
        let initializer = move |conn: &Connection| -> Result<(), StoreError> {
            initialize_schema(conn)?;
            if let Some(legacy) = &legacy {
                match migrate(conn, legacy.as_ref(), codec.as_ref(), attempts) {
                    Ok(outcome) => {
                        *last_migration.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Legacy migration aborted, retrying on next startup");
                    }
                }
            }
            Ok(())
        };

        let worker = Worker::new(self.config, Arc::new(initializer), self.observer);
        worker.start()?;

        let (readiness, ready) = Job::new("readiness", 1, |_: &Connection| Ok(()));
        worker.enqueue(readiness);
        ready.wait()?;

        Ok(Store {
            worker,
            pending: Arc::new(PendingBuffer::new()),
            codec: self.codec,
            attempts,
            migration,
            closed: false,
        })
    }
}

/// Embedded key-value blob store.
pub struct Store {
    worker: Worker,
    pending: Arc<PendingBuffer>,
    codec: Arc<dyn ValueCodec>,
    attempts: u32,
    migration: Arc<Mutex<Option<MigrationOutcome>>>,
    closed: bool,
}

impl Store {
    /// Open a store with the identity codec and no legacy migration.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        Self::builder(config).open()
    }

    pub fn builder(config: StoreConfig) -> StoreBuilder {
        StoreBuilder {
            config,
            codec: Arc::new(IdentityCodec),
            legacy: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Accept a write. Durability is eventual.
    ///
    /// Only the first feature is persisted with the value.
    pub fn store(&self, id: &str, bytes: &[u8], features: &[StoreFeature]) {
        if id == MIGRATION_MARKER_ID {
            tracing::warn!(id, "Refusing to store under a reserved id");
            return;
        }
        let encoded = match self.codec.encode(bytes, features) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(id, error = %e, "Failed to encode value, dropping write");
                return;
            }
        };
        if features.len() > 1 {
            tracing::debug!(id, count = features.len(), "Only the first feature is persisted");
        }

        let value = PendingValue::Data {
            bytes: encoded,
            feature: features.first().copied(),
        };
        if self.pending.put_if_changed(id, value) {
            self.schedule_flush();
        }
    }

    /// Load the value stored under `id`.
    ///
    /// Pending writes are answered from memory; anything else blocks on a
    /// read job. `features` are used to decode values stored without a tag.
    /// A value that fails to decode is reported as absent.
    pub fn load(&self, id: &str, features: &[StoreFeature]) -> Result<Option<Vec<u8>>, StoreError> {
        if id == MIGRATION_MARKER_ID {
            return Ok(None);
        }

        let (raw, stored_feature) = match self.pending.get(id) {
            Some(value) => match value.as_ref() {
                PendingValue::Cleared => return Ok(None),
                PendingValue::Data { bytes, feature } => (bytes.clone(), *feature),
            },
            None => match self.read(id)? {
                Some(StoredRow {
                    data: Some(data),
                    feature,
                }) => (data, feature),
                _ => return Ok(None),
            },
        };

        let decode_features = match stored_feature {
            Some(feature) => vec![feature],
            None => features.to_vec(),
        };
        match self.codec.decode(&raw, &decode_features) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                tracing::warn!(id, error = %e, "Failed to decode stored value, treating as absent");
                Ok(None)
            }
        }
    }

    /// Mark `id` cleared. Durability is eventual.
    pub fn clear(&self, id: &str) {
        if id == MIGRATION_MARKER_ID {
            tracing::warn!(id, "Refusing to clear a reserved id");
            return;
        }
        if self.pending.put_if_changed(id, PendingValue::Cleared) {
            self.schedule_flush();
        }
    }

    /// True only if every requested feature is understood by the engine.
    pub fn is_supported(&self, features: &[StoreFeature]) -> bool {
        StoreFeature::all_supported(features)
    }

    /// Enqueue a drain of the pending buffer. The handle yields the number of
    /// rows written or cleared.
    pub fn flush(&self) -> JobHandle<usize> {
        let (job, handle) = flush_job(Arc::clone(&self.pending), self.attempts);
        self.worker.enqueue(job);
        handle
    }

    /// Number of writes not yet applied.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Outcome of the most recent legacy migration attempt, if one finished.
    pub fn last_migration(&self) -> Option<MigrationOutcome> {
        *self.migration.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of persisted entries, after flushing pending writes.
    pub fn count(&self) -> Result<u64, StoreError> {
        let pending = Arc::clone(&self.pending);
        let (job, handle) = Job::new("count", self.attempts, move |conn: &Connection| {
            drain_with_fallback(conn, &pending)?;
            let rows = count_rows(conn)?;
            Ok(u64::try_from(rows).unwrap_or_default())
        });
        self.worker.enqueue(job);
        handle.wait()
    }

    /// Flush, stop the worker and wait for it to exit.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.closed = true;
        let flushed = self.flush().wait();
        self.worker.stop();
        self.worker.join();
        flushed.map(|written| {
            tracing::debug!(written, "Store closed");
        })
    }

    fn schedule_flush(&self) {
        let (job, _handle) = flush_job(Arc::clone(&self.pending), self.attempts);
        self.worker.enqueue(job);
    }

    fn read(&self, id: &str) -> Result<Option<StoredRow>, StoreError> {
        let key = id.to_string();
        let (job, handle) = Job::new(format!("read:{id}"), self.attempts, move |conn: &Connection| {
            Ok(read_row(conn, &key)?)
        });
        self.worker.enqueue(job);
        handle.wait().map_err(|e| {
            tracing::error!(id, error = %e, "Read failed");
            StoreError::ReadFailed {
                id: id.to_string(),
                source: Box::new(e),
            }
        })
    }
}

impl Drop for Store {
    /// Flush and stop without blocking. Jobs already queued run first.
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.schedule_flush();
        let worker = self.worker.clone();
        let (stop, _handle) = Job::new("stop", 1, move |_: &Connection| {
            worker.stop();
            Ok(())
        });
        self.worker.enqueue(stop);
    }
}

/// Flush job. Earlier attempts apply the buffer as one batch; the last
/// attempt falls back to per-id writes so one bad row cannot hold back the
/// rest.
fn flush_job(pending: Arc<PendingBuffer>, attempts: u32) -> (Job, JobHandle<usize>) {
    let attempts = attempts.max(1);
    let mut attempt = 0;
    Job::new("flush", attempts, move |conn: &Connection| {
        attempt += 1;
        if attempt < attempts {
            drain_pending(conn, &pending)
        } else {
            drain_with_fallback(conn, &pending)
        }
    })
}

fn apply_value(conn: &Connection, id: &str, value: &PendingValue) -> rusqlite::Result<()> {
    match value {
        PendingValue::Data { bytes, feature } => write_row(conn, id, bytes, *feature),
        PendingValue::Cleared => clear_row(conn, id).map(|_| ()),
    }
}

/// Apply the current pending values in one transaction.
///
/// An entry leaves the buffer only if it still holds the value just written.
fn drain_pending(conn: &Connection, pending: &PendingBuffer) -> Result<usize, StoreError> {
    let ids = pending.ids();
    if ids.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    let mut applied = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(value) = pending.get(&id) else {
            continue;
        };
        apply_value(&tx, &id, &value)?;
        applied.push((id, value));
    }
    tx.commit()?;

    let written = applied.len();
    let superseded = applied
        .into_iter()
        .filter(|(id, value)| !pending.remove_if_same(id, value))
        .count();
    tracing::debug!(written, superseded, "Flushed pending writes");
    Ok(written)
}

/// Batch drain, then per-id writes if the batch hits a database error.
fn drain_with_fallback(conn: &Connection, pending: &PendingBuffer) -> Result<usize, StoreError> {
    match drain_pending(conn, pending) {
        Err(e) if e.is_database() && !e.is_connection_fatal() => {
            tracing::warn!(error = %e, "Batch flush failed, applying pending writes one by one");
            drain_each(conn, pending)
        }
        other => other,
    }
}

/// Apply pending values one statement at a time, keeping failed ids pending.
///
/// Fails only if nothing could be applied.
fn drain_each(conn: &Connection, pending: &PendingBuffer) -> Result<usize, StoreError> {
    let mut written = 0;
    let mut first_error: Option<StoreError> = None;
    for id in pending.ids() {
        let Some(value) = pending.get(&id) else {
            continue;
        };
        match apply_value(conn, &id, &value) {
            Ok(()) => {
                pending.remove_if_same(&id, &value);
                written += 1;
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Failed to apply pending write, keeping it");
                first_error.get_or_insert(e.into());
            }
        }
    }
    match first_error {
        Some(e) if written == 0 => Err(e),
        _ => Ok(written),
    }
}
