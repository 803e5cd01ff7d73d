//! One-time migration from a legacy store.
//!
//! Runs on the worker thread as part of initialization, before any queued
//! job. A marker row records completion; until it is written every startup
//! tries again. Entries that already have a row are left alone, so a rerun
//! after an interrupted migration only fills in what is missing.

use rusqlite::Connection;

use super::job::run_step;
use super::schema::{initialize_schema, insert_row_if_absent, is_migration_done, mark_migration_done};
use crate::codec::ValueCodec;
use crate::error::StoreError;
use crate::feature::StoreFeature;
use crate::legacy::{LegacyEntry, LegacyStore};

/// Result of a migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The marker was already present.
    AlreadyDone,
    /// The legacy store could not be enumerated; retried next startup.
    Skipped,
    Completed {
        migrated: usize,
        /// Entries already present in the new store.
        existing: usize,
        /// Entries that could not be read or encoded.
        failed: usize,
    },
}

/// Copy every legacy entry into the store and write the completion marker.
///
/// Per-entry read or encode failures are logged and skipped. A database
/// error that survives its retries aborts the run without the marker.
pub fn migrate(
    conn: &Connection,
    legacy: &dyn LegacyStore,
    codec: &dyn ValueCodec,
    attempts: u32,
) -> Result<MigrationOutcome, StoreError> {
    run_step(conn, "migration:schema", attempts, |conn: &Connection| {
        Ok(initialize_schema(conn)?)
    })?;

    let done = run_step(conn, "migration:check", attempts, |conn: &Connection| {
        Ok(is_migration_done(conn)?)
    })?;
    if done {
        tracing::debug!("Legacy migration already done");
        return Ok(MigrationOutcome::AlreadyDone);
    }

    let entries = match legacy.entries() {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot enumerate legacy store, skipping migration");
            return Ok(MigrationOutcome::Skipped);
        }
    };
    tracing::info!(count = entries.len(), "Migrating legacy entries");

    let (mut migrated, mut existing, mut failed) = (0, 0, 0);
    for entry in entries {
        let (bytes, feature) = match read_entry(legacy, codec, &entry) {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::debug!(path = entry.path(), "Legacy entry vanished, skipping");
                continue;
            }
            Err(e) => {
                tracing::warn!(path = entry.path(), error = %e, "Failed to migrate legacy entry, skipping");
                failed += 1;
                continue;
            }
        };

        let id = entry.path().to_string();
        let written = run_step(conn, "migration:write", attempts, move |conn: &Connection| {
            Ok(insert_row_if_absent(conn, &id, &bytes, feature)?)
        })?;
        if written {
            migrated += 1;
        } else {
            existing += 1;
        }
    }

    run_step(conn, "migration:mark", attempts, |conn: &Connection| {
        Ok(mark_migration_done(conn)?)
    })?;
    tracing::info!(migrated, existing, failed, "Legacy migration complete");

    Ok(MigrationOutcome::Completed {
        migrated,
        existing,
        failed,
    })
}

/// Load and encode one legacy entry. Only the first feature is kept.
fn read_entry(
    legacy: &dyn LegacyStore,
    codec: &dyn ValueCodec,
    entry: &LegacyEntry,
) -> Result<Option<(Vec<u8>, Option<StoreFeature>)>, StoreError> {
    let features = legacy.features(entry)?;
    let Some(raw) = legacy.load(entry)? else {
        return Ok(None);
    };
    let encoded = codec.encode(&raw, &features)?;
    Ok(Some((encoded, features.first().copied())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IdentityCodec;
    use crate::legacy::{LegacyError, MemoryLegacyStore};
    use crate::storage::schema::{count_rows, read_row, write_row};

    struct BrokenLegacy;

    impl LegacyStore for BrokenLegacy {
        fn entries(&self) -> Result<Vec<LegacyEntry>, LegacyError> {
            Err(LegacyError::Unavailable("index missing".into()))
        }

        fn features(&self, _entry: &LegacyEntry) -> Result<Vec<StoreFeature>, LegacyError> {
            unreachable!()
        }

        fn load(&self, _entry: &LegacyEntry) -> Result<Option<Vec<u8>>, LegacyError> {
            unreachable!()
        }
    }

    #[test]
    fn test_migrates_and_marks_done() {
        let conn = Connection::open_in_memory().unwrap();
        let legacy = MemoryLegacyStore::new();
        legacy.insert("a", b"alpha".to_vec(), vec![StoreFeature::Encrypted]);
        legacy.insert("b", b"beta".to_vec(), vec![]);

        let outcome = migrate(&conn, &legacy, &IdentityCodec, 3).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Completed {
                migrated: 2,
                existing: 0,
                failed: 0
            }
        );
        let row = read_row(&conn, "a").unwrap().unwrap();
        assert_eq!(row.data, Some(b"alpha".to_vec()));
        assert_eq!(row.feature, Some(StoreFeature::Encrypted));

        // Second run is a no-op
        legacy.insert("c", b"late".to_vec(), vec![]);
        assert_eq!(
            migrate(&conn, &legacy, &IdentityCodec, 3).unwrap(),
            MigrationOutcome::AlreadyDone
        );
        assert_eq!(count_rows(&conn).unwrap(), 2);
    }

    #[test]
    fn test_enumeration_failure_skips_without_marker() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(
            migrate(&conn, &BrokenLegacy, &IdentityCodec, 3).unwrap(),
            MigrationOutcome::Skipped
        );
        assert!(!is_migration_done(&conn).unwrap());
    }

    #[test]
    fn test_rerun_fills_in_without_overwriting() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        // An interrupted run copied "a"; the application has since changed it
        write_row(&conn, "a", b"newer", None).unwrap();

        let legacy = MemoryLegacyStore::new();
        legacy.insert("a", b"alpha".to_vec(), vec![]);
        legacy.insert("b", b"beta".to_vec(), vec![]);

        let outcome = migrate(&conn, &legacy, &IdentityCodec, 3).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Completed {
                migrated: 1,
                existing: 1,
                failed: 0
            }
        );
        assert_eq!(read_row(&conn, "a").unwrap().unwrap().data, Some(b"newer".to_vec()));
        assert_eq!(read_row(&conn, "b").unwrap().unwrap().data, Some(b"beta".to_vec()));
    }
}
