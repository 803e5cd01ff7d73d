//! SQLite schema and row operations.
//!
//! A single table keyed by a unique text id:
//!
//! ```sql
//! CREATE TABLE storage (id TEXT NOT NULL UNIQUE, data BLOB);
//! ALTER TABLE storage ADD COLUMN feature TEXT;
//! ```
//!
//! The `feature` column is added separately so databases created before it
//! existed are upgraded in place.

use rusqlite::{params, Connection, OptionalExtension};

use crate::config::JournalMode;
use crate::feature::StoreFeature;

/// Reserved id holding the legacy migration marker.
pub const MIGRATION_MARKER_ID: &str = "$keeper:legacy-migration-done$";

/// Marker value written once migration completes.
const MIGRATION_DONE: &[u8] = &[1];

/// A row as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub data: Option<Vec<u8>>,
    pub feature: Option<StoreFeature>,
}

/// Apply connection pragmas for the writer connection.
pub fn apply_pragmas(
    conn: &Connection,
    journal_mode: JournalMode,
    busy_timeout_ms: u64,
) -> rusqlite::Result<()> {
    let mode: String = conn.pragma_update_and_check(
        None,
        "journal_mode",
        journal_mode.pragma_value(),
        |row| row.get(0),
    )?;
    tracing::debug!(journal_mode = %mode, "Applied journal mode");
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
    Ok(())
}

/// Create the table and add the feature column if missing. Idempotent.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS storage (
            id TEXT NOT NULL UNIQUE,
            data BLOB
        );
        "#,
    )?;

    match conn.execute("ALTER TABLE storage ADD COLUMN feature TEXT", []) {
        Ok(_) => {
            tracing::debug!("Added feature column to storage table");
            Ok(())
        }
        Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("duplicate column") => {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Read a row by id.
///
/// An unrecognized feature name is logged and read back as no feature.
pub fn read_row(conn: &Connection, id: &str) -> rusqlite::Result<Option<StoredRow>> {
    let row = conn
        .prepare_cached("SELECT data, feature FROM storage WHERE id = ?1")?
        .query_row(params![id], |row| {
            Ok((row.get::<_, Option<Vec<u8>>>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .optional()?;

    Ok(row.map(|(data, feature_name)| {
        let feature = feature_name.and_then(|name| {
            let feature = StoreFeature::from_name(&name);
            if feature.is_none() {
                tracing::warn!(id, feature = %name, "Unknown stored feature, ignoring");
            }
            feature
        });
        StoredRow { data, feature }
    }))
}

/// Insert or replace a row.
pub fn write_row(
    conn: &Connection,
    id: &str,
    data: &[u8],
    feature: Option<StoreFeature>,
) -> rusqlite::Result<()> {
    conn.prepare_cached("INSERT OR REPLACE INTO storage (id, data, feature) VALUES (?1, ?2, ?3)")?
        .execute(params![id, data, feature.map(StoreFeature::name)])?;
    Ok(())
}

/// Insert a row unless the id already has one. Returns whether it was written.
pub fn insert_row_if_absent(
    conn: &Connection,
    id: &str,
    data: &[u8],
    feature: Option<StoreFeature>,
) -> rusqlite::Result<bool> {
    let inserted = conn
        .prepare_cached("INSERT OR IGNORE INTO storage (id, data, feature) VALUES (?1, ?2, ?3)")?
        .execute(params![id, data, feature.map(StoreFeature::name)])?;
    Ok(inserted > 0)
}

/// Delete a row. Returns whether a row existed.
pub fn clear_row(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let deleted = conn
        .prepare_cached("DELETE FROM storage WHERE id = ?1")?
        .execute(params![id])?;
    Ok(deleted > 0)
}

/// Whether the legacy migration marker has been written.
pub fn is_migration_done(conn: &Connection) -> rusqlite::Result<bool> {
    let row = read_row(conn, MIGRATION_MARKER_ID)?;
    Ok(matches!(row, Some(StoredRow { data: Some(ref d), .. }) if d.as_slice() == MIGRATION_DONE))
}

/// Record that the legacy migration has completed.
pub fn mark_migration_done(conn: &Connection) -> rusqlite::Result<()> {
    write_row(conn, MIGRATION_MARKER_ID, MIGRATION_DONE, None)
}

/// Count stored rows, excluding reserved ids.
pub fn count_rows(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM storage WHERE id != ?1",
        params![MIGRATION_MARKER_ID],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = open_test_db();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
    }

    #[test]
    fn test_upgrade_adds_feature_column() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("old.db");

        // Database created before the feature column existed
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch("CREATE TABLE storage (id TEXT NOT NULL UNIQUE, data BLOB);")
                .unwrap();
            conn.execute(
                "INSERT INTO storage (id, data) VALUES ('old', x'0102')",
                [],
            )
            .unwrap();
        }

        let conn = Connection::open(&db_path).unwrap();
        initialize_schema(&conn).unwrap();
        let row = read_row(&conn, "old").unwrap().unwrap();
        assert_eq!(row.data, Some(vec![1, 2]));
        assert_eq!(row.feature, None);

        write_row(&conn, "new", b"x", Some(StoreFeature::Encrypted)).unwrap();
        let row = read_row(&conn, "new").unwrap().unwrap();
        assert_eq!(row.feature, Some(StoreFeature::Encrypted));
    }

    #[test]
    fn test_write_replace_and_clear() {
        let conn = open_test_db();
        assert!(read_row(&conn, "k").unwrap().is_none());

        write_row(&conn, "k", b"v1", None).unwrap();
        write_row(&conn, "k", b"v2", None).unwrap();
        assert_eq!(read_row(&conn, "k").unwrap().unwrap().data, Some(b"v2".to_vec()));
        assert_eq!(count_rows(&conn).unwrap(), 1);

        assert!(clear_row(&conn, "k").unwrap());
        assert!(!clear_row(&conn, "k").unwrap());
        assert!(read_row(&conn, "k").unwrap().is_none());
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let conn = open_test_db();
        assert!(insert_row_if_absent(&conn, "k", b"first", None).unwrap());
        assert!(!insert_row_if_absent(&conn, "k", b"second", None).unwrap());
        assert_eq!(read_row(&conn, "k").unwrap().unwrap().data, Some(b"first".to_vec()));
    }

    #[test]
    fn test_unknown_feature_reads_as_none() {
        let conn = open_test_db();
        conn.execute(
            "INSERT INTO storage (id, data, feature) VALUES ('k', x'00', 'ROT13')",
            [],
        )
        .unwrap();
        let row = read_row(&conn, "k").unwrap().unwrap();
        assert_eq!(row.feature, None);
        assert_eq!(row.data, Some(vec![0]));
    }

    #[test]
    fn test_migration_marker() {
        let conn = open_test_db();
        assert!(!is_migration_done(&conn).unwrap());

        write_row(&conn, MIGRATION_MARKER_ID, &[2], None).unwrap();
        assert!(!is_migration_done(&conn).unwrap());

        mark_migration_done(&conn).unwrap();
        assert!(is_migration_done(&conn).unwrap());
        assert_eq!(count_rows(&conn).unwrap(), 0);
    }
}
