//! Test utilities for keeper integration tests.
//!
//! Provides:
//! - Temporary database fixtures
//! - Test codecs
//! - Polling helper

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use keeper::codec::{CodecError, ValueCodec};
use keeper::{Store, StoreConfig, StoreFeature};
use tempfile::TempDir;

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with a temporary database directory.
    pub fn new() -> Self {
        keeper::observability::tracing::init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self { temp_dir, db_path }
    }

    pub fn config(&self) -> StoreConfig {
        StoreConfig::new(&self.db_path)
    }

    /// Open a store with default collaborators.
    pub fn open(&self) -> Store {
        Store::open(self.config()).expect("failed to open store")
    }

    /// Get the database path as a string.
    pub fn db_path_str(&self) -> &str {
        self.db_path.to_str().expect("invalid path")
    }

    /// Read a row straight from the database, bypassing the store.
    pub fn raw_row(&self, id: &str) -> Option<(Vec<u8>, Option<String>)> {
        let conn = rusqlite::Connection::open(&self.db_path).expect("failed to open db");
        conn.query_row(
            "SELECT data, feature FROM storage WHERE id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok()
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// XORs values tagged [`StoreFeature::Encrypted`]; plain values pass through.
pub struct XorCodec;

const XOR_KEY: u8 = 0x5a;

impl ValueCodec for XorCodec {
    fn encode(&self, bytes: &[u8], features: &[StoreFeature]) -> Result<Vec<u8>, CodecError> {
        Ok(xor_if_encrypted(bytes, features))
    }

    fn decode(&self, bytes: &[u8], features: &[StoreFeature]) -> Result<Vec<u8>, CodecError> {
        Ok(xor_if_encrypted(bytes, features))
    }
}

fn xor_if_encrypted(bytes: &[u8], features: &[StoreFeature]) -> Vec<u8> {
    if features.contains(&StoreFeature::Encrypted) {
        bytes.iter().map(|b| b ^ XOR_KEY).collect()
    } else {
        bytes.to_vec()
    }
}

/// Refuses to encode or decode anything starting with `0xff`.
pub struct PickyCodec;

impl ValueCodec for PickyCodec {
    fn encode(&self, bytes: &[u8], _features: &[StoreFeature]) -> Result<Vec<u8>, CodecError> {
        match bytes.first() {
            Some(0xff) => Err(CodecError::Encode("leading 0xff".into())),
            _ => Ok(bytes.to_vec()),
        }
    }

    fn decode(&self, bytes: &[u8], _features: &[StoreFeature]) -> Result<Vec<u8>, CodecError> {
        match bytes.first() {
            Some(0xff) => Err(CodecError::Decode("leading 0xff".into())),
            _ => Ok(bytes.to_vec()),
        }
    }
}

/// Wait for a condition to become true with timeout.
///
/// Returns `true` if the condition was met, `false` if the timeout expired.
pub fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_temp_dir() {
        let fixture = TestFixture::new();
        assert!(fixture.temp_dir.path().exists());
        assert!(fixture.db_path_str().contains("test.db"));
    }
}
