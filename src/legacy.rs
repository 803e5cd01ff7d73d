//! Legacy stores that the one-time migration copies entries from.
//!
//! Provides:
//! - The [`LegacyStore`] trait consumed by the migration job
//! - [`MemoryLegacyStore`] for embedding applications and tests
//! - [`DirectoryLegacyStore`] for the file-per-entry directory layout

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::feature::StoreFeature;

/// Suffix of the sidecar file listing an entry's feature names.
const FEATURES_SUFFIX: &str = ".features";

/// Error type for legacy store access.
#[derive(Debug, Error)]
pub enum LegacyError {
    #[error("Legacy store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read legacy entry '{path}': {source}")]
    Entry {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Handle to one entry of a legacy store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LegacyEntry {
    path: String,
}

impl LegacyEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Id-like path of the entry; becomes the key in the new store.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Read-only view of a store being migrated from.
pub trait LegacyStore: Send + Sync {
    /// Enumerate every entry. Failure aborts migration for this run.
    fn entries(&self) -> Result<Vec<LegacyEntry>, LegacyError>;

    /// Feature tags the entry was written with.
    fn features(&self, entry: &LegacyEntry) -> Result<Vec<StoreFeature>, LegacyError>;

    /// Raw bytes of the entry, or `None` if it vanished.
    fn load(&self, entry: &LegacyEntry) -> Result<Option<Vec<u8>>, LegacyError>;
}

/// In-memory legacy store.
#[derive(Debug, Default)]
pub struct MemoryLegacyStore {
    entries: Mutex<BTreeMap<String, (Vec<u8>, Vec<StoreFeature>)>>,
}

impl MemoryLegacyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    pub fn insert(&self, path: impl Into<String>, bytes: Vec<u8>, features: Vec<StoreFeature>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(path.into(), (bytes, features));
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entry<T>(
        &self,
        entry: &LegacyEntry,
        f: impl FnOnce(&(Vec<u8>, Vec<StoreFeature>)) -> T,
    ) -> Option<T> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(entry.path()).map(f)
    }
}

impl LegacyStore for MemoryLegacyStore {
    fn entries(&self) -> Result<Vec<LegacyEntry>, LegacyError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.keys().map(LegacyEntry::new).collect())
    }

    fn features(&self, entry: &LegacyEntry) -> Result<Vec<StoreFeature>, LegacyError> {
        Ok(self
            .with_entry(entry, |(_, features)| features.clone())
            .unwrap_or_default())
    }

    fn load(&self, entry: &LegacyEntry) -> Result<Option<Vec<u8>>, LegacyError> {
        Ok(self.with_entry(entry, |(bytes, _)| bytes.clone()))
    }
}

/// Legacy store laid out as one file per entry under a root directory.
///
/// The entry id is the file's path relative to the root, joined with `/`.
/// An optional `<file>.features` sidecar lists feature names, one per line.
#[derive(Debug, Clone)]
pub struct DirectoryLegacyStore {
    root: PathBuf,
}

impl DirectoryLegacyStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn file_for(&self, entry: &LegacyEntry) -> PathBuf {
        entry
            .path()
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut Vec<LegacyEntry>) -> std::io::Result<()> {
        for item in fs::read_dir(dir)? {
            let item = item?;
            let name = item.file_name().to_string_lossy().into_owned();
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let file_type = item.file_type()?;
            if file_type.is_dir() {
                self.collect(&item.path(), &path, out)?;
            } else if file_type.is_file() && !name.ends_with(FEATURES_SUFFIX) {
                out.push(LegacyEntry::new(path));
            }
        }
        Ok(())
    }
}

impl LegacyStore for DirectoryLegacyStore {
    fn entries(&self) -> Result<Vec<LegacyEntry>, LegacyError> {
        let mut out = Vec::new();
        self.collect(&self.root, "", &mut out).map_err(|e| {
            LegacyError::Unavailable(format!("{}: {e}", self.root.display()))
        })?;
        out.sort();
        Ok(out)
    }

    fn features(&self, entry: &LegacyEntry) -> Result<Vec<StoreFeature>, LegacyError> {
        let mut sidecar = self.file_for(entry).into_os_string();
        sidecar.push(FEATURES_SUFFIX);
        let text = match fs::read_to_string(PathBuf::from(sidecar)) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LegacyError::Entry {
                    path: entry.path().to_string(),
                    source,
                })
            }
        };

        let mut features = Vec::new();
        for name in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match StoreFeature::from_name(name) {
                Some(feature) => features.push(feature),
                None => tracing::warn!(
                    path = entry.path(),
                    feature = name,
                    "Unknown feature in legacy sidecar, ignoring"
                ),
            }
        }
        Ok(features)
    }

    fn load(&self, entry: &LegacyEntry) -> Result<Option<Vec<u8>>, LegacyError> {
        match fs::read(self.file_for(entry)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(LegacyError::Entry {
                path: entry.path().to_string(),
                source,
            }),
        }
    }
}
