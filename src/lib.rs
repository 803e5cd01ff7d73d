//! Keeper: an embedded key-value blob store backed by SQLite.
//!
//! Writes are accepted into an in-memory buffer and applied asynchronously by
//! a single worker thread that owns the only database connection. Reads see
//! the caller's own pending writes immediately.
//!
//! # Architecture
//!
//! - **Single writer**: one thread, one connection, one FIFO job queue
//! - **Retries**: database errors put the job back at the head of the queue
//! - **Self-healing**: a worker loop that dies is restarted with its backlog
//! - **Migration**: a legacy store is copied in once, guarded by a marker row
//!
//! # Modules
//!
//! - [`codec`]: Byte transform applied around store and load
//! - [`config`]: Store configuration and the admin CLI
//! - [`error`]: Error types
//! - [`feature`]: Storage feature tags
//! - [`legacy`]: Legacy stores to migrate from
//! - [`observability`]: Tracing setup and worker diagnostics
//! - [`storage`]: Worker, jobs, schema and the [`Store`] facade

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::store::StoreBuilder is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod codec;
pub mod config;
pub mod error;
pub mod feature;
pub mod legacy;
pub mod observability;
pub mod storage;

pub use codec::{CodecError, IdentityCodec, ValueCodec};
pub use config::StoreConfig;
pub use error::StoreError;
pub use feature::StoreFeature;
pub use legacy::{DirectoryLegacyStore, LegacyEntry, LegacyStore, MemoryLegacyStore};
pub use observability::WorkerObserver;
pub use storage::{Job, JobHandle, Store, StoreBuilder, Worker};
