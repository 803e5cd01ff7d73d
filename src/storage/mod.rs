//! SQLite storage layer for keeper.
//!
//! Provides:
//! - Schema initialization and in-place upgrades
//! - The single worker thread that owns the connection
//! - Retriable jobs with single-shot completion handles
//! - The coalescing pending-write buffer and its flush
//! - One-time migration from a legacy store

pub mod job;
pub mod migration;
pub mod pending;
pub mod schema;
pub mod store;
pub mod worker;

pub use job::{Job, JobHandle};
pub use migration::{migrate, MigrationOutcome};
pub use store::{Store, StoreBuilder};
pub use worker::{Initializer, Worker};
