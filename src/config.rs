//! Configuration for the keeper store and admin CLI.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Deserializable [`StoreConfig`] for embedding applications

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::StoreError;

/// Default busy timeout for the writer connection.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default attempt budget for a single job.
pub const DEFAULT_JOB_ATTEMPTS: u32 = 3;

/// SQLite journal mode for the writer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
}

impl JournalMode {
    pub fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "wal",
            JournalMode::Delete => "delete",
        }
    }
}

/// Configuration for a [`Store`](crate::Store) and its worker.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Attempts per job before a database error is surfaced.
    #[serde(default = "default_job_attempts")]
    pub job_attempts: u32,
    #[serde(default)]
    pub journal_mode: JournalMode,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_job_attempts() -> u32 {
    DEFAULT_JOB_ATTEMPTS
}

impl StoreConfig {
    /// Create a configuration with defaults for the given database path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            job_attempts: DEFAULT_JOB_ATTEMPTS,
            journal_mode: JournalMode::default(),
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.job_attempts == 0 {
            return Err(StoreError::Config(
                "job_attempts must be greater than zero".to_string(),
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Config("path must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Keeper: inspect and maintain an embedded keeper store.
#[derive(Parser, Debug, Clone)]
#[command(name = "keeper")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Path to the SQLite database file
    #[arg(long, env = "KEEPER_DB", default_value = "./keeper.db")]
    pub db: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_level: String,

    /// Attempts per database job before failing
    #[arg(long, env = "KEEPER_JOB_ATTEMPTS", default_value_t = DEFAULT_JOB_ATTEMPTS)]
    pub job_attempts: u32,

    /// SQLite busy timeout in milliseconds
    #[arg(long, env = "KEEPER_BUSY_TIMEOUT_MS", default_value_t = DEFAULT_BUSY_TIMEOUT_MS)]
    pub busy_timeout_ms: u64,

    /// SQLite journal mode
    #[arg(long, value_enum, default_value_t = JournalMode::Wal)]
    pub journal_mode: JournalMode,

    #[command(subcommand)]
    pub command: Command,
}

/// Admin commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the value stored under an id
    Get {
        id: String,
        /// Print a JSON object instead of raw bytes
        #[arg(long)]
        json: bool,
    },
    /// Store a UTF-8 value under an id
    Put { id: String, value: String },
    /// Clear the value stored under an id
    Clear { id: String },
    /// Migrate a legacy directory store into the database
    Migrate { legacy_dir: PathBuf },
    /// Print worker statistics as JSON
    Stats,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Store configuration derived from the CLI options.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.db.clone(),
            busy_timeout_ms: self.busy_timeout_ms,
            job_attempts: self.job_attempts,
            journal_mode: self.journal_mode,
        }
    }
}
