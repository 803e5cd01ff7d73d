//! Keeper admin CLI: inspect and maintain an embedded keeper store.
//!
//! # Usage
//!
//! ```bash
//! keeper --db ./keeper.db put greeting hello
//! keeper --db ./keeper.db get greeting --json
//! keeper --db ./keeper.db migrate ./legacy-store
//! ```
//!
//! Environment variables can also be used:
//! - `KEEPER_DB`: Path to the SQLite database
//! - `KEEPER_JOB_ATTEMPTS`: Attempts per database job
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use keeper::config::{Command, Config};
use keeper::legacy::DirectoryLegacyStore;
use keeper::observability::tracing::init_tracing;
use keeper::observability::WorkerCounters;
use keeper::storage::MigrationOutcome;
use keeper::Store;

fn main() -> anyhow::Result<()> {
    let config = Config::parse_args();
    init_tracing(&config.log_level);

    let counters = Arc::new(WorkerCounters::new());
    let mut builder = Store::builder(config.store_config()).observer(Arc::clone(&counters));
    if let Command::Migrate { legacy_dir } = &config.command {
        anyhow::ensure!(
            legacy_dir.is_dir(),
            "legacy store {} is not a directory",
            legacy_dir.display()
        );
        builder = builder.legacy(Arc::new(DirectoryLegacyStore::new(legacy_dir)));
    }
    let store = builder
        .open()
        .with_context(|| format!("failed to open store at {}", config.db.display()))?;

    match &config.command {
        Command::Get { id, json } => {
            let value = store.load(id, &[])?;
            if *json {
                let out = serde_json::json!({
                    "id": id,
                    "found": value.is_some(),
                    "value": value.as_deref().map(String::from_utf8_lossy),
                });
                println!("{out}");
            } else {
                match value {
                    Some(bytes) => std::io::stdout().write_all(&bytes)?,
                    None => anyhow::bail!("no value stored under '{id}'"),
                }
            }
        }
        Command::Put { id, value } => store.store(id, value.as_bytes(), &[]),
        Command::Clear { id } => store.clear(id),
        Command::Migrate { legacy_dir } => match store.last_migration() {
            Some(MigrationOutcome::Completed {
                migrated,
                existing,
                failed,
            }) => println!("migrated {migrated} entries ({existing} already present, {failed} failed)"),
            Some(MigrationOutcome::AlreadyDone) => println!("migration already done"),
            Some(MigrationOutcome::Skipped) | None => {
                anyhow::bail!("migration from {} did not complete", legacy_dir.display())
            }
        },
        Command::Stats => {
            let entries = store.count()?;
            let out = serde_json::json!({
                "entries": entries,
                "pending": store.pending_len(),
                "worker": counters.snapshot(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    store.close().context("failed to flush pending writes")?;
    tracing::debug!("Keeper finished");
    Ok(())
}
