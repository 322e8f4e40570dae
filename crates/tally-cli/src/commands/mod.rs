//! CLI subcommand implementations.

pub mod add;
pub mod export;
pub mod hide;
pub mod import;
pub mod records;
pub mod start;
pub mod stats;
pub mod status;
pub mod sync;
pub mod util;

use anyhow::{Context, Result};
use tally_core::RecordStore;
use tally_db::Database;

use crate::Config;

/// Opens the database, creating its directory if needed, and loads the store.
pub fn open_store(config: &Config) -> Result<(Database, RecordStore)> {
    if let Some(parent) = config
        .database_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    let store = RecordStore::load(&db).context("failed to load records")?;
    Ok((db, store))
}

/// Config pointing at a fresh database inside `dir`.
#[cfg(test)]
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    Config {
        database_path: dir.join("tally.db"),
        sync_state_path: dir.join("sync.json"),
        ..Config::default()
    }
}
