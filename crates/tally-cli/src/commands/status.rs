//! `tally status`: database, running records and sync state at a glance.

use std::io::Write;

use anyhow::Result;

use crate::Config;
use crate::commands::open_store;
use crate::commands::sync::SyncState;
use crate::commands::util::{format_duration, format_time, short_key};

pub fn run<W: Write>(writer: &mut W, config: &Config, now: i64) -> Result<()> {
    let (_db, store) = open_store(config)?;

    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(
        writer,
        "Records: {} ({} pending)",
        store.record_count(),
        store.pending_count()
    )?;

    let running = store.get_running_records();
    if running.is_empty() {
        writeln!(writer, "Running: none")?;
    } else {
        writeln!(writer, "Running:")?;
        for record in &running {
            writeln!(
                writer,
                "  {}  since {} ({})  {}",
                short_key(&record.key),
                format_time(record.t1),
                format_duration(now - record.t1),
                record.ds
            )?;
        }
    }

    match config.server_url.as_deref() {
        None => writeln!(writer, "Sync: not configured")?,
        Some(url) => {
            let state = SyncState::load(&config.sync_state_path)?;
            let url = url.trim().trim_end_matches('/');
            let last = state
                .position(url)
                .map_or("never", |pos| pos.last_synced_at.as_str());
            writeln!(writer, "Sync: {url} (last synced {last})")?;
        }
    }
    Ok(())
}
