//! `tally hide` and `tally unhide`: toggle the soft-delete marker.

use std::io::Write;

use anyhow::{Context, Result};
use tally_core::{ItemStore, Record, RecordStore};

use crate::Config;
use crate::commands::open_store;
use crate::commands::util::short_key;

/// Hides (`hidden = true`) or restores a record addressed by key or key prefix.
pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    key: &str,
    hidden: bool,
    now: i64,
) -> Result<Record> {
    let (mut db, mut store) = open_store(config)?;
    let record = find_record(&store, key)?;
    let short = short_key(&record.key).to_string();

    if record.is_hidden() == hidden {
        let state = if hidden { "already hidden" } else { "not hidden" };
        writeln!(writer, "Record {short} is {state}.")?;
        return Ok(record);
    }

    let updated = if hidden {
        record.hidden()
    } else {
        record.revealed()
    };
    let updated = store.put_at(updated, now).context("invalid record")?;
    db.put(&updated).context("failed to save record")?;

    let verb = if hidden { "Hid" } else { "Restored" };
    writeln!(writer, "{verb} {short}")?;
    Ok(updated)
}

/// Looks up a record by exact key, falling back to a unique key prefix.
fn find_record(store: &RecordStore, key: &str) -> Result<Record> {
    if let Some(record) = store.get_record(key) {
        return Ok(record.clone());
    }
    if key.is_empty() {
        anyhow::bail!("record key cannot be empty");
    }
    let matches: Vec<&Record> = store
        .all_records()
        .filter(|record| record.key.starts_with(key))
        .collect();
    match matches.as_slice() {
        [record] => Ok((*record).clone()),
        [] => anyhow::bail!("no record matches {key}"),
        many => anyhow::bail!("{key} matches {} records; use a longer prefix", many.len()),
    }
}
