//! `tally start` and `tally stop`.

use std::io::Write;

use anyhow::{Context, Result};
use tally_core::{ItemStore, Record};
use uuid::Uuid;

use crate::Config;
use crate::commands::open_store;
use crate::commands::util::{format_duration, format_time, short_key};

/// Creates a running record starting at `now`.
pub fn start<W: Write>(
    writer: &mut W,
    config: &Config,
    description: &str,
    now: i64,
) -> Result<Record> {
    let (mut db, mut store) = open_store(config)?;
    let record = store
        .put_at(
            Record::new(Uuid::new_v4().to_string(), now, now, description),
            now,
        )
        .context("invalid record")?;
    db.put(&record).context("failed to save record")?;

    writeln!(
        writer,
        "Started {} at {}  {}",
        short_key(&record.key),
        format_time(now),
        record.ds
    )?;
    Ok(record)
}

/// Stops every running record at `now`.
pub fn stop<W: Write>(writer: &mut W, config: &Config, now: i64) -> Result<Vec<Record>> {
    let (mut db, mut store) = open_store(config)?;
    let stopped = store.stop_running_at(now);
    db.put_all(&stopped).context("failed to save stopped records")?;

    if stopped.is_empty() {
        writeln!(writer, "No running records.")?;
    }
    for record in &stopped {
        writeln!(
            writer,
            "Stopped {} after {}  {}",
            short_key(&record.key),
            format_duration(record.t2 - record.t1),
            record.ds
        )?;
    }
    Ok(stopped)
}
