//! `tally export`: dump every record as JSON lines.

use std::io::{ErrorKind, Write};

use anyhow::{Context, Result};
use tally_core::Record;

use crate::Config;
use crate::commands::open_store;

/// Writes all records, hidden ones included, ordered by start time.
pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<usize> {
    let (_db, store) = open_store(config)?;
    let mut records: Vec<&Record> = store.all_records().collect();
    records.sort_by(|a, b| (a.t1, &a.key).cmp(&(b.t1, &b.key)));

    let mut written = 0;
    for record in records {
        let line = serde_json::to_string(record).context("failed to encode record")?;
        match writeln!(writer, "{line}") {
            Ok(()) => written += 1,
            Err(err) if err.kind() == ErrorKind::BrokenPipe => break,
            Err(err) => return Err(err).context("failed to write record"),
        }
    }
    Ok(written)
}
