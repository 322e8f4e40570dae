//! `tally import`: load JSON lines produced by `tally export`.
//!
//! Lines go through the same path as items pulled from the authority, so an
//! import never overwrites a newer local version.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde_json::Value;
use tally_core::{ItemStore, ReceiveSummary, Record};

use crate::Config;
use crate::commands::open_store;

pub fn run<R: BufRead, W: Write>(
    reader: R,
    writer: &mut W,
    config: &Config,
) -> Result<ReceiveSummary<Record>> {
    let items = parse_lines(reader)?;
    let (mut db, mut store) = open_store(config)?;
    let summary = store.put_received(&items);
    db.put_all(&summary.accepted)
        .context("failed to save imported records")?;

    writeln!(
        writer,
        "Imported {} records ({} unchanged, {} older than local, {} malformed)",
        summary.accepted.len(),
        summary.unchanged,
        summary.rejected,
        summary.dropped
    )?;
    Ok(summary)
}

/// Parses one JSON object per non-blank line.
fn parse_lines<R: BufRead>(reader: R) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid JSON", index + 1))?;
        items.push(value);
    }
    Ok(items)
}
