//! `tally records`: list records overlapping a range.

use std::io::Write;

use anyhow::{Context, Result};
use tally_core::Record;

use crate::commands::open_store;
use crate::commands::util::{format_duration, format_time, parse_range, short_key};
use crate::{Config, RangeArgs};

pub fn run<W: Write>(writer: &mut W, config: &Config, args: &RangeArgs, now: i64) -> Result<()> {
    let (start, end) = parse_range(args.start.as_deref(), args.end.as_deref(), now)?;
    let (_db, store) = open_store(config)?;
    let records = store.get_records_at(start, end, now);

    if args.json {
        serde_json::to_writer_pretty(&mut *writer, &records).context("failed to encode records")?;
        writeln!(writer)?;
        return Ok(());
    }
    render(writer, &records, now)
}

fn render<W: Write>(writer: &mut W, records: &[Record], now: i64) -> Result<()> {
    if records.is_empty() {
        writeln!(writer, "No records.")?;
        return Ok(());
    }
    for record in records {
        let (end, length) = if record.is_running() {
            ("running".to_string(), now - record.t1)
        } else {
            (format_time(record.t2), record.t2 - record.t1)
        };
        writeln!(
            writer,
            "{}  {}  {:<16}  {:>7}  {}",
            short_key(&record.key),
            format_time(record.t1),
            end,
            format_duration(length),
            record.ds
        )?;
    }
    Ok(())
}
