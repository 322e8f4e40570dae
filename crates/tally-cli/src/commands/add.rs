//! `tally add`: record a finished interval.

use std::io::Write;

use anyhow::{Context, Result};
use tally_core::{ItemStore, Record};
use uuid::Uuid;

use crate::commands::open_store;
use crate::commands::util::{format_duration, format_time, parse_time, short_key};
use crate::{AddArgs, Config};

pub fn run<W: Write>(writer: &mut W, config: &Config, args: &AddArgs, now: i64) -> Result<Record> {
    let t1 = parse_time(&args.start, now).context("invalid --start")?;
    let t2 = parse_time(&args.end, now).context("invalid --end")?;
    if t2 <= t1 {
        anyhow::bail!("--end must be after --start");
    }

    let (mut db, mut store) = open_store(config)?;
    let description = args.description.join(" ");
    let record = store
        .put_at(
            Record::new(Uuid::new_v4().to_string(), t1, t2, description),
            now,
        )
        .context("invalid record")?;
    db.put(&record).context("failed to save record")?;

    writeln!(
        writer,
        "Added {}: {} - {} ({})  {}",
        short_key(&record.key),
        format_time(record.t1),
        format_time(record.t2),
        format_duration(record.t2 - record.t1),
        record.ds
    )?;
    Ok(record)
}
