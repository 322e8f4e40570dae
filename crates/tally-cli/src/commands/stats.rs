//! `tally stats`: time per tag combination.

use std::io::Write;

use anyhow::{Context, Result};
use tally_core::TagDurations;

use crate::commands::open_store;
use crate::commands::util::{format_duration, format_time, parse_range, progress_bar};
use crate::{Config, RangeArgs};

pub fn run<W: Write>(writer: &mut W, config: &Config, args: &RangeArgs, now: i64) -> Result<()> {
    let (start, end) = parse_range(args.start.as_deref(), args.end.as_deref(), now)?;
    let (_db, store) = open_store(config)?;
    let totals = store.get_stats_at(start, end, now);

    if args.json {
        serde_json::to_writer_pretty(&mut *writer, &totals).context("failed to encode stats")?;
        writeln!(writer)?;
        return Ok(());
    }
    render(writer, start, end, &totals)
}

fn render<W: Write>(writer: &mut W, start: i64, end: i64, totals: &TagDurations) -> Result<()> {
    writeln!(
        writer,
        "Stats {} to {} (UTC)",
        format_time(start),
        format_time(end)
    )?;
    writeln!(writer)?;

    if totals.is_empty() {
        writeln!(writer, "No time recorded.")?;
        return Ok(());
    }

    let mut rows: Vec<(&str, i64, String)> = totals
        .iter()
        .map(|(tag, &seconds)| (tag.as_str(), seconds, format_duration(seconds)))
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let tag_width = rows.iter().map(|row| row.0.chars().count()).max().unwrap_or(0);
    let duration_width = rows.iter().map(|row| row.2.len()).max().unwrap_or(0);
    let max = rows.first().map_or(0, |row| row.1);
    for (tag, seconds, duration) in &rows {
        writeln!(
            writer,
            "{tag:<tag_width$}  {duration:<duration_width$}  {}",
            progress_bar(*seconds, max)
        )?;
    }

    let total: i64 = rows.iter().map(|row| row.1).sum();
    writeln!(writer)?;
    writeln!(writer, "Total: {}", format_duration(total))?;
    Ok(())
}
