//! Side index of records that are still running.
//!
//! A running record (`t1 == t2`) has no fixed end, so it cannot live in the
//! binned index. Its contribution is computed at query time with `now` as the
//! provisional end, which keeps elapsed time live.

use std::collections::BTreeMap;

use crate::heap::TagDurations;
use crate::record::Record;

#[derive(Debug, Clone, Default)]
pub struct RunningSet {
    records: BTreeMap<String, Record>,
}

impl RunningSet {
    /// Tracks `new` under `key` if it is running and visible; otherwise forgets the key.
    pub fn update(&mut self, key: &str, new: Option<&Record>) {
        match new {
            Some(record) if record.is_running() && !record.is_hidden() => {
                self.records.insert(key.to_string(), record.clone());
            }
            _ => {
                self.records.remove(key);
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Running records counted as overlapping `[t1, t2]` at `now`.
    ///
    /// A running record covers everything from its start up to the present.
    pub fn overlapping(&self, t1: i64, t2: i64, now: i64) -> impl Iterator<Item = &Record> {
        self.records
            .values()
            .filter(move |record| record.t1 < t2 && now > t1)
    }

    /// Adds each running record's elapsed time within `[t1, t2]` to `totals`.
    pub fn add_elapsed(&self, t1: i64, t2: i64, now: i64, totals: &mut TagDurations) {
        for record in self.records.values() {
            let seconds = record.overlap_at(t1, t2, now);
            if seconds > 0 {
                *totals.entry(record.tag_key()).or_insert(0) += seconds;
            }
        }
    }
}
