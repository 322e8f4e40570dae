//! Binned aggregation index over record intervals.
//!
//! # Layout
//!
//! Level 0 divides time into bins of fixed width `W`; bin `i` covers
//! `[i * W, (i + 1) * W)`. Only non-negative time is indexed; records are
//! validated before they get here. Each level above doubles the width, so bin `i` at
//! level `L + 1` covers bins `2i` and `2i + 1` of level `L`. Levels are added
//! until the top level holds at most one bin, and pruned again when the
//! history shrinks, so whole-history queries start from a single root.
//!
//! Every bin caches a tag-combination to seconds aggregate for the part of
//! each record that falls inside it. Only level-0 bins keep the set of member
//! keys; higher levels are pure sums of their two children.
//!
//! # Updates
//!
//! A mutation adjusts the membership of the level-0 bins the old and new
//! spans touch, rebuilds those bins from their members, then rebuilds the
//! parents of every dirty bin, level by level, up to the root. Bins left
//! without content are dropped.
//!
//! # Queries
//!
//! Both queries descend from the root. Bins entirely inside the query range
//! contribute wholesale (their cached aggregate, or all members); bins that
//! straddle a boundary recurse, and at level 0 each member is checked or
//! prorated individually.
//!
//! Running and hidden records are never indexed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::RangeInclusive;

use crate::record::{Record, overlap};

/// Level-0 bin width in seconds (1.5 days).
pub const DEFAULT_BIN_WIDTH: i64 = 129_600;

/// Seconds per tag-combination key.
pub type TagDurations = BTreeMap<String, i64>;

#[derive(Debug, Clone, Default)]
struct Bin {
    aggregate: TagDurations,
    /// Keys of records overlapping this bin. Level 0 only.
    members: BTreeSet<String>,
}

/// The part of a record the index needs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Span {
    t1: i64,
    t2: i64,
    tag_key: String,
}

impl Span {
    fn of(record: &Record) -> Option<Self> {
        if record.is_running() || record.is_hidden() {
            return None;
        }
        assert!(
            record.t1 >= 0,
            "binned index cannot hold negative time: {} starts at {}",
            record.key,
            record.t1
        );
        Some(Self {
            t1: record.t1,
            t2: record.t2,
            tag_key: record.tag_key(),
        })
    }
}

/// Multi-level binned index answering range and aggregate queries.
#[derive(Debug, Clone)]
pub struct BinnedIndex {
    bin_width: i64,
    levels: Vec<HashMap<i64, Bin>>,
    spans: HashMap<String, Span>,
}

impl Default for BinnedIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BinnedIndex {
    pub fn new() -> Self {
        Self::with_bin_width(DEFAULT_BIN_WIDTH)
    }

    /// Creates an index with a custom level-0 bin width.
    pub fn with_bin_width(bin_width: i64) -> Self {
        assert!(bin_width > 0, "bin width must be positive, got {bin_width}");
        Self {
            bin_width,
            levels: vec![HashMap::new()],
            spans: HashMap::new(),
        }
    }

    pub const fn bin_width(&self) -> i64 {
        self.bin_width
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.spans.contains_key(key)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Number of populated bins at `level`.
    pub fn bin_count(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, HashMap::len)
    }

    pub fn clear(&mut self) {
        self.levels = vec![HashMap::new()];
        self.spans.clear();
    }

    /// Indexes `record`, replacing any previous version with the same key.
    pub fn insert(&mut self, record: &Record) {
        self.replace(&record.key, Some(record));
    }

    /// Removes whatever is indexed under `key`.
    pub fn remove(&mut self, key: &str) {
        self.replace(key, None);
    }

    /// Replaces the contribution indexed under `key` with that of `new`.
    ///
    /// Running or hidden records contribute nothing, so passing one removes
    /// the key. Old and new bins are rebuilt in a single pass.
    pub fn replace(&mut self, key: &str, new: Option<&Record>) {
        debug_assert!(new.is_none_or(|record| record.key == key));
        let new_span = new.and_then(Span::of);
        if self.spans.get(key) == new_span.as_ref() {
            return;
        }

        let mut dirty = BTreeSet::new();
        if let Some(old) = self.spans.remove(key) {
            for index in self.leaf_range(&old) {
                if let Some(bin) = self.levels[0].get_mut(&index) {
                    bin.members.remove(key);
                }
                dirty.insert(index);
            }
        }
        if let Some(span) = new_span {
            for index in self.leaf_range(&span) {
                self.levels[0]
                    .entry(index)
                    .or_default()
                    .members
                    .insert(key.to_string());
                dirty.insert(index);
            }
            self.spans.insert(key.to_string(), span);
        }

        self.recompute(dirty);
    }

    /// Keys of indexed records overlapping `[t1, t2]`.
    ///
    /// A record `[r1, r2]` overlaps when `r2 > t1 && r1 < t2`, so a zero-width
    /// query strictly inside a record finds it.
    pub fn query(&self, t1: i64, t2: i64) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        if t1 > t2 {
            return keys;
        }
        let top = self.levels.len() - 1;
        for &index in self.levels[top].keys() {
            self.collect_keys(top, index, t1, t2, &mut keys);
        }
        keys
    }

    /// Seconds per tag-combination key within `[t1, t2]`.
    pub fn aggregate(&self, t1: i64, t2: i64) -> TagDurations {
        let mut totals = TagDurations::new();
        if t1 >= t2 {
            return totals;
        }
        let top = self.levels.len() - 1;
        for &index in self.levels[top].keys() {
            self.collect_totals(top, index, t1, t2, &mut totals);
        }
        totals
    }

    fn bin_span(&self, level: usize, index: i64) -> (i64, i64) {
        let width = self.bin_width << level;
        let start = index * width;
        (start, start + width)
    }

    /// Level-0 bins sharing a positive-length stretch with `span`.
    const fn leaf_range(&self, span: &Span) -> RangeInclusive<i64> {
        span.t1 / self.bin_width..=(span.t2 - 1) / self.bin_width
    }

    fn recompute(&mut self, mut dirty: BTreeSet<i64>) {
        let mut level = 0;
        loop {
            for &index in &dirty {
                let bin = if level == 0 {
                    self.rebuild_leaf(index)
                } else {
                    self.merge_children(level, index)
                };
                match bin {
                    Some(bin) => {
                        self.levels[level].insert(index, bin);
                    }
                    None => {
                        self.levels[level].remove(&index);
                    }
                }
            }

            if level + 1 == self.levels.len() {
                if self.levels[level].len() <= 1 {
                    break;
                }
                // Top level split; grow a parent level covering all of it.
                self.levels.push(HashMap::new());
                dirty = self.levels[level].keys().map(|index| index / 2).collect();
            } else {
                dirty = dirty.iter().map(|index| index / 2).collect();
            }
            level += 1;
        }

        self.prune();
        self.check_invariants();
    }

    fn rebuild_leaf(&mut self, index: i64) -> Option<Bin> {
        let members = self.levels[0].remove(&index)?.members;
        if members.is_empty() {
            return None;
        }

        let (start, end) = self.bin_span(0, index);
        let mut aggregate = TagDurations::new();
        for key in &members {
            if let Some(span) = self.spans.get(key) {
                let seconds = overlap(span.t1, span.t2, start, end);
                if seconds > 0 {
                    *aggregate.entry(span.tag_key.clone()).or_insert(0) += seconds;
                }
            }
        }
        Some(Bin { aggregate, members })
    }

    fn merge_children(&self, level: usize, index: i64) -> Option<Bin> {
        let below = &self.levels[level - 1];
        let children: Vec<&Bin> = [index * 2, index * 2 + 1]
            .iter()
            .filter_map(|child| below.get(child))
            .collect();
        if children.is_empty() {
            return None;
        }

        let mut aggregate = TagDurations::new();
        for child in children {
            add_into(&mut aggregate, &child.aggregate);
        }
        Some(Bin {
            aggregate,
            members: BTreeSet::new(),
        })
    }

    /// Drops top levels that add nothing over the level below.
    fn prune(&mut self) {
        while self.levels.len() > 1 && self.levels[self.levels.len() - 2].len() <= 1 {
            self.levels.pop();
        }
    }

    fn check_invariants(&self) {
        let top = self.levels.last().map_or(0, HashMap::len);
        assert!(top <= 1, "binned index top level holds {top} bins");
    }

    fn collect_keys(&self, level: usize, index: i64, a: i64, b: i64, out: &mut BTreeSet<String>) {
        let Some(bin) = self.levels[level].get(&index) else {
            return;
        };
        let (start, end) = self.bin_span(level, index);
        if end < a || start > b {
            return;
        }
        if level > 0 {
            self.collect_keys(level - 1, index * 2, a, b, out);
            self.collect_keys(level - 1, index * 2 + 1, a, b, out);
            return;
        }

        let inside = a <= start && end <= b;
        for key in &bin.members {
            let hit = inside
                || self
                    .spans
                    .get(key)
                    .is_some_and(|span| span.t2 > a && span.t1 < b);
            if hit {
                out.insert(key.clone());
            }
        }
    }

    fn collect_totals(&self, level: usize, index: i64, a: i64, b: i64, out: &mut TagDurations) {
        let Some(bin) = self.levels[level].get(&index) else {
            return;
        };
        let (start, end) = self.bin_span(level, index);
        if end <= a || start >= b {
            return;
        }
        if a <= start && end <= b {
            add_into(out, &bin.aggregate);
            return;
        }
        if level > 0 {
            self.collect_totals(level - 1, index * 2, a, b, out);
            self.collect_totals(level - 1, index * 2 + 1, a, b, out);
            return;
        }

        // Straddling leaf: prorate members over the part of the query inside the bin.
        let (lo, hi) = (a.max(start), b.min(end));
        for key in &bin.members {
            if let Some(span) = self.spans.get(key) {
                let seconds = overlap(span.t1, span.t2, lo, hi);
                if seconds > 0 {
                    *out.entry(span.tag_key.clone()).or_insert(0) += seconds;
                }
            }
        }
    }
}

fn add_into(target: &mut TagDurations, source: &TagDurations) {
    for (tag, seconds) in source {
        *target.entry(tag.clone()).or_insert(0) += seconds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(s: &str) -> i64 {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
            .timestamp()
    }

    fn day(y: i32, m: u32, d: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    fn record(key: &str, t1: i64, t2: i64, ds: &str) -> Record {
        Record::new(key, t1, t2, ds)
    }

    #[test]
    fn empty_index_answers_empty() {
        let index = BinnedIndex::new();
        assert!(index.query(0, 1_000_000).is_empty());
        assert!(index.aggregate(0, 1_000_000).is_empty());
        assert_eq!(index.level_count(), 1);
    }

    #[test]
    fn reversed_range_is_empty() {
        let mut index = BinnedIndex::new();
        index.insert(&record("a", 100, 200, "#p1"));
        assert!(index.query(300, 0).is_empty());
        assert!(index.aggregate(300, 0).is_empty());
    }

    #[test]
    fn sums_tagged_records() {
        let mut index = BinnedIndex::new();
        index.insert(&record("a", ts("2018-04-23 15:00:00"), ts("2018-04-23 16:00:00"), "#p1"));
        index.insert(&record("b", ts("2018-04-23 17:00:00"), ts("2018-04-23 17:30:00"), "#p1"));

        let totals = index.aggregate(0, 1_000_000_000_000_000);
        assert_eq!(totals, TagDurations::from([("#p1".to_string(), 5400)]));
    }

    #[test]
    fn distant_records_grow_levels_and_stay_separable() {
        let mut index = BinnedIndex::new();
        index.insert(&record("new", ts("2018-04-23 15:00:00"), ts("2018-04-23 16:00:00"), ""));
        index.insert(&record("old", ts("2014-03-02 09:00:00"), ts("2014-03-02 10:00:00"), ""));

        assert_eq!(index.bin_count(0), 2);
        assert!(index.level_count() > 1);
        assert_eq!(index.bin_count(index.level_count() - 1), 1);

        let in_2014 = index.query(day(2014, 1, 1), day(2015, 1, 1));
        let in_2018 = index.query(day(2018, 1, 1), day(2019, 1, 1));
        assert_eq!(in_2014.into_iter().collect::<Vec<_>>(), vec!["old"]);
        assert_eq!(in_2018.into_iter().collect::<Vec<_>>(), vec!["new"]);
    }

    #[test]
    fn removing_everything_collapses_levels() {
        let mut index = BinnedIndex::new();
        index.insert(&record("a", day(2014, 1, 1), day(2014, 1, 1) + 60, ""));
        index.insert(&record("b", day(2020, 1, 1), day(2020, 1, 1) + 60, ""));
        assert!(index.level_count() > 1);

        index.remove("a");
        assert_eq!(index.level_count(), 1);
        assert_eq!(index.bin_count(0), 1);

        index.remove("b");
        assert_eq!(index.level_count(), 1);
        assert_eq!(index.bin_count(0), 0);
        assert!(index.is_empty());
        assert!(index.aggregate(0, i64::MAX / 2).is_empty());
    }

    #[test]
    fn running_and_hidden_records_are_not_indexed() {
        let mut index = BinnedIndex::new();
        index.insert(&record("run", 1_000, 1_000, "#p1"));
        index.insert(&record("gone", 1_000, 2_000, "HIDDEN #p1"));
        assert!(index.is_empty());
        assert_eq!(index.bin_count(0), 0);

        index.insert(&record("gone", 1_000, 2_000, "#p1"));
        assert!(index.contains("gone"));
        index.insert(&record("gone", 1_000, 2_000, "HIDDEN #p1"));
        assert!(!index.contains("gone"));
        assert!(index.aggregate(0, 10_000).is_empty());
    }

    #[test]
    fn multi_bin_record_is_prorated_not_double_counted() {
        let mut index = BinnedIndex::with_bin_width(100);
        index.insert(&record("long", 50, 450, "#x"));
        assert_eq!(index.bin_count(0), 5);

        assert_eq!(index.aggregate(0, 1_000)["#x"], 400);
        assert_eq!(index.aggregate(120, 330)["#x"], 210);
        assert_eq!(index.aggregate(0, 60)["#x"], 10);
    }

    #[test]
    fn record_ending_on_bin_boundary_skips_next_bin() {
        let mut index = BinnedIndex::with_bin_width(100);
        index.insert(&record("a", 50, 200, ""));
        assert_eq!(index.bin_count(0), 2);
        assert!(index.query(200, 300).is_empty());
        assert_eq!(index.query(199, 300).len(), 1);
    }

    #[test]
    fn zero_width_query_inside_record_finds_it() {
        let mut index = BinnedIndex::with_bin_width(100);
        index.insert(&record("a", 50, 450, ""));
        for point in [51, 100, 200, 449] {
            assert_eq!(index.query(point, point).len(), 1, "point {point}");
        }
        assert!(index.query(50, 50).is_empty());
        assert!(index.query(450, 450).is_empty());
    }

    #[test]
    #[should_panic(expected = "cannot hold negative time")]
    fn negative_times_are_refused() {
        let mut index = BinnedIndex::with_bin_width(100);
        index.insert(&record("before", -250, -150, "#old"));
    }

    #[test]
    fn record_at_time_zero_is_indexed() {
        let mut index = BinnedIndex::with_bin_width(100);
        index.insert(&record("a", 0, 50, "#x"));
        assert_eq!(index.aggregate(0, 100)["#x"], 50);
    }

    #[test]
    fn replacing_moves_contribution() {
        let mut index = BinnedIndex::with_bin_width(100);
        index.insert(&record("a", 0, 100, "#one"));
        index.insert(&record("a", 1_000, 1_050, "#two"));

        let totals = index.aggregate(0, 10_000);
        assert_eq!(totals, TagDurations::from([("#two".to_string(), 50)]));
        assert!(index.query(0, 500).is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn aggregate_is_additive_over_partitions() {
        let mut index = BinnedIndex::with_bin_width(64);
        index.insert(&record("a", 10, 500, "#a"));
        index.insert(&record("b", 300, 310, "#b"));
        index.insert(&record("c", 200, 900, "#a #b"));

        let whole = index.aggregate(0, 1_000);
        for split in [1, 63, 64, 65, 255, 256, 305, 777] {
            let mut parts = index.aggregate(0, split);
            add_into(&mut parts, &index.aggregate(split, 1_000));
            assert_eq!(parts, whole, "split at {split}");
        }
    }

    // ========== Randomized comparison against brute force ==========

    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: i64) -> i64 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            i64::try_from((self.0 >> 33) % u64::try_from(bound).unwrap()).unwrap()
        }
    }

    fn brute_query(records: &HashMap<String, Record>, a: i64, b: i64) -> BTreeSet<String> {
        records
            .values()
            .filter(|r| !r.is_running() && !r.is_hidden() && r.t2 > a && r.t1 < b)
            .map(|r| r.key.clone())
            .collect()
    }

    fn brute_aggregate(records: &HashMap<String, Record>, a: i64, b: i64) -> TagDurations {
        let mut totals = TagDurations::new();
        for r in records.values() {
            if r.is_running() || r.is_hidden() {
                continue;
            }
            let seconds = overlap(r.t1, r.t2, a, b);
            if seconds > 0 {
                *totals.entry(r.tag_key()).or_insert(0) += seconds;
            }
        }
        totals
    }

    #[test]
    fn matches_brute_force_under_random_mutations() {
        let tags = ["", "#a", "#b", "#a #b", "HIDDEN #a"];
        let mut rng = Lcg(7);
        let mut index = BinnedIndex::with_bin_width(50);
        let mut records: HashMap<String, Record> = HashMap::new();

        for step in 0..400 {
            let key = format!("r{}", rng.next(40));
            if rng.next(5) == 0 {
                index.remove(&key);
                records.remove(&key);
            } else {
                let t1 = rng.next(5_000);
                let len = if rng.next(8) == 0 { 0 } else { rng.next(600) };
                let ds = tags[usize::try_from(rng.next(5)).unwrap()];
                let r = record(&key, t1, t1 + len, ds);
                index.insert(&r);
                records.insert(key, r);
            }

            let a = rng.next(6_000);
            let b = a + rng.next(1_500);
            assert_eq!(index.query(a, b), brute_query(&records, a, b), "query at step {step}");
            assert_eq!(
                index.aggregate(a, b),
                brute_aggregate(&records, a, b),
                "aggregate at step {step}"
            );
            assert_eq!(index.aggregate(0, 10_000), brute_aggregate(&records, 0, 10_000));
            assert!(index.bin_count(index.level_count() - 1) <= 1);
        }
    }
}
