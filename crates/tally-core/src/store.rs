//! The record store: reconciliation, indexing and the query facade.
//!
//! All mutations go through [`RecordStore::put`] (local edits) or
//! [`RecordStore::put_received`] (authority updates). Each item is validated,
//! reconciled against the stored version, and on acceptance the binned index
//! and running set are updated in the same call. Queries never fail; a
//! reversed range simply yields nothing.
//!
//! Methods taking `now` exist next to their wall-clock counterparts so tests
//! can pin time.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::heap::{BinnedIndex, TagDurations};
use crate::items::ItemStore;
use crate::reconcile::{self, Verdict, Versioned};
use crate::record::{Record, Setting};
use crate::running::RunningSet;
use crate::types::ValidationError;
use crate::validate;

/// Current Unix time in seconds.
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// What happened to a single incoming item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The item replaced the stored version.
    Accepted,
    /// The item was identical to the stored version.
    Unchanged,
    /// The stored version wins.
    Rejected,
}

/// Per-batch outcome of applying received items.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveSummary<T> {
    /// Normalized items that are now current.
    pub accepted: Vec<T>,
    pub unchanged: usize,
    pub rejected: usize,
    /// Malformed items that were dropped.
    pub dropped: usize,
}

impl<T> Default for ReceiveSummary<T> {
    fn default() -> Self {
        Self {
            accepted: Vec::new(),
            unchanged: 0,
            rejected: 0,
            dropped: 0,
        }
    }
}

/// In-memory store of records and settings for one user.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: HashMap<String, Record>,
    settings: HashMap<String, Setting>,
    index: BinnedIndex,
    running: RunningSet,
    pending_records: BTreeSet<String>,
    pending_settings: BTreeSet<String>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store whose index uses a custom level-0 bin width.
    pub fn with_bin_width(bin_width: i64) -> Self {
        Self {
            index: BinnedIndex::with_bin_width(bin_width),
            ..Self::default()
        }
    }

    /// Hydrates a store from durable storage.
    ///
    /// Items without an authority stamp (`st == 0`) are queued for push.
    pub fn load<S: ItemStore>(items: &S) -> Result<Self, S::Error> {
        let records = items.select(|_: &Record| true)?;
        let settings = items.select(|_: &Setting| true)?;

        let mut store = Self::new();
        for record in records {
            let key = record.key.clone();
            match validate::normalize(record) {
                Ok(record) => {
                    let pending = !record.is_confirmed();
                    store.apply_record(record);
                    if pending {
                        store.pending_records.insert(key);
                    }
                }
                Err(err) => warn!(%key, %err, "skipping stored record"),
            }
        }
        for setting in settings {
            let pending = setting.st <= 0.0;
            let key = setting.key.clone();
            store.apply_setting(setting);
            if pending {
                store.pending_settings.insert(key);
            }
        }

        debug!(
            records = store.records.len(),
            settings = store.settings.len(),
            pending = store.pending_count(),
            "loaded store"
        );
        Ok(store)
    }

    // ========== Mutations ==========

    /// Stores a locally authored record.
    pub fn put(&mut self, record: Record) -> Result<Record, ValidationError> {
        self.put_at(record, now_secs())
    }

    /// Stores a locally authored record at `now`.
    ///
    /// The record is normalized, stamped with `mt = now` (strictly above the
    /// stored version's `mt`), cleared of any authority stamp and queued for
    /// push. Returns the stored version.
    pub fn put_at(&mut self, record: Record, now: i64) -> Result<Record, ValidationError> {
        let mut record = validate::normalize(record)?;
        record.mt = next_mt(self.records.get(&record.key).map(|current| current.mt), now);
        record.st = 0.0;

        self.apply_record(record.clone());
        self.pending_records.insert(record.key.clone());
        Ok(record)
    }

    /// Applies a batch of records received from the authority.
    ///
    /// Each item is validated and reconciled on its own; malformed items are
    /// dropped and logged without affecting the rest of the batch.
    pub fn put_received(&mut self, items: &[Value]) -> ReceiveSummary<Record> {
        let mut summary = ReceiveSummary::default();
        for item in items {
            let record = match validate::normalize_record(item) {
                Ok(record) => record,
                Err(err) => {
                    warn!(key = item_key(item), %err, "dropping malformed record");
                    summary.dropped += 1;
                    continue;
                }
            };

            let confirmed = record.is_confirmed();
            match self.apply_record(record.clone()) {
                Applied::Accepted => {
                    if confirmed {
                        self.pending_records.remove(&record.key);
                    } else {
                        self.pending_records.insert(record.key.clone());
                    }
                    summary.accepted.push(record);
                }
                Applied::Unchanged => summary.unchanged += 1,
                Applied::Rejected => summary.rejected += 1,
            }
        }
        summary
    }

    /// Stores a locally authored setting.
    pub fn put_setting(
        &mut self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<Setting, ValidationError> {
        self.put_setting_at(key, value, now_secs())
    }

    pub fn put_setting_at(
        &mut self,
        key: impl Into<String>,
        value: Value,
        now: i64,
    ) -> Result<Setting, ValidationError> {
        let key = key.into();
        validate::check_key(&key)?;
        validate::check_setting_value(&value)?;

        let mt = next_mt(self.settings.get(&key).map(|current| current.mt), now);
        let setting = Setting {
            key,
            value,
            mt,
            st: 0.0,
        };
        self.apply_setting(setting.clone());
        self.pending_settings.insert(setting.key.clone());
        Ok(setting)
    }

    /// Applies a batch of settings received from the authority.
    pub fn put_received_settings(&mut self, items: &[Value]) -> ReceiveSummary<Setting> {
        let mut summary = ReceiveSummary::default();
        for item in items {
            let setting = match validate::normalize_setting(item) {
                Ok(setting) => setting,
                Err(err) => {
                    warn!(key = item_key(item), %err, "dropping malformed setting");
                    summary.dropped += 1;
                    continue;
                }
            };

            let confirmed = setting.st > 0.0;
            match self.apply_setting(setting.clone()) {
                Applied::Accepted => {
                    if confirmed {
                        self.pending_settings.remove(&setting.key);
                    } else {
                        self.pending_settings.insert(setting.key.clone());
                    }
                    summary.accepted.push(setting);
                }
                Applied::Unchanged => summary.unchanged += 1,
                Applied::Rejected => summary.rejected += 1,
            }
        }
        summary
    }

    /// Stops every running record at `now`. Returns the stopped versions.
    pub fn stop_running_at(&mut self, now: i64) -> Vec<Record> {
        let running: Vec<Record> = self.running.iter().cloned().collect();
        let mut stopped = Vec::with_capacity(running.len());
        for record in running {
            let t2 = now.max(record.t1 + 1);
            match self.put_at(Record { t2, ..record }, now) {
                Ok(record) => stopped.push(record),
                Err(err) => warn!(%err, "failed to stop running record"),
            }
        }
        stopped
    }

    /// Clears everything and reseeds from a full authority snapshot.
    pub fn reset(
        &mut self,
        records: &[Value],
        settings: &[Value],
    ) -> (ReceiveSummary<Record>, ReceiveSummary<Setting>) {
        self.records.clear();
        self.settings.clear();
        self.index.clear();
        self.running.clear();
        self.pending_records.clear();
        self.pending_settings.clear();
        (
            self.put_received(records),
            self.put_received_settings(settings),
        )
    }

    fn apply_record(&mut self, incoming: Record) -> Applied {
        let verdict = judge(self.records.get(&incoming.key), &incoming);
        if verdict == Applied::Accepted {
            self.index.replace(&incoming.key, Some(&incoming));
            self.running.update(&incoming.key, Some(&incoming));
            self.records.insert(incoming.key.clone(), incoming);
        }
        verdict
    }

    fn apply_setting(&mut self, incoming: Setting) -> Applied {
        let verdict = judge(self.settings.get(&incoming.key), &incoming);
        if verdict == Applied::Accepted {
            self.settings.insert(incoming.key.clone(), incoming);
        }
        verdict
    }

    // ========== Queries ==========

    pub fn get_record(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn get_setting(&self, key: &str) -> Option<&Setting> {
        self.settings.get(key)
    }

    /// Number of stored records, hidden ones included.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Iterates over every stored record, hidden ones included.
    pub fn all_records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub const fn index(&self) -> &BinnedIndex {
        &self.index
    }

    /// Visible records overlapping `[t1, t2]`, ordered by start.
    pub fn get_records(&self, t1: i64, t2: i64) -> Vec<Record> {
        self.get_records_at(t1, t2, now_secs())
    }

    pub fn get_records_at(&self, t1: i64, t2: i64, now: i64) -> Vec<Record> {
        if t1 > t2 {
            return Vec::new();
        }
        let mut records: Vec<Record> = self
            .index
            .query(t1, t2)
            .iter()
            .filter_map(|key| self.records.get(key))
            .chain(self.running.overlapping(t1, t2, now))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.t1.cmp(&b.t1).then_with(|| a.key.cmp(&b.key)));
        records
    }

    /// Seconds per tag-combination key within `[t1, t2]`.
    ///
    /// Running records contribute the time elapsed up to now.
    pub fn get_stats(&self, t1: i64, t2: i64) -> TagDurations {
        self.get_stats_at(t1, t2, now_secs())
    }

    pub fn get_stats_at(&self, t1: i64, t2: i64, now: i64) -> TagDurations {
        if t1 > t2 {
            return TagDurations::new();
        }
        let mut totals = self.index.aggregate(t1, t2);
        self.running.add_elapsed(t1, t2, now, &mut totals);
        totals
    }

    /// Visible running records, ordered by key.
    pub fn get_running_records(&self) -> Vec<Record> {
        self.running.iter().cloned().collect()
    }

    // ========== Sync bookkeeping ==========

    /// Local records not yet acknowledged by the authority.
    pub fn pending_records(&self) -> Vec<Record> {
        self.pending_records
            .iter()
            .filter_map(|key| self.records.get(key))
            .cloned()
            .collect()
    }

    pub fn pending_settings(&self) -> Vec<Setting> {
        self.pending_settings
            .iter()
            .filter_map(|key| self.settings.get(key))
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_records.len() + self.pending_settings.len()
    }

    /// Acknowledges a pushed record.
    ///
    /// The key stays pending if it was edited again after the push snapshot
    /// (its `mt` no longer matches).
    pub fn mark_pushed(&mut self, key: &str, mt: i64) -> bool {
        let unchanged = self.records.get(key).is_some_and(|record| record.mt == mt);
        unchanged && self.pending_records.remove(key)
    }

    pub fn mark_setting_pushed(&mut self, key: &str, mt: i64) -> bool {
        let unchanged = self.settings.get(key).is_some_and(|setting| setting.mt == mt);
        unchanged && self.pending_settings.remove(key)
    }

    /// Discards a local record the authority refused as corrupt.
    pub fn drop_record(&mut self, key: &str) -> Option<Record> {
        self.pending_records.remove(key);
        let record = self.records.remove(key)?;
        self.index.remove(key);
        self.running.update(key, None);
        warn!(%key, "dropped record refused by authority");
        Some(record)
    }

    pub fn drop_setting(&mut self, key: &str) -> Option<Setting> {
        self.pending_settings.remove(key);
        let setting = self.settings.remove(key)?;
        warn!(%key, "dropped setting refused by authority");
        Some(setting)
    }
}

/// Local modification time for a write at `now`.
///
/// Strictly above the stored `mt`, so two edits within one second never share
/// a version and an echo of the older one cannot win.
fn next_mt(current: Option<i64>, now: i64) -> i64 {
    current.map_or(now, |mt| now.max(mt + 1))
}

fn judge<T: Versioned + PartialEq>(current: Option<&T>, incoming: &T) -> Applied {
    if current == Some(incoming) {
        return Applied::Unchanged;
    }
    match reconcile::decide(current, incoming) {
        Verdict::Accept => Applied::Accepted,
        Verdict::Reject => {
            debug!(
                key = incoming.key(),
                mt = incoming.mt(),
                st = incoming.st(),
                "stale write ignored"
            );
            Applied::Rejected
        }
    }
}

fn item_key(item: &Value) -> &str {
    item.get("key").and_then(Value::as_str).unwrap_or("<none>")
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDateTime;
    use serde_json::json;

    const FOREVER: i64 = 1_000_000_000_000_000;

    fn ts(s: &str) -> i64 {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
            .timestamp()
    }

    fn stats(pairs: &[(&str, i64)]) -> TagDurations {
        pairs
            .iter()
            .map(|(tag, seconds)| ((*tag).to_string(), *seconds))
            .collect()
    }

    fn keys(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.key.as_str()).collect()
    }

    // ========== Query Tests ==========

    #[test]
    fn basic_insert_and_stats() {
        let mut store = RecordStore::new();
        store
            .put(Record::new(
                "a",
                ts("2018-04-23 15:00:00"),
                ts("2018-04-23 16:00:00"),
                "#p1",
            ))
            .unwrap();
        store
            .put(Record::new(
                "b",
                ts("2018-04-23 17:00:00"),
                ts("2018-04-23 17:30:00"),
                "#p1",
            ))
            .unwrap();

        assert_eq!(store.get_stats(0, FOREVER), stats(&[("#p1", 5400)]));
    }

    #[test]
    fn multi_year_spread_forces_multi_level_index() {
        let mut store = RecordStore::new();
        store
            .put(Record::new("r2018", ts("2018-04-23 15:00:00"), ts("2018-04-23 16:00:00"), ""))
            .unwrap();
        store
            .put(Record::new("r2014", ts("2014-03-02 09:00:00"), ts("2014-03-02 10:00:00"), ""))
            .unwrap();

        assert!(store.index().bin_count(0) > 1);
        assert!(store.index().level_count() > 1);

        let in_2014 = store.get_records(ts("2014-01-01 00:00:00"), ts("2015-01-01 00:00:00"));
        let in_2018 = store.get_records(ts("2018-01-01 00:00:00"), ts("2019-01-01 00:00:00"));
        assert_eq!(keys(&in_2014), vec!["r2014"]);
        assert_eq!(keys(&in_2018), vec!["r2018"]);
    }

    #[test]
    fn running_record_grows_until_stopped() {
        let mut store = RecordStore::new();
        store
            .put_at(Record::new("run", 1_000, 1_000, "#p1"), 1_000)
            .unwrap();

        assert_eq!(keys(&store.get_running_records()), vec!["run"]);
        assert_eq!(store.get_stats_at(0, FOREVER, 1_030), stats(&[("#p1", 30)]));
        assert_eq!(store.get_stats_at(0, FOREVER, 1_090), stats(&[("#p1", 90)]));
        assert_eq!(keys(&store.get_records_at(0, FOREVER, 1_090)), vec!["run"]);
        assert!(store.index().is_empty());

        store
            .put_at(Record::new("run", 1_000, 1_010, "#p1"), 1_100)
            .unwrap();
        assert!(store.get_running_records().is_empty());
        assert_eq!(store.get_stats_at(0, FOREVER, 1_100), stats(&[("#p1", 10)]));
        assert_eq!(store.get_stats_at(0, FOREVER, 9_000), stats(&[("#p1", 10)]));
    }

    #[test]
    fn running_record_uses_wall_clock() {
        let mut store = RecordStore::new();
        let start = now_secs() - 100;
        store.put(Record::new("run", start, start, "#p1")).unwrap();

        let elapsed = store.get_stats(0, FOREVER)["#p1"];
        assert!(elapsed >= 100, "elapsed {elapsed}");
    }

    #[test]
    fn stop_running_fixes_end() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("a", 500, 500, "#x"), 500).unwrap();
        store.put_at(Record::new("b", 500, 600, "#y"), 500).unwrap();

        let stopped = store.stop_running_at(800);
        assert_eq!(keys(&stopped), vec!["a"]);
        assert_eq!(stopped[0].t2, 800);
        assert!(store.get_running_records().is_empty());
        assert_eq!(store.get_stats_at(0, FOREVER, 5_000), stats(&[("#x", 300), ("#y", 100)]));
    }

    #[test]
    fn reversed_range_returns_empty() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("a", 100, 200, ""), 300).unwrap();
        store.put_at(Record::new("b", 150, 150, ""), 300).unwrap();

        assert!(store.get_records_at(500, 0, 300).is_empty());
        assert!(store.get_stats_at(500, 0, 300).is_empty());
    }

    #[test]
    fn negative_times_never_reach_the_index() {
        let mut store = RecordStore::new();
        let err = store.put_at(Record::new("neg", -100, 10, ""), 100).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { field: "t1", .. }));

        let summary = store.put_received(&[json!({"key": "neg", "t1": -100, "t2": 10, "mt": 1})]);
        assert_eq!(summary.dropped, 1);
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn zero_width_query_inside_record() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("a", 100, 200, ""), 300).unwrap();
        assert_eq!(keys(&store.get_records_at(150, 150, 300)), vec!["a"]);
        assert!(store.get_records_at(200, 200, 300).is_empty());
    }

    #[test]
    fn stats_are_additive_over_partitions() {
        let mut store = RecordStore::with_bin_width(100);
        store.put_at(Record::new("a", 40, 380, "#a"), 1).unwrap();
        store.put_at(Record::new("b", 90, 95, "#b"), 1).unwrap();
        store.put_at(Record::new("c", 250, 1_200, "#a #b"), 1).unwrap();

        let whole = store.get_stats_at(0, 2_000, 5_000);
        let bounds = [0, 77, 100, 101, 380, 999, 2_000];
        let mut summed = TagDurations::new();
        for pair in bounds.windows(2) {
            for (tag, seconds) in store.get_stats_at(pair[0], pair[1], 5_000) {
                *summed.entry(tag).or_insert(0) += seconds;
            }
        }
        assert_eq!(summed, whole);
    }

    #[test]
    fn hidden_records_are_excluded_and_restorable() {
        let mut store = RecordStore::new();
        let record = store.put_at(Record::new("a", 100, 200, "#p1"), 300).unwrap();
        assert_eq!(store.get_records_at(0, 1_000, 300).len(), 1);

        store.put_at(record.hidden(), 301).unwrap();
        assert!(store.get_records_at(0, 1_000, 301).is_empty());
        assert!(store.get_stats_at(0, 1_000, 301).is_empty());
        assert_eq!(store.record_count(), 1);

        let hidden = store.get_record("a").unwrap().clone();
        store.put_at(hidden.revealed(), 302).unwrap();
        assert_eq!(store.get_stats_at(0, 1_000, 302), stats(&[("#p1", 100)]));
    }

    #[test]
    fn hidden_running_record_is_not_tracked() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("a", 100, 100, "HIDDEN #p1"), 100).unwrap();
        assert!(store.get_running_records().is_empty());
        assert!(store.get_stats_at(0, 1_000, 500).is_empty());
    }

    // ========== Reconciliation Tests ==========

    #[test]
    fn reconciliation_race_keeps_newer_local_then_attaches_st() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("k", 10, 20, "local"), 110).unwrap();

        let summary = store.put_received(&[json!({
            "key": "k", "t1": 10, "t2": 20, "ds": "older", "mt": 109, "st": 100.0
        })]);
        assert_eq!(summary.rejected, 1);
        let current = store.get_record("k").unwrap();
        assert_eq!(current.ds, "local");
        assert!(!current.is_confirmed());
        assert_eq!(store.pending_count(), 1);

        let summary = store.put_received(&[json!({
            "key": "k", "t1": 10, "t2": 20, "ds": "local", "mt": 110, "st": 100.0
        })]);
        assert_eq!(summary.accepted.len(), 1);
        let current = store.get_record("k").unwrap();
        assert!((current.st - 100.0).abs() < f64::EPSILON);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let item = json!({"key": "k", "t1": 100, "t2": 400, "ds": "#p1", "mt": 5, "st": 50.0});
        let mut store = RecordStore::new();

        let first = store.put_received(std::slice::from_ref(&item));
        let stats_once = store.get_stats_at(0, 1_000, 1_000);
        let records_once = store.get_records_at(0, 1_000, 1_000);

        let second = store.put_received(&[item]);
        assert_eq!(first.accepted.len(), 1);
        assert_eq!(second.unchanged, 1);
        assert_eq!(store.get_stats_at(0, 1_000, 1_000), stats_once);
        assert_eq!(store.get_records_at(0, 1_000, 1_000), records_once);
    }

    #[test]
    fn local_put_twice_is_idempotent() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("k", 100, 400, "#p1"), 500).unwrap();
        let before = store.get_stats_at(0, 1_000, 500);
        store.put_at(Record::new("k", 100, 400, "#p1"), 500).unwrap();
        assert_eq!(store.get_stats_at(0, 1_000, 500), before);
        assert_eq!(store.get_records_at(0, 1_000, 500).len(), 1);
    }

    #[test]
    fn confirmed_versions_converge_regardless_of_order() {
        let older = json!({"key": "k", "t1": 100, "t2": 200, "ds": "#old", "mt": 9, "st": 5.0});
        let newer = json!({"key": "k", "t1": 300, "t2": 500, "ds": "#new", "mt": 8, "st": 7.0});

        let mut forward = RecordStore::new();
        forward.put_received(&[older.clone(), newer.clone()]);
        let mut backward = RecordStore::new();
        backward.put_received(&[newer, older]);

        assert_eq!(forward.get_record("k"), backward.get_record("k"));
        assert_eq!(forward.get_record("k").unwrap().ds, "#new");
        assert_eq!(
            forward.get_stats_at(0, 1_000, 0),
            backward.get_stats_at(0, 1_000, 0)
        );
        assert_eq!(forward.get_stats_at(0, 1_000, 0), stats(&[("#new", 200)]));
    }

    #[test]
    fn batch_items_are_decided_independently() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("local", 0, 10, ""), 500).unwrap();

        let summary = store.put_received(&[
            json!({"key": "good", "t1": 0, "t2": 60, "mt": 1, "st": 2.0}),
            json!({"key": "bad", "t1": "noon", "t2": 60, "mt": 1}),
            json!({"key": "local", "t1": 0, "t2": 60, "mt": 499, "st": 3.0}),
            json!({"t1": 0, "t2": 60, "mt": 1}),
        ]);

        assert_eq!(keys(&summary.accepted), vec!["good"]);
        assert_eq!(summary.dropped, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(store.record_count(), 2);
        assert!(store.get_record("bad").is_none());
    }

    #[test]
    fn local_edit_outranks_future_mt() {
        let mut store = RecordStore::new();
        store.put_received(&[json!({"key": "k", "t1": 0, "t2": 60, "mt": 9_999, "st": 1.0})]);

        let stored = store.put_at(Record::new("k", 0, 90, ""), 100).unwrap();
        assert_eq!(stored.mt, 10_000);
        assert_eq!(store.get_record("k").unwrap().t2, 90);
    }

    // ========== Sync Bookkeeping Tests ==========

    #[test]
    fn mark_pushed_keeps_keys_edited_after_snapshot() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("a", 0, 10, ""), 100).unwrap();
        store.put_at(Record::new("b", 0, 10, ""), 100).unwrap();
        let snapshot = store.pending_records();
        assert_eq!(snapshot.len(), 2);

        store.put_at(Record::new("b", 0, 20, ""), 105).unwrap();
        for record in &snapshot {
            store.mark_pushed(&record.key, record.mt);
        }
        assert_eq!(keys(&store.pending_records()), vec!["b"]);
    }

    #[test]
    fn edit_within_same_second_survives_push_ack() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("a", 0, 10, "first"), 100).unwrap();
        let snapshot = store.pending_records();

        let second = store.put_at(Record::new("a", 0, 10, "second"), 100).unwrap();
        assert!(second.mt > snapshot[0].mt);
        assert!(!store.mark_pushed("a", snapshot[0].mt));
        assert_eq!(keys(&store.pending_records()), vec!["a"]);
    }

    #[test]
    fn echo_of_older_edit_does_not_overwrite_newer_one() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("a", 0, 10, "first"), 100).unwrap();
        store.put_at(Record::new("a", 0, 10, "second"), 100).unwrap();

        let summary = store.put_received(&[json!({
            "key": "a", "t1": 0, "t2": 10, "ds": "first", "mt": 100, "st": 1.0
        })]);
        assert_eq!(summary.rejected, 1);
        assert_eq!(store.get_record("a").unwrap().ds, "second");
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn settings_edited_twice_in_one_second_get_distinct_mt() {
        let mut store = RecordStore::new();
        let first = store.put_setting_at("theme", json!("dark"), 100).unwrap();
        let second = store.put_setting_at("theme", json!("light"), 100).unwrap();
        assert_eq!(second.mt, first.mt + 1);
        assert!(!store.mark_setting_pushed("theme", first.mt));
        assert_eq!(store.pending_settings().len(), 1);
    }

    #[test]
    fn unconfirmed_received_items_become_pending() {
        let mut store = RecordStore::new();
        let summary = store.put_received(&[
            json!({"key": "b", "t1": 0, "t2": 60, "mt": 5}),
            json!({"key": "c", "t1": 0, "t2": 60, "mt": 5, "st": 2.0}),
        ]);
        assert_eq!(summary.accepted.len(), 2);
        assert_eq!(keys(&store.pending_records()), vec!["b"]);

        store.put_received_settings(&[json!({"key": "theme", "value": "dark", "mt": 5})]);
        assert_eq!(store.pending_count(), 2);

        store.put_received(&[json!({"key": "b", "t1": 0, "t2": 60, "mt": 5, "st": 3.0})]);
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn drop_record_removes_all_traces() {
        let mut store = RecordStore::new();
        store.put_at(Record::new("a", 0, 100, "#x"), 100).unwrap();
        store.put_at(Record::new("r", 50, 50, "#x"), 100).unwrap();

        assert!(store.drop_record("a").is_some());
        assert!(store.drop_record("r").is_some());
        assert!(store.drop_record("missing").is_none());
        assert_eq!(store.record_count(), 0);
        assert_eq!(store.pending_count(), 0);
        assert!(store.get_stats_at(0, 1_000, 1_000).is_empty());
    }

    #[test]
    fn reset_replaces_local_state() {
        let mut store = RecordStore::with_bin_width(50);
        store.put_at(Record::new("local", 0, 100, "#x"), 100).unwrap();
        store.put_at(Record::new("run", 10, 10, "#x"), 100).unwrap();
        store.put_setting_at("theme", json!("dark"), 100).unwrap();

        let (records, settings) = store.reset(
            &[json!({"key": "remote", "t1": 0, "t2": 30, "mt": 1, "st": 9.0})],
            &[json!({"key": "theme", "value": "light", "mt": 1, "st": 9.0})],
        );
        assert_eq!(records.accepted.len(), 1);
        assert_eq!(settings.accepted.len(), 1);
        assert!(store.get_record("local").is_none());
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.get_stats_at(0, 1_000, 0), stats(&[("#untagged", 30)]));
        assert_eq!(store.get_setting("theme").unwrap().value, json!("light"));
        assert!(store.get_running_records().is_empty());
        assert_eq!(store.index().bin_width(), 50);
        assert_eq!(store.index().len(), 1);
    }

    #[test]
    fn settings_follow_the_same_policy() {
        let mut store = RecordStore::new();
        store.put_setting_at("theme", json!("dark"), 200).unwrap();

        let summary = store.put_received_settings(&[
            json!({"key": "theme", "value": "light", "mt": 150, "st": 10.0}),
            json!({"key": "width", "mt": 150}),
        ]);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.dropped, 1);
        assert_eq!(store.get_setting("theme").unwrap().value, json!("dark"));

        store.put_received_settings(&[json!({"key": "theme", "value": "dark", "mt": 200, "st": 11.0})]);
        assert_eq!(store.pending_settings().len(), 0);

        let err = store
            .put_setting_at("huge", json!("x".repeat(300)), 300)
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { .. }));
    }

    // ========== Persistence Tests ==========

    #[derive(Default)]
    struct MemoryItems {
        tables: HashMap<(&'static str, String), Value>,
    }

    impl ItemStore for MemoryItems {
        type Error = serde_json::Error;

        fn select<T, F>(&self, predicate: F) -> Result<Vec<T>, Self::Error>
        where
            T: crate::StoredItem,
            F: Fn(&T) -> bool,
        {
            let mut items = Vec::new();
            for ((table, _), value) in &self.tables {
                if *table == T::TABLE {
                    let item: T = serde_json::from_value(value.clone())?;
                    if predicate(&item) {
                        items.push(item);
                    }
                }
            }
            Ok(items)
        }

        fn select_one<T: crate::StoredItem>(&self, key: &str) -> Result<Option<T>, Self::Error> {
            self.tables
                .get(&(T::TABLE, key.to_string()))
                .map(|value| serde_json::from_value(value.clone()))
                .transpose()
        }

        fn put<T: crate::StoredItem>(&mut self, item: &T) -> Result<(), Self::Error> {
            let value = serde_json::to_value(item)?;
            self.tables.insert((T::TABLE, item.key().to_string()), value);
            Ok(())
        }

        fn remove<T: crate::StoredItem>(&mut self, key: &str) -> Result<bool, Self::Error> {
            Ok(self.tables.remove(&(T::TABLE, key.to_string())).is_some())
        }

        fn clear(&mut self) -> Result<(), Self::Error> {
            self.tables.clear();
            Ok(())
        }
    }

    #[test]
    fn load_restores_index_and_pending_state() {
        let mut items = MemoryItems::default();
        let mut store = RecordStore::new();
        let local = store.put_at(Record::new("local", 0, 100, "#a"), 100).unwrap();
        let remote = store.put_received(&[json!({"key": "remote", "t1": 200, "t2": 260, "ds": "#b", "mt": 1, "st": 4.0})]);
        let setting = store.put_setting_at("theme", json!("dark"), 100).unwrap();
        items.put(&local).unwrap();
        items.put_all(&remote.accepted).unwrap();
        items.put(&setting).unwrap();

        let loaded = RecordStore::load(&items).unwrap();
        assert_eq!(loaded.record_count(), 2);
        assert_eq!(keys(&loaded.pending_records()), vec!["local"]);
        assert_eq!(loaded.pending_settings().len(), 1);
        assert_eq!(
            loaded.get_stats_at(0, 1_000, 1_000),
            stats(&[("#a", 100), ("#b", 60)])
        );
        let fetched: Option<Record> = items.select_one("remote").unwrap();
        assert_eq!(fetched.as_ref(), loaded.get_record("remote"));
    }
}
