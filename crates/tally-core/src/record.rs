//! Time records and settings items.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reconcile::Versioned;
use crate::tag;

/// Description prefix marking a record as soft-deleted.
pub const HIDDEN_MARKER: &str = "HIDDEN";

/// A tagged time interval.
///
/// Records are replaced wholesale: a new version with the same key supersedes
/// the previous one. `t1 == t2` marks a record that is still running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Client-generated identifier, stable for the record's lifetime.
    pub key: String,
    /// Start, in Unix seconds.
    pub t1: i64,
    /// Stop, in Unix seconds. Equal to `t1` while running.
    pub t2: i64,
    /// Free text; tags are derived from it.
    #[serde(default)]
    pub ds: String,
    /// Modification time, assigned by the client on every local write.
    pub mt: i64,
    /// Sequence time assigned by the authority; 0 until confirmed.
    #[serde(default)]
    pub st: f64,
}

impl Record {
    /// Creates an unconfirmed record. `mt` is assigned when it is put.
    pub fn new(key: impl Into<String>, t1: i64, t2: i64, ds: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            t1,
            t2,
            ds: ds.into(),
            mt: 0,
            st: 0.0,
        }
    }

    /// Whether the record has no stop time yet.
    pub const fn is_running(&self) -> bool {
        self.t1 == self.t2
    }

    /// Whether the record is soft-deleted.
    pub fn is_hidden(&self) -> bool {
        self.ds.starts_with(HIDDEN_MARKER)
    }

    /// Whether the authority has confirmed this version.
    pub fn is_confirmed(&self) -> bool {
        self.st > 0.0
    }

    /// Returns a copy carrying the hidden marker.
    #[must_use]
    pub fn hidden(&self) -> Self {
        let mut record = self.clone();
        if !record.is_hidden() {
            record.ds = format!("{HIDDEN_MARKER} {}", record.ds);
        }
        record
    }

    /// Returns a copy with the hidden marker removed.
    #[must_use]
    pub fn revealed(&self) -> Self {
        let mut record = self.clone();
        if let Some(rest) = record.ds.strip_prefix(HIDDEN_MARKER) {
            record.ds = rest.trim_start().to_string();
        }
        record
    }

    /// Sorted unique tags in the description.
    pub fn tags(&self) -> Vec<String> {
        tag::parse_tags(&self.ds)
    }

    /// Tag-combination key used to bucket statistics.
    pub fn tag_key(&self) -> String {
        tag::tag_key(&self.ds)
    }

    /// Seconds this record shares with `[a, b]`, treating running records as
    /// ending at `now`.
    pub fn overlap_at(&self, a: i64, b: i64, now: i64) -> i64 {
        let t2 = if self.is_running() { now } else { self.t2 };
        overlap(self.t1, t2, a, b)
    }
}

impl Versioned for Record {
    fn key(&self) -> &str {
        &self.key
    }

    fn mt(&self) -> i64 {
        self.mt
    }

    fn st(&self) -> f64 {
        self.st
    }
}

/// A user setting, synchronized with the same policy as records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: Value,
    pub mt: i64,
    #[serde(default)]
    pub st: f64,
}

impl Setting {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            mt: 0,
            st: 0.0,
        }
    }
}

impl Versioned for Setting {
    fn key(&self) -> &str {
        &self.key
    }

    fn mt(&self) -> i64 {
        self.mt
    }

    fn st(&self) -> f64 {
        self.st
    }
}

/// Length of the intersection of `[t1, t2]` and `[a, b]`, never negative.
pub fn overlap(t1: i64, t2: i64, a: i64, b: i64) -> i64 {
    (t2.min(b) - t1.max(a)).max(0)
}
