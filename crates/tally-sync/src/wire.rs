//! Authority request and response bodies.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tally_core::{Record, Setting};

/// Outcome of a push, per key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub accepted: Vec<String>,
    /// Keys the authority refused; the local copies are considered corrupt.
    pub failed: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Items changed since a watermark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Watermark to send on the next pull.
    pub server_time: f64,
    /// When set, `records` and `settings` are the full history and replace
    /// everything held locally.
    #[serde(default)]
    pub reset: bool,
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default)]
    pub settings: Vec<Value>,
}

/// Push body for one record. The authority assigns `st`, so it is not sent.
pub fn record_payload(record: &Record) -> Value {
    json!({
        "key": record.key,
        "mt": record.mt,
        "t1": record.t1,
        "t2": record.t2,
        "ds": record.ds,
    })
}

pub fn setting_payload(setting: &Setting) -> Value {
    json!({
        "key": setting.key,
        "mt": setting.mt,
        "value": setting.value,
    })
}
