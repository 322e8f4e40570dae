//! One push/pull round against the authority.
//!
//! A round pushes pending records and settings in size-bounded chunks, then
//! pulls everything accepted since the watermark and feeds it through the
//! store's received path. Any transport or decoding failure aborts the round
//! with local pending state intact, so the next round resends it.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tally_core::{Record, Setting, SharedStore};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::SyncError;
use crate::client::Authority;
use crate::wire::{self, PushResponse};

/// Upper bound on a single push body.
pub const DEFAULT_PUSH_LIMIT: usize = 10 * 1024 * 1024;

/// Coarse sync state, suitable for a status indicator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// Everything local is confirmed.
    #[default]
    Ok,
    /// Local writes are waiting to be pushed.
    Pending,
    Syncing,
    /// The last round failed; pending writes are kept.
    Error(String),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Pending => f.write_str("pending"),
            Self::Syncing => f.write_str("syncing"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// What one round changed locally.
///
/// Callers persisting the store write `records`/`settings`, delete `dropped_*`,
/// and clear their storage first when `reset` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub pushed: usize,
    /// Keys dropped locally because the authority refused them or they
    /// exceeded the push limit.
    pub dropped_records: Vec<String>,
    pub dropped_settings: Vec<String>,
    /// Messages the authority attached to its push responses.
    pub errors: Vec<String>,
    pub reset: bool,
    /// Pulled items now current in the store.
    pub records: Vec<Record>,
    pub settings: Vec<Setting>,
    pub rejected: usize,
    pub malformed: usize,
    pub server_time: f64,
}

/// Drives sync rounds for one store against one authority.
#[derive(Debug)]
pub struct SyncEngine<A> {
    authority: A,
    store: SharedStore,
    since: f64,
    push_limit: usize,
    status: watch::Sender<SyncStatus>,
}

impl<A: Authority> SyncEngine<A> {
    pub fn new(authority: A, store: SharedStore) -> Self {
        let (status, _) = watch::channel(SyncStatus::Ok);
        Self {
            authority,
            store,
            since: 0.0,
            push_limit: DEFAULT_PUSH_LIMIT,
            status,
        }
    }

    /// Resumes pulling from a previously saved watermark.
    #[must_use]
    pub fn with_since(mut self, since: f64) -> Self {
        self.since = since;
        self
    }

    #[must_use]
    pub fn with_push_limit(mut self, bytes: usize) -> Self {
        self.push_limit = bytes;
        self
    }

    /// Watermark for the next pull.
    pub const fn since(&self) -> f64 {
        self.since
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub const fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Marks the status pending if local writes are waiting, unless a round is running.
    pub fn refresh_status(&self) {
        let pending = self.store.read().pending_count() > 0;
        self.status.send_if_modified(|status| {
            let next = match status {
                SyncStatus::Syncing | SyncStatus::Error(_) => return false,
                _ if pending => SyncStatus::Pending,
                _ => SyncStatus::Ok,
            };
            let changed = *status != next;
            *status = next;
            changed
        });
    }

    /// Runs one push/pull round.
    pub async fn sync_once(&mut self) -> Result<SyncReport, SyncError> {
        self.status.send_replace(SyncStatus::Syncing);
        match self.round().await {
            Ok(report) => {
                let pending = self.store.read().pending_count();
                let status = if pending > 0 {
                    SyncStatus::Pending
                } else {
                    SyncStatus::Ok
                };
                info!(
                    pushed = report.pushed,
                    pulled = report.records.len() + report.settings.len(),
                    pending,
                    reset = report.reset,
                    "sync complete"
                );
                self.status.send_replace(status);
                Ok(report)
            }
            Err(err) => {
                warn!(%err, "sync failed; pending writes kept");
                self.status.send_replace(SyncStatus::Error(err.to_string()));
                Err(err)
            }
        }
    }

    async fn round(&mut self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        self.push_records(&mut report).await?;
        self.push_settings(&mut report).await?;
        self.pull(&mut report).await?;
        Ok(report)
    }

    async fn push_records(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let pending = self.store.read().pending_records();
        if pending.is_empty() {
            return Ok(());
        }
        let versions: HashMap<String, i64> =
            pending.iter().map(|r| (r.key.clone(), r.mt)).collect();
        let payloads = pending
            .iter()
            .map(|record| (record.key.clone(), wire::record_payload(record)));
        let (chunks, oversized) = chunk_payloads(payloads, self.push_limit);

        for key in oversized {
            warn!(%key, limit = self.push_limit, "record exceeds push limit");
            self.store.write().drop_record(&key);
            report.dropped_records.push(key);
        }
        for chunk in chunks {
            debug!(items = chunk.len(), "pushing records");
            let response = self.authority.push_records(&chunk).await?;
            report.pushed += response.accepted.len();
            {
                let mut store = self.store.write();
                for key in &response.accepted {
                    if let Some(&mt) = versions.get(key) {
                        store.mark_pushed(key, mt);
                    }
                }
                for key in &response.failed {
                    if versions.contains_key(key) && store.drop_record(key).is_some() {
                        report.dropped_records.push(key.clone());
                    }
                }
            }
            collect_errors(response, report);
        }
        Ok(())
    }

    async fn push_settings(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let pending = self.store.read().pending_settings();
        if pending.is_empty() {
            return Ok(());
        }
        let versions: HashMap<String, i64> =
            pending.iter().map(|s| (s.key.clone(), s.mt)).collect();
        let payloads = pending
            .iter()
            .map(|setting| (setting.key.clone(), wire::setting_payload(setting)));
        let (chunks, oversized) = chunk_payloads(payloads, self.push_limit);

        for key in oversized {
            warn!(%key, limit = self.push_limit, "setting exceeds push limit");
            self.store.write().drop_setting(&key);
            report.dropped_settings.push(key);
        }
        for chunk in chunks {
            debug!(items = chunk.len(), "pushing settings");
            let response = self.authority.push_settings(&chunk).await?;
            report.pushed += response.accepted.len();
            {
                let mut store = self.store.write();
                for key in &response.accepted {
                    if let Some(&mt) = versions.get(key) {
                        store.mark_setting_pushed(key, mt);
                    }
                }
                for key in &response.failed {
                    if versions.contains_key(key) && store.drop_setting(key).is_some() {
                        report.dropped_settings.push(key.clone());
                    }
                }
            }
            collect_errors(response, report);
        }
        Ok(())
    }

    async fn pull(&mut self, report: &mut SyncReport) -> Result<(), SyncError> {
        let response = self.authority.pull(self.since).await?;
        if !response.server_time.is_finite() {
            return Err(SyncError::InvalidResponse(format!(
                "server_time is not a number: {}",
                response.server_time
            )));
        }

        let (records, settings) = {
            let mut store = self.store.write();
            if response.reset {
                warn!(
                    records = response.records.len(),
                    "authority requested reset; replacing local history"
                );
                store.reset(&response.records, &response.settings)
            } else {
                (
                    store.put_received(&response.records),
                    store.put_received_settings(&response.settings),
                )
            }
        };

        report.reset = response.reset;
        report.rejected = records.rejected + settings.rejected;
        report.malformed = records.dropped + settings.dropped;
        report.records = records.accepted;
        report.settings = settings.accepted;
        report.server_time = response.server_time;
        self.since = response.server_time;
        Ok(())
    }
}

fn collect_errors(response: PushResponse, report: &mut SyncReport) {
    for message in response.errors {
        warn!(%message, "authority reported push error");
        report.errors.push(message);
    }
}

/// Splits payloads into JSON arrays no larger than `limit` bytes.
///
/// Returns the chunks plus the keys of items that cannot fit even alone.
fn chunk_payloads(
    payloads: impl IntoIterator<Item = (String, Value)>,
    limit: usize,
) -> (Vec<Vec<Value>>, Vec<String>) {
    let mut chunks = Vec::new();
    let mut oversized = Vec::new();
    let mut current = Vec::new();
    // Bytes of the encoded array so far, brackets included.
    let mut size = 2;

    for (key, payload) in payloads {
        let len = payload.to_string().len();
        if len + 2 > limit {
            oversized.push(key);
            continue;
        }
        let separator = usize::from(!current.is_empty());
        if size + separator + len > limit {
            chunks.push(std::mem::take(&mut current));
            size = 2;
        }
        size += usize::from(!current.is_empty()) + len;
        current.push(payload);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    (chunks, oversized)
}
