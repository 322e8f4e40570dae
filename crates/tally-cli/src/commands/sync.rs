//! `tally sync`: one push/pull round against the configured authority.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{ItemStore, Record, Setting, SharedStore};
use tally_db::Database;
use tally_sync::{Authority, Client, SyncEngine, SyncReport};

use crate::Config;
use crate::commands::open_store;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<SyncReport> {
    let Some(url) = config.server_url.as_deref() else {
        anyhow::bail!("no server_url configured; set it in config.toml or TALLY_SERVER_URL");
    };
    let client = Client::new(url, config.api_token.clone(), config.request_timeout())
        .context("failed to create authority client")?;
    let authority_id = client.base_url().to_string();
    run_with(writer, config, client, &authority_id)
}

/// Runs a round against `authority`, keeping its watermark under `authority_id`.
pub fn run_with<W: Write, A: Authority>(
    writer: &mut W,
    config: &Config,
    authority: A,
    authority_id: &str,
) -> Result<SyncReport> {
    let mut state = SyncState::load(&config.sync_state_path)?;
    let (mut db, store) = open_store(config)?;
    let since = state.position(authority_id).map_or(0.0, |pos| pos.since);

    let mut engine = SyncEngine::new(authority, SharedStore::new(store))
        .with_since(since)
        .with_push_limit(config.push_limit_bytes);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let report = runtime
        .block_on(engine.sync_once())
        .with_context(|| format!("sync with {authority_id} failed"))?;

    persist(&mut db, &report)?;
    let synced_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    state.record_sync(authority_id, engine.since(), synced_at);
    state.save(&config.sync_state_path)?;

    if report.reset {
        writeln!(writer, "Authority reset local history.")?;
    }
    writeln!(
        writer,
        "Pushed {}, pulled {} record(s) and {} setting(s).",
        report.pushed,
        report.records.len(),
        report.settings.len()
    )?;
    let dropped = report.dropped_records.len() + report.dropped_settings.len();
    if dropped > 0 {
        writeln!(writer, "Dropped {dropped} item(s) refused by the authority.")?;
    }
    for message in &report.errors {
        writeln!(writer, "  {message}")?;
    }
    let pending = engine.store().read().pending_count();
    if pending > 0 {
        writeln!(writer, "{pending} item(s) still pending.")?;
    }
    Ok(report)
}

/// Mirrors a round's local changes into the database.
fn persist(db: &mut Database, report: &SyncReport) -> Result<()> {
    if report.reset {
        db.clear().context("failed to clear database for reset")?;
    }
    db.put_all(&report.records)
        .context("failed to save pulled records")?;
    db.put_all(&report.settings)
        .context("failed to save pulled settings")?;
    for key in &report.dropped_records {
        db.remove::<Record>(key)
            .with_context(|| format!("failed to remove record {key}"))?;
    }
    for key in &report.dropped_settings {
        db.remove::<Setting>(key)
            .with_context(|| format!("failed to remove setting {key}"))?;
    }
    Ok(())
}

/// Pull watermarks, keyed by authority URL.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SyncState {
    authorities: BTreeMap<String, SyncPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPosition {
    pub since: f64,
    pub last_synced_at: String,
}

impl SyncState {
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed = serde_json::from_str(&contents)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                Ok(parsed)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to encode sync state")?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn position(&self, authority: &str) -> Option<&SyncPosition> {
        self.authorities.get(authority)
    }

    fn record_sync(&mut self, authority: &str, since: f64, synced_at: String) {
        self.authorities.insert(
            authority.to_string(),
            SyncPosition {
                since,
                last_synced_at: synced_at,
            },
        );
    }
}
