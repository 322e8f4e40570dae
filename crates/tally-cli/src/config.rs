//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Base URL of the authority; sync is disabled without one.
    #[serde(default)]
    pub server_url: Option<String>,
    /// Token sent with every authority request.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Upper bound on a single push body.
    pub push_limit_bytes: usize,
    pub request_timeout_secs: u64,
    /// Where sync watermarks are kept, per authority.
    pub sync_state_path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("server_url", &self.server_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("push_limit_bytes", &self.push_limit_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("sync_state_path", &self.sync_state_path)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        let config_dir = dirs_config_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("tally.db"),
            server_url: None,
            api_token: None,
            push_limit_bytes: tally_sync::DEFAULT_PUSH_LIMIT,
            request_timeout_secs: tally_sync::DEFAULT_TIMEOUT.as_secs(),
            sync_state_path: config_dir.join("sync.json"),
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // TALLY_SERVER_URL, TALLY_API_TOKEN, ...
        figment = figment.merge(Env::prefixed("TALLY_"));

        figment.extract()
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Returns the platform-specific config directory for tally.
///
/// On Linux: `~/.config/tally`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tally"))
}

/// Returns the platform-specific data directory for tally.
///
/// On Linux: `~/.local/share/tally`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("tally"))
}
