//! Synchronization between the local record store and the authority.
//!
//! Provides:
//! - [`Client`], the HTTP implementation of the [`Authority`] API
//! - [`SyncEngine`], which pushes pending writes and pulls confirmed ones
//! - [`Scheduler`], a debounced background loop around the engine

mod client;
mod engine;
mod scheduler;
pub mod wire;

use thiserror::Error;

pub use client::{Authority, Client, DEFAULT_TIMEOUT};
pub use engine::{DEFAULT_PUSH_LIMIT, SyncEngine, SyncReport, SyncStatus};
pub use scheduler::{Scheduler, SchedulerConfig};

/// Sync errors. All of them are transient: local state is kept for retry.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The configured server URL is unusable.
    #[error("invalid server URL: {reason}")]
    InvalidServerUrl { reason: &'static str },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The authority answered with an error status.
    #[error("authority error (status {status}): {message}")]
    Api { status: u16, message: String },
    /// The authority answered with a body we cannot decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
