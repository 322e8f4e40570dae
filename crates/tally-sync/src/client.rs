//! HTTP client for the record authority.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::SyncError;
use crate::wire::{PullResponse, PushResponse};

/// Default request timeout for authority calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_HEADER: &str = "authtoken";

/// The remote store that assigns `st` and holds the canonical history.
///
/// Implemented over HTTP by [`Client`]; tests substitute in-memory fakes.
pub trait Authority: Send + Sync {
    /// Sends record payloads and reports which keys were accepted.
    fn push_records(
        &self,
        records: &[Value],
    ) -> impl Future<Output = Result<PushResponse, SyncError>> + Send;

    fn push_settings(
        &self,
        settings: &[Value],
    ) -> impl Future<Output = Result<PushResponse, SyncError>> + Send;

    /// Fetches everything the authority accepted after `since`.
    fn pull(&self, since: f64) -> impl Future<Output = Result<PullResponse, SyncError>> + Send;
}

/// Authority API client.
///
/// # Thread Safety
///
/// The client is safe to clone and share across threads. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client for the authority at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not http(s), or if the HTTP client
    /// fails to build.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncError::InvalidServerUrl {
                reason: "server URL cannot be empty",
            });
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(SyncError::InvalidServerUrl {
                reason: "server URL must start with http:// or https://",
            });
        }
        let token = token.filter(|token| !token.trim().is_empty());

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SyncError::ClientBuild)?;

        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn put<T: DeserializeOwned>(&self, path: &str, items: &[Value]) -> Result<T, SyncError> {
        let response = self
            .authorize(self.http.put(self.url(path)))
            .json(items)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        decode_response(status, &body)
    }
}

impl Authority for Client {
    async fn push_records(&self, records: &[Value]) -> Result<PushResponse, SyncError> {
        self.put("records", records).await
    }

    async fn push_settings(&self, settings: &[Value]) -> Result<PushResponse, SyncError> {
        self.put("settings", settings).await
    }

    async fn pull(&self, since: f64) -> Result<PullResponse, SyncError> {
        let url = format!("{}?since={since}", self.url("updates"));
        let response = self.authorize(self.http.get(url)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        decode_response(status, &body)
    }
}

fn decode_response<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, SyncError> {
    if !status.is_success() {
        return Err(SyncError::Api {
            status: status.as_u16(),
            message: parse_api_error(body).unwrap_or_else(|| body.trim().to_string()),
        });
    }
    serde_json::from_str(body).map_err(|err| SyncError::InvalidResponse(err.to_string()))
}

fn parse_api_error(body: &str) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct ErrorPayload {
        error: String,
    }

    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .map(|payload| payload.error)
}
