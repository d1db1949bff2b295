//! Compute Engine API client
//!
//! Provides a typed HTTP client for the Compute Engine v1 REST API.
//! Handles authentication headers, per-call timeouts, status classification
//! and `instances.list` pagination.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cloudmirror_core::config::RemoteConfig;
//! use cloudmirror_gcp::client::GcpComputeClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = GcpComputeClient::new("ya29.token", "my-project", "us-east1-b", &RemoteConfig::default())?;
//! let page = client.list_instances(None, 100).await?;
//! println!("Got {} instances", page.items.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use cloudmirror_core::config::RemoteConfig;

use crate::instances::GcpInstanceList;
use crate::GcpError;

/// Default retry-after duration when the header is missing
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Longest Retry-After the client is willing to sleep for
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Maximum number of retries for 429 responses
const MAX_THROTTLE_RETRIES: u32 = 3;

/// HTTP client for one project and zone
pub struct GcpComputeClient {
    client: Client,
    base_url: String,
    access_token: String,
    project: String,
    zone: String,
    list_timeout: Duration,
}

impl GcpComputeClient {
    /// Creates a client against the configured base URL
    ///
    /// `remote.request_timeout_secs` bounds every call; listing calls use the
    /// larger `remote.list_timeout_secs`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        access_token: impl Into<String>,
        project: impl Into<String>,
        zone: impl Into<String>,
        remote: &RemoteConfig,
    ) -> Result<Self> {
        Self::with_base_url(access_token, project, zone, remote, remote.base_url.clone())
    }

    /// Creates a client with a custom base URL (useful for testing)
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_base_url(
        access_token: impl Into<String>,
        project: impl Into<String>,
        zone: impl Into<String>,
        remote: &RemoteConfig,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(remote.request_timeout())
            .build()
            .context("Failed to build Compute Engine HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            project: project.into(),
            zone: zone.into(),
            list_timeout: remote.list_timeout(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request builder for an absolute URL
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    /// URL of the zone's instance collection
    fn instances_url(&self) -> Result<Url> {
        let raw = format!(
            "{}/projects/{}/zones/{}/instances",
            self.base_url, self.project, self.zone
        );
        Url::parse(&raw).with_context(|| format!("Invalid instances URL {raw}"))
    }

    /// Lists one page of instances in the zone
    ///
    /// `page_token` is the `nextPageToken` of the previous page, or `None`
    /// for the first page.
    ///
    /// # Errors
    /// Returns a [`GcpError`] (wrapped in `anyhow`) for non-success statuses,
    /// network failures and unparseable bodies.
    #[tracing::instrument(skip(self), fields(project = %self.project, zone = %self.zone))]
    pub async fn list_instances(
        &self,
        page_token: Option<&str>,
        max_results: usize,
    ) -> Result<GcpInstanceList> {
        let mut url = self.instances_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("maxResults", &max_results.to_string());
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let response = self.execute_with_retry(Method::GET, url).await?;
        let body = response.text().await.map_err(GcpError::Network)?;
        let list: GcpInstanceList = serde_json::from_str(&body)
            .map_err(|e| GcpError::InvalidResponse(format!("instances.list: {e}")))?;

        debug!(
            items = list.items.len(),
            has_next = list.next_page_token.is_some(),
            "Listed instances"
        );
        Ok(list)
    }

    /// Sends a listing request, retrying 429 responses after `Retry-After`
    async fn execute_with_retry(&self, method: Method, url: Url) -> Result<Response> {
        for attempt in 0..=MAX_THROTTLE_RETRIES {
            let response = self
                .request(method.clone(), url.clone())
                .timeout(self.list_timeout)
                .send()
                .await
                .map_err(GcpError::Network)?;

            match classify_response(response).await {
                Err(GcpError::TooManyRequests { retry_after }) if attempt < MAX_THROTTLE_RETRIES => {
                    info!(
                        attempt,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Received 429, backing off"
                    );
                    tokio::time::sleep(retry_after).await;
                }
                Err(e) => return Err(e.into()),
                Ok(response) => {
                    if attempt > 0 {
                        info!(attempt, "Request succeeded after retry");
                    }
                    return Ok(response);
                }
            }
        }

        Err(anyhow::anyhow!(
            "Request failed: retry loop exited unexpectedly for {}",
            url
        ))
    }
}

/// Maps non-success statuses to [`GcpError`]
async fn classify_response(response: Response) -> Result<Response, GcpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .map(parse_retry_after)
        .unwrap_or(DEFAULT_RETRY_AFTER);
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| status.to_string());

    Err(match status {
        StatusCode::UNAUTHORIZED => GcpError::Unauthorized(message),
        StatusCode::FORBIDDEN => GcpError::Forbidden(message),
        StatusCode::NOT_FOUND => GcpError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => GcpError::TooManyRequests { retry_after },
        s if s.is_server_error() => GcpError::ServerError(message),
        _ => GcpError::InvalidResponse(format!("unexpected status {status}: {message}")),
    })
}

/// Extracts `error.message` from a Google API error body
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

/// Parses a `Retry-After` value in seconds, capped at [`MAX_RETRY_AFTER`]
pub fn parse_retry_after(value: &str) -> Duration {
    match value.trim().parse::<u64>() {
        Ok(seconds) => Duration::from_secs(seconds).min(MAX_RETRY_AFTER),
        Err(_) => {
            warn!(value, "Could not parse Retry-After header, using default");
            DEFAULT_RETRY_AFTER
        }
    }
}
