//! Client for a Librato-style hosted metrics REST API.
//!
//! The injector leaves a trail of metrics behind on whatever account it was
//! pointed at; this client lists and deletes them. Deletion is one request
//! per metric because the API's multi-delete endpoint has not proven
//! reliable.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{debug, info};

fn default_base_url() -> String {
    "https://metrics-api.librato.com".to_string()
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of the metrics API client.
pub struct Config {
    /// Base URL of the API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Account email for basic authentication.
    pub email: String,
    /// API token for basic authentication.
    pub token: String,
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Client`].
pub enum Error {
    /// The API rejected the configured credentials.
    #[error("Credentials rejected with status {status}")]
    Auth {
        /// The rejecting status code
        status: StatusCode,
    },
    /// The API answered with an unexpected status.
    #[error("Unexpected status {status} from {operation}")]
    UnexpectedStatus {
        /// The unexpected status code
        status: StatusCode,
        /// The operation that received it
        operation: &'static str,
    },
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct MetricsPage {
    #[serde(default)]
    query: PageQuery,
    metrics: Vec<MetricEntry>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
struct PageQuery {
    #[serde(default)]
    found: u64,
    #[serde(default)]
    offset: u64,
}

#[derive(Debug, Deserialize)]
struct MetricEntry {
    name: String,
}

fn names_from_page(page: &MetricsPage) -> Vec<String> {
    page.metrics.iter().map(|m| m.name.clone()).collect()
}

/// The metrics API client.
#[derive(Debug)]
pub struct Client {
    http: reqwest::Client,
    config: Config,
}

impl Client {
    /// Create a new [`Client`].
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: Config) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, config })
    }

    /// List every metric name on the account, walking pagination.
    ///
    /// # Errors
    ///
    /// Function will return an error on credential rejection, unexpected
    /// statuses or transport failure.
    pub async fn list_metric_names(&self) -> Result<Vec<String>, Error> {
        let url = format!("{}/v1/metrics", self.config.base_url);
        let mut names: Vec<String> = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let response = self
                .http
                .get(&url)
                .basic_auth(&self.config.email, Some(&self.config.token))
                .query(&[("offset", offset)])
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(Error::Auth { status });
            }
            if !status.is_success() {
                return Err(Error::UnexpectedStatus {
                    status,
                    operation: "list metrics",
                });
            }

            let page: MetricsPage = response.json().await?;
            let page_len = page.metrics.len() as u64;
            debug!(
                offset = page.query.offset,
                found = page.query.found,
                page_len,
                "fetched metrics page"
            );
            names.extend(names_from_page(&page));

            offset += page_len;
            if page_len == 0 || offset >= page.query.found {
                break;
            }
        }

        info!(count = names.len(), "listed metric names");
        Ok(names)
    }

    /// Delete one metric by name. Returns the status the API answered with.
    ///
    /// # Errors
    ///
    /// Function will return an error on credential rejection or transport
    /// failure. Non-auth statuses are returned to the caller, who decides
    /// what a failed delete means.
    pub async fn delete_metric(&self, name: &str) -> Result<StatusCode, Error> {
        let url = format!("{}/v1/metrics/{}", self.config.base_url, name);
        let response = self
            .http
            .delete(&url)
            .basic_auth(&self.config.email, Some(&self.config.token))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Auth { status });
        }
        debug!(metric = name, %status, "delete issued");
        Ok(status)
    }
}
