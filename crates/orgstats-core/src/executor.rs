//! GraphQL query execution.
//!
//! [`QueryExecutor`] is the seam between the walker and the network: one
//! call, one query, one raw `{data, errors}` response. Retrying is the
//! walker's job; the executor only classifies failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::GithubConfig;
use crate::credentials::Credential;

const USER_AGENT: &str = concat!("orgstats/", env!("CARGO_PKG_VERSION"));

/// A raw GraphQL response.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct GraphQlResponse {
    /// Result payload; may be partial when `errors` is non-empty.
    #[serde(default)]
    pub data: Option<Value>,
    /// Errors reported by the server.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub errors: Vec<GraphQlError>,
}

impl GraphQlResponse {
    /// A successful response carrying `data`.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }
}

/// One entry of a response's `errors` array.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GraphQlError {
    /// Human-readable description.
    pub message: String,
    /// GitHub's error class, e.g. `NOT_FOUND`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl GraphQlError {
    /// An error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }

    /// Whether GitHub classed this as `NOT_FOUND`.
    pub fn is_not_found(&self) -> bool {
        self.kind.as_deref() == Some("NOT_FOUND")
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<GraphQlError>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<GraphQlError>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Failures below the GraphQL layer.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Connection, TLS, or body transfer failure.
    #[error("network error: {0}")]
    Transport(String),

    /// The attempt did not finish in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Primary or secondary rate limit hit.
    #[error("rate limited by the API")]
    RateLimited {
        /// Server-suggested wait, when given.
        retry_after: Option<Duration>,
    },

    /// 5xx from the API.
    #[error("server error (HTTP {status})")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// The token was rejected.
    #[error("credential rejected (HTTP {status})")]
    Unauthorized {
        /// HTTP status code.
        status: u16,
    },

    /// Any other non-success status.
    #[error("unexpected HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnosis.
        body: String,
    },

    /// The body was not a GraphQL response document.
    #[error("malformed response body: {0}")]
    Decode(String),
}

impl ExecutorError {
    /// Whether retrying the same request may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Server-suggested delay before retrying.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Executes a single GraphQL query.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `query` with `variables` and return the raw response.
    async fn execute(&self, query: &str, variables: Value) -> Result<GraphQlResponse, ExecutorError>;
}

/// [`QueryExecutor`] backed by the GitHub GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GithubExecutor {
    http: Client,
    endpoint: String,
    credential: Credential,
    timeout: Duration,
}

impl GithubExecutor {
    /// Build an executor for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Transport`] if the HTTP client cannot be built.
    pub fn new(credential: Credential, config: &GithubConfig) -> Result<Self, ExecutorError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.api_url.clone(),
            credential,
            timeout: config.timeout(),
        })
    }

    fn classify(&self, err: &reqwest::Error) -> ExecutorError {
        if err.is_timeout() {
            ExecutorError::Timeout(self.timeout)
        } else {
            ExecutorError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl QueryExecutor for GithubExecutor {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn execute(&self, query: &str, variables: Value) -> Result<GraphQlResponse, ExecutorError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.credential.expose())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status();
        debug!(status = status.as_u16(), "graphql response");
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &headers, body));
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(&e))?;
        serde_json::from_slice(&bytes).map_err(|e| ExecutorError::Decode(e.to_string()))
    }
}

/// Map a non-success HTTP status to an [`ExecutorError`].
///
/// GitHub signals secondary rate limits with 403 plus `Retry-After` or an
/// exhausted `x-ratelimit-remaining`, so 403 alone is not an auth failure.
fn status_error(status: StatusCode, headers: &HeaderMap, body: String) -> ExecutorError {
    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let quota_exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    match status {
        StatusCode::TOO_MANY_REQUESTS => ExecutorError::RateLimited { retry_after },
        StatusCode::FORBIDDEN if retry_after.is_some() || quota_exhausted => {
            ExecutorError::RateLimited { retry_after }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExecutorError::Unauthorized {
            status: status.as_u16(),
        },
        s if s.is_server_error() => ExecutorError::Server { status: s.as_u16() },
        s => ExecutorError::Status {
            status: s.as_u16(),
            body,
        },
    }
}
