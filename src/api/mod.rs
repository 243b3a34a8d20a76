//! Paced HTTP client for a Lemmy server
//!
//! Every request is an operation on the host's [`ThrottleQueue`], so all
//! callers sharing a host share its rate limit. Payloads stay raw JSON.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use thiserror::Error;

use crate::throttle::{DEFAULT_PRIORITY, Priority, TaskError, ThrottleQueue};

/// Path prefix of the Lemmy HTTP API
pub const API_PREFIX: &str = "/api/v3";

/// Errors from a paced API request
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport or decoding failure
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status
        status: StatusCode,
        /// Response body, for diagnostics
        body: String,
    },

    /// The request was cleared from the host queue before it was sent
    #[error("request was cancelled before it was sent")]
    Cancelled,

    /// The host queue went away before the request settled
    #[error("request was dropped before it settled")]
    Abandoned,
}

impl From<TaskError<ApiError>> for ApiError {
    fn from(err: TaskError<ApiError>) -> Self {
        match err {
            TaskError::Cancelled => Self::Cancelled,
            TaskError::Operation(e) => e,
            TaskError::Abandoned => Self::Abandoned,
        }
    }
}

/// Host part of an instance URL, lowercased (`https://Lemmy.ml/` -> `lemmy.ml`)
pub fn host_of(instance: &str) -> String {
    let trimmed = instance.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest);
    without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Lemmy API client whose requests go through a shared host queue
#[derive(Debug, Clone)]
pub struct LemmyClient {
    http: Client,
    instance: String,
    queue: ThrottleQueue,
    token: Option<String>,
}

impl LemmyClient {
    /// Create a client for `instance` paced by `queue`
    pub fn new(instance: &str, queue: ThrottleQueue, timeout: Duration) -> Result<Self, ApiError> {
        let instance = if instance.contains("://") {
            instance.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", instance.trim_end_matches('/'))
        };
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lemming/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            instance,
            queue,
            token: None,
        })
    }

    /// Attach a login token sent as a bearer credential
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base URL of the server
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Host key of the server
    pub fn host(&self) -> String {
        host_of(&self.instance)
    }

    /// Whether requests carry a login token
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// The queue pacing this client
    pub fn queue(&self) -> &ThrottleQueue {
        &self.queue
    }

    /// Build an API URL with an encoded query string
    fn api_url(&self, path: &str, query: &[(&str, &str)]) -> String {
        let mut url = format!("{}{}{}", self.instance, API_PREFIX, path);
        for (i, (key, value)) in query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Paced GET at the default priority
    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        self.get_with_priority(path, query, DEFAULT_PRIORITY).await
    }

    /// Paced GET; higher priority jumps ahead of queued background requests
    pub async fn get_with_priority(
        &self,
        path: &str,
        query: &[(&str, &str)],
        priority: Priority,
    ) -> Result<Value, ApiError> {
        let url = self.api_url(path, query);
        tracing::debug!(%url, priority, "queueing GET");
        let request = self.authorize(self.http.get(url));
        self.queue
            .enqueue_with_priority(move || send_json(request), priority)
            .await
            .map_err(ApiError::from)
    }

    /// Paced POST with a JSON body
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let url = self.api_url(path, &[]);
        tracing::debug!(%url, "queueing POST");
        let request = self.authorize(self.http.post(url).json(body));
        self.queue
            .enqueue(move || send_json(request))
            .await
            .map_err(ApiError::from)
    }
}

async fn send_json(request: RequestBuilder) -> Result<Value, ApiError> {
    let response = request.send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!("Lemmy request failed with {status}");
        return Err(ApiError::Status { status, body });
    }

    Ok(response.json().await?)
}
