//! Generic JSON webhook notifier
//!
//! POSTs alerts and run results as JSON. Transient failures (connection
//! errors, timeouts, 429 and 5xx responses) are retried with backoff.

use std::time::Duration;

use application::{ApplicationError, NotifierPort};
use async_trait::async_trait;
use domain::{Alert, AlertRule, ExperimentResult};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::retry::{RetryConfig, Retryable, with_retry};

/// Header carrying a per-delivery id
pub const X_REQUEST_ID: &str = "x-request-id";

/// Webhook endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint URL
    pub url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Backoff for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

const fn default_timeout_secs() -> u64 {
    10
}

impl WebhookConfig {
    /// Settings for `url` with default timeout and retries
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }

    /// Set the backoff
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Webhook delivery failure
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Transport-level failure
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("webhook returned {0}")]
    Status(StatusCode),
}

impl Retryable for WebhookError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            },
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Payload<'a> {
    Alert {
        alert: &'a Alert,
        rule: &'a AlertRule,
    },
    Result {
        result: &'a ExperimentResult,
    },
}

/// Delivers JSON payloads to one webhook endpoint
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    /// Create a notifier for `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("chaosctl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    /// Endpoint this notifier posts to
    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn post_once(&self, payload: &Payload<'_>, request_id: &Uuid) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(&self.config.url)
            .header(X_REQUEST_ID, request_id.to_string())
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::Status(status))
        }
    }

    #[instrument(skip(self, payload), fields(url = %self.config.url))]
    async fn deliver(&self, payload: Payload<'_>) -> Result<(), ApplicationError> {
        let request_id = Uuid::new_v4();
        let (outcome, attempts) =
            with_retry(&self.config.retry, || self.post_once(&payload, &request_id)).await;
        match outcome {
            Ok(()) => {
                debug!(%request_id, attempts, "Webhook delivered");
                Ok(())
            },
            Err(e) => Err(ApplicationError::Notification(format!(
                "{} after {attempts} attempt(s): {e}",
                self.config.url
            ))),
        }
    }
}

#[async_trait]
impl NotifierPort for WebhookNotifier {
    async fn notify_alert(&self, alert: &Alert, rule: &AlertRule) -> Result<(), ApplicationError> {
        self.deliver(Payload::Alert { alert, rule }).await
    }

    async fn notify_result(&self, result: &ExperimentResult) -> Result<(), ApplicationError> {
        self.deliver(Payload::Result { result }).await
    }
}
