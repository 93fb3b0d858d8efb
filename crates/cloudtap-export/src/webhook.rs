//! Webhook sink
//!
//! POSTs each event as a JSON object. Server errors and network failures are
//! retried with a doubling delay; client errors are not.

use async_trait::async_trait;
use cloudtap_core::config::WebhookSinkConfig;
use cloudtap_core::{EventRecord, EventSink, SinkError, SinkResult};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Webhook sink settings
#[derive(Debug, Clone)]
pub struct WebhookSinkSettings {
    pub url: String,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further retry
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub user_agent: String,
}

impl Default for WebhookSinkSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            bearer_token: None,
            timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            user_agent: format!("cloudtap/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&WebhookSinkConfig> for WebhookSinkSettings {
    fn from(config: &WebhookSinkConfig) -> Self {
        Self {
            url: config.url.clone(),
            bearer_token: config.bearer_token.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
enum WebhookError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Client error {status}: {body}")]
    ClientError { status: StatusCode, body: String },

    #[error("Server error {status}: {body}")]
    ServerError { status: StatusCode, body: String },
}

/// Webhook delivery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookStats {
    pub events_sent: u64,
    pub events_retried: u64,
    pub events_dropped: u64,
}

/// Delivers events to an HTTP endpoint
pub struct WebhookSink {
    settings: WebhookSinkSettings,
    client: Client,
    events_sent: AtomicU64,
    events_retried: AtomicU64,
    events_dropped: AtomicU64,
}

impl WebhookSink {
    pub fn new(settings: WebhookSinkSettings) -> SinkResult<Self> {
        if settings.url.trim().is_empty() {
            return Err(SinkError::InitializationFailed(
                "Webhook URL cannot be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(&settings.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| {
                SinkError::InitializationFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            settings,
            client,
            events_sent: AtomicU64::new(0),
            events_retried: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        })
    }

    pub fn stats(&self) -> WebhookStats {
        WebhookStats {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_retried: self.events_retried.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }

    async fn send_request(&self, payload: &str) -> Result<(), WebhookError> {
        let mut request = self
            .client
            .post(&self.settings.url)
            .header("Content-Type", "application/json");

        if let Some(token) = &self.settings.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.body(payload.to_string()).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            Err(WebhookError::ClientError { status, body })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(WebhookError::ServerError { status, body })
        }
    }

    async fn send_with_retry(&self, payload: &str) -> SinkResult<()> {
        let mut delay = self.settings.initial_retry_delay;
        let mut attempts = 0;

        loop {
            match self.send_request(payload).await {
                Ok(()) => {
                    if attempts > 0 {
                        self.events_retried.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(());
                }
                Err(WebhookError::ClientError { status, body }) => {
                    warn!(
                        "Webhook request failed with client error {}: {}",
                        status, body
                    );
                    self.events_dropped.fetch_add(1, Ordering::Relaxed);
                    return Err(SinkError::OperationFailed(format!(
                        "Webhook client error {}: {}",
                        status, body
                    )));
                }
                Err(e) => {
                    attempts += 1;
                    if attempts > self.settings.max_retries {
                        error!("Webhook request failed after {} attempts: {}", attempts, e);
                        self.events_dropped.fetch_add(1, Ordering::Relaxed);
                        return Err(SinkError::OperationFailed(format!(
                            "Webhook failed after {} attempts: {}",
                            attempts, e
                        )));
                    }

                    warn!(
                        "Webhook request failed (attempt {}), retrying in {:?}: {}",
                        attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.settings.max_retry_delay);
                }
            }
        }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn enqueue(&self, event: EventRecord) -> SinkResult<()> {
        let payload = serde_json::to_string(&event)?;
        self.send_with_retry(&payload).await?;
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        debug!(event = %event.name, "Delivered event to webhook");
        Ok(())
    }
}
