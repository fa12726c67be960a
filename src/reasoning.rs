//! Reasoning service abstraction.
//!
//! The analysis pipeline talks to a text-completion service through the
//! [`ReasoningService`] trait. [`AnthropicService`] is the production
//! implementation over the Messages API; tests supply scripted doubles.
//!
//! Failures are classified as transient (worth retrying) or permanent.
//! [`complete_with_retry`] applies a per-call timeout and bounded
//! exponential backoff on transient errors, and stops early on cancellation.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::AnalysisConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request rejected {status}: {body}")]
    BadRequest { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("missing credentials: environment variable {0} is not set")]
    MissingCredentials(String),

    #[error("request cancelled")]
    Cancelled,
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited(_)
                | ServiceError::Timeout(_)
                | ServiceError::Server { .. }
                | ServiceError::Network(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError>;
}

/// Messages API client.
pub struct AnthropicService {
    client: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl AnthropicService {
    /// Build a client, reading the API key from the environment variable
    /// named by `analysis.api_key_env`.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, ServiceError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ServiceError::MissingCredentials(config.api_key_env.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ReasoningService for AnthropicService {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.system {
            body["system"] = serde_json::Value::String(system.clone());
        }

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout(Duration::ZERO)
                } else {
                    ServiceError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;
            return parse_messages_response(&json);
        }

        let body_text = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            429 => ServiceError::RateLimited(body_text),
            code if status.is_server_error() => ServiceError::Server {
                status: code,
                body: body_text,
            },
            code => ServiceError::BadRequest {
                status: code,
                body: body_text,
            },
        })
    }
}

/// Concatenate the `text` blocks of a Messages API response.
fn parse_messages_response(json: &serde_json::Value) -> Result<String, ServiceError> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ServiceError::MalformedResponse("missing content array".to_string()))?;

    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(ServiceError::MalformedResponse(
            "response contained no text blocks".to_string(),
        ));
    }
    Ok(text.join(""))
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Applied to every attempt separately.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based): 1s, 2s, 4s, ... capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(5);
        (self.base_delay * factor).min(self.max_delay)
    }
}

/// Call the service with a timeout per attempt, retrying transient failures.
pub async fn complete_with_retry(
    service: &dyn ReasoningService,
    request: &CompletionRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<String, ServiceError> {
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying completion");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
            r = tokio::time::timeout(policy.timeout, service.complete(request)) => r,
        };

        match outcome {
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(e)) if e.is_transient() => {
                tracing::warn!(attempt, error = %e, "transient completion failure");
                last_err = Some(e);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!(attempt, timeout_s = policy.timeout.as_secs(), "completion timed out");
                last_err = Some(ServiceError::Timeout(policy.timeout));
            }
        }
    }

    Err(last_err.unwrap_or(ServiceError::Timeout(policy.timeout)))
}
