//! Client for OpenAI-compatible chat completion endpoints.
//!
//! Works against vLLM, TGI, Ollama and hosted aggregators alike. Retries
//! network failures with exponential backoff and honours `Retry-After` on 429.

use crate::models::{EndpointConfig, RequestBody, Result, ServiceError, VerisynthError};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Anything that can turn one request body into completion text.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, body: &RequestBody) -> Result<String>;
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// HTTP client for one completion endpoint.
pub struct LLMClient {
    client: reqwest::Client,
    /// API key (None for local endpoints without auth)
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl LLMClient {
    pub fn new(
        api_key: Option<String>,
        base_url: String,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(VerisynthError::Network)?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            max_retries: max_retries.max(1),
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    /// Client for the configured endpoint.
    pub fn from_config(endpoint: &EndpointConfig, api_key: Option<String>) -> Result<Self> {
        Self::new(
            api_key,
            endpoint.base_url.clone(),
            endpoint.timeout_secs,
            endpoint.max_retries,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(ref api_key) = self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| ServiceError::AuthenticationFailed)?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_secs(2u64.pow(attempt))
    }

    /// Delay for a `Retry-After` value; negative or out-of-range falls back to 1s.
    fn retry_wait(retry_after_secs: f64) -> Duration {
        Duration::try_from_secs_f64(retry_after_secs).unwrap_or(Duration::from_secs(1))
    }

    /// Tokens consumed so far as (prompt, completion).
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    async fn send(&self, body: &RequestBody) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers()?;
        let mut last_error: Option<VerisynthError> = None;

        for attempt in 0..self.max_retries {
            let last_attempt = attempt + 1 == self.max_retries;

            let response = match self
                .client
                .post(&url)
                .headers(headers.clone())
                .json(body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        VerisynthError::Timeout(self.timeout)
                    } else {
                        VerisynthError::Network(e)
                    });
                    if !last_attempt {
                        let backoff = Self::backoff(attempt);
                        debug!(
                            attempt,
                            backoff_secs = backoff.as_secs(),
                            "Retrying after network error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();

            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(1.0);

                last_error = Some(VerisynthError::RateLimited {
                    retry_after_secs: retry_after,
                });
                if !last_attempt {
                    debug!(attempt, retry_after_secs = retry_after, "Rate limited, waiting");
                    tokio::time::sleep(Self::retry_wait(retry_after)).await;
                }
                continue;
            }

            if !response.status().is_success() {
                let error_body = response.text().await.unwrap_or_default();
                let error = match status {
                    401 => ServiceError::AuthenticationFailed,
                    404 => ServiceError::ModelNotFound(body.model.clone()),
                    _ => ServiceError::ApiError {
                        status,
                        message: serde_json::from_str::<ApiErrorResponse>(&error_body)
                            .map(|e| e.error.message)
                            .unwrap_or(error_body),
                    },
                };
                last_error = Some(error.into());

                // Don't retry auth errors or not found
                if status == 401 || status == 404 {
                    break;
                }
                if !last_attempt {
                    tokio::time::sleep(Self::backoff(attempt)).await;
                }
                continue;
            }

            let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
                ServiceError::InvalidResponse(format!("Failed to parse response: {e}"))
            })?;

            if let Some(usage) = &parsed.usage {
                self.total_input_tokens
                    .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
                self.total_output_tokens
                    .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
            }

            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| ServiceError::InvalidResponse("No choices in response".into()).into());
        }

        Err(last_error.unwrap_or_else(|| {
            ServiceError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: "Unknown error".to_string(),
            }
            .into()
        }))
    }
}

#[async_trait]
impl CompletionService for LLMClient {
    async fn complete(&self, body: &RequestBody) -> Result<String> {
        self.send(body).await
    }
}
