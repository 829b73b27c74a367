use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::types::{CompletionResponse, FinishReason, Message, TokenUsage};
use crate::util::{http, truncate_string};

use super::LlmProvider;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// OpenAI chat-completions provider. Also works with any OpenAI-compatible
/// endpoint via `api_base`.
pub struct OpenAiProvider {
    api_key: String,
    api_base: String,
    client: Client,
    timeout_secs: u64,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenAiProvider {
    pub fn new(api_key: String, api_base: Option<String>) -> Self {
        let base = api_base
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self {
            api_key,
            api_base: base.trim_end_matches('/').to_string(),
            client: http::client().clone(),
            timeout_secs: 30,
            max_retries: 0,
            retry_delay: RETRY_BASE_DELAY,
        }
    }

    /// Use a dedicated client whose request timeout is `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Result<Self, ProviderError> {
        self.client = http::client_with_timeout(Duration::from_secs(secs))?;
        self.timeout_secs = secs;
        Ok(self)
    }

    /// Retry 429s, 5xx responses and transport failures up to `n` extra times.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    async fn send_once(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = api_error_message(&text);
            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited(message));
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout_secs)
        } else if e.is_decode() {
            ProviderError::Parse(e.to_string())
        } else {
            ProviderError::Http(e)
        }
    }
}

/// Whether a failed attempt is worth repeating.
fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimited(_) | ProviderError::Timeout(_) | ProviderError::Http(_) => true,
        ProviderError::Api { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Pull `error.message` out of an OpenAI error body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| truncate_string(body, 500, "..."))
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<CompletionResponse, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        debug!("OpenAI request to {} with model {}", url, model);

        let mut attempt = 0u32;
        loop {
            match self.send_once(&url, &body).await {
                Ok(data) => return parse_openai_response(&data),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    let delay = self.retry_delay * 2u32.pow(attempt);
                    warn!(
                        "Completion attempt {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parse an OpenAI-format response into our CompletionResponse.
pub fn parse_openai_response(data: &serde_json::Value) -> Result<CompletionResponse, ProviderError> {
    let choice = data
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| ProviderError::Parse("No message in choice".to_string()))?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let finish_reason = match choice.get("finish_reason").and_then(|v| v.as_str()) {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    };

    let usage = match data.get("usage") {
        Some(u) => {
            let count = |key: &str| u.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            TokenUsage {
                prompt_tokens: count("prompt_tokens"),
                completion_tokens: count("completion_tokens"),
                total_tokens: count("total_tokens"),
            }
        }
        None => TokenUsage::default(),
    };

    Ok(CompletionResponse {
        content,
        finish_reason,
        usage,
    })
}
