pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::CompletionConfig;
use crate::error::ProviderError;
use crate::types::{CompletionResponse, Message};

pub use openai::OpenAiProvider;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<CompletionResponse, ProviderError>;
}

/// Build the completion provider, or `None` when no API key is configured.
pub fn create_provider(
    config: &CompletionConfig,
) -> Result<Option<Arc<dyn LlmProvider>>, ProviderError> {
    if config.api_key.trim().is_empty() {
        info!("No completion API key configured; assistant replies are disabled");
        return Ok(None);
    }
    let provider = OpenAiProvider::new(config.api_key.clone(), config.api_base.clone())
        .with_timeout(config.timeout_secs)?
        .with_max_retries(config.max_retries);
    Ok(Some(Arc::new(provider)))
}
