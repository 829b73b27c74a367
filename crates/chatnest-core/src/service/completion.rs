use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CompletionConfig;
use crate::error::{ProviderError, Result};
use crate::provider::LlmProvider;
use crate::store::{ChatMessage, DataStore, MessageRole};
use crate::types::Message;

/// Produces the assistant reply for a chat from its recent history.
///
/// Never retries on its own; the provider client handles transport retries.
pub struct CompletionOrchestrator {
    store: Arc<dyn DataStore>,
    provider: Option<Arc<dyn LlmProvider>>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    system_prompt: String,
    history_limit: usize,
}

impl CompletionOrchestrator {
    pub fn new(
        store: Arc<dyn DataStore>,
        provider: Option<Arc<dyn LlmProvider>>,
        config: &CompletionConfig,
    ) -> Self {
        Self {
            store,
            provider,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
            history_limit: config.history_limit.max(1),
        }
    }

    /// System prompt followed by the chat history in order.
    pub fn build_prompt(&self, history: &[ChatMessage]) -> Vec<Message> {
        let mut prompt = Vec::with_capacity(history.len() + 1);
        if !self.system_prompt.trim().is_empty() {
            prompt.push(Message::system(self.system_prompt.clone()));
        }
        prompt.extend(history.iter().map(|m| Message {
            role: m.role.into(),
            content: m.content.clone(),
        }));
        prompt
    }

    /// Generate and store the assistant reply for `chat_id`.
    ///
    /// Returns `Ok(None)` when no provider is configured.
    pub async fn reply(&self, chat_id: Uuid) -> Result<Option<ChatMessage>> {
        let Some(provider) = self.provider.as_ref() else {
            debug!("Completion disabled; no reply for chat {}", chat_id);
            return Ok(None);
        };

        let history = self.store.recent_messages(chat_id, self.history_limit).await?;
        let prompt = self.build_prompt(&history);
        debug!(
            "Requesting completion for chat {} with {} history messages",
            chat_id,
            history.len()
        );

        let response = provider
            .chat(&prompt, &self.model, self.max_tokens, self.temperature)
            .await?;
        let text = response
            .text()
            .ok_or_else(|| ProviderError::Other("Empty completion".to_string()))?
            .to_string();

        let reply = self
            .store
            .insert_message(chat_id, MessageRole::Assistant, &text)
            .await?;
        if let Err(e) = self.store.touch_chat(chat_id).await {
            warn!("Updating timestamp of chat {} failed: {}", chat_id, e);
        }
        info!(
            "Stored assistant reply for chat {} ({} tokens)",
            chat_id, response.usage.total_tokens
        );
        Ok(Some(reply))
    }
}
