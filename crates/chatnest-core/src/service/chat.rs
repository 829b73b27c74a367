use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::store::{Chat, ChatMessage, ChatSummary, ChatWithMessages, DataStore, MessageRole};

use super::{CompletionOrchestrator, CurrentUser};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_MESSAGE_CHARS: usize = 8000;

/// A stored user message and the assistant's answer, if one was produced.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub message: ChatMessage,
    pub reply: Option<ChatMessage>,
}

/// Ownership-checked access to a user's chats and messages.
pub struct ChatService {
    store: Arc<dyn DataStore>,
    completion: CompletionOrchestrator,
}

impl ChatService {
    pub fn new(store: Arc<dyn DataStore>, completion: CompletionOrchestrator) -> Self {
        Self { store, completion }
    }

    pub async fn create_chat(&self, user: &CurrentUser, title: &str) -> Result<Chat> {
        let title = bounded_text(title, "Title", MAX_TITLE_CHARS)?;
        let chat = self.store.insert_chat(user.id, title).await?;
        info!("User {} created chat {}", user.id, chat.id);
        Ok(chat)
    }

    pub async fn list_chats(&self, user: &CurrentUser) -> Result<Vec<ChatSummary>> {
        Ok(self.store.list_chats(user.id).await?)
    }

    /// The chat with its messages in creation order.
    pub async fn get_chat(&self, user: &CurrentUser, chat_id: Uuid) -> Result<ChatWithMessages> {
        let chat = self.owned_chat(user, chat_id).await?;
        let messages = self.store.list_messages(chat.id).await?;
        Ok(ChatWithMessages { chat, messages })
    }

    pub async fn get_messages(&self, user: &CurrentUser, chat_id: Uuid) -> Result<Vec<ChatMessage>> {
        let chat = self.owned_chat(user, chat_id).await?;
        Ok(self.store.list_messages(chat.id).await?)
    }

    /// Store a user message and bump the chat's `updatedAt`. Once the message
    /// is stored a failed bump is only logged.
    pub async fn send_message(
        &self,
        user: &CurrentUser,
        chat_id: Uuid,
        text: &str,
    ) -> Result<ChatMessage> {
        let content = bounded_text(text, "Message", MAX_MESSAGE_CHARS)?;
        let chat = self.owned_chat(user, chat_id).await?;
        let message = self
            .store
            .insert_message(chat.id, MessageRole::User, content)
            .await?;
        if let Err(e) = self.store.touch_chat(chat.id).await {
            warn!("Updating timestamp of chat {} failed: {}", chat.id, e);
        }
        Ok(message)
    }

    /// Send a message, then ask for the assistant reply. A failed completion
    /// leaves the user message in place and yields no reply.
    pub async fn exchange(&self, user: &CurrentUser, chat_id: Uuid, text: &str) -> Result<Exchange> {
        let message = self.send_message(user, chat_id, text).await?;
        let reply = match self.completion.reply(chat_id).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Completion for chat {} failed: {}", chat_id, e);
                None
            }
        };
        Ok(Exchange { message, reply })
    }

    pub async fn delete_chat(&self, user: &CurrentUser, chat_id: Uuid) -> Result<()> {
        let chat = self.owned_chat(user, chat_id).await?;
        self.store.delete_chat(chat.id).await?;
        info!("User {} deleted chat {}", user.id, chat.id);
        Ok(())
    }

    async fn owned_chat(&self, user: &CurrentUser, chat_id: Uuid) -> Result<Chat> {
        self.store
            .find_owned_chat(chat_id, user.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Chat not found".to_string()))
    }
}

/// Trim `raw` and check it is non-empty and at most `max` characters.
fn bounded_text<'a>(raw: &'a str, field: &str, max: usize) -> Result<&'a str> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ServiceError::Validation(format!("{field} is required")));
    }
    if text.chars().count() > max {
        return Err(ServiceError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(text)
}
