use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::StoreError;

use super::backend::DataStore;
use super::{sort_messages, Chat, ChatMessage, ChatSummary, MessageRole, Profile};

/// In-memory data store (for local dev/testing).
///
/// Timestamps come from a store-wide clock that never repeats, so messages
/// within a chat are strictly ordered even when written in the same instant.
pub struct MemoryStore {
    profiles: DashMap<Uuid, Profile>,
    chats: DashMap<Uuid, Chat>,
    messages: DashMap<Uuid, Vec<ChatMessage>>,
    clock: Mutex<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            profiles: DashMap::new(),
            chats: DashMap::new(),
            messages: DashMap::new(),
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    fn tick(&self) -> DateTime<Utc> {
        let mut last = self.clock.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let next = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        next
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, StoreError> {
        let email = crate::util::normalize_email(email);
        Ok(self
            .profiles
            .iter()
            .find(|p| p.email == email)
            .map(|p| p.value().clone()))
    }

    async fn find_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.get(&id).map(|p| p.value().clone()))
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, StoreError> {
        let mut stored = profile.clone();
        stored.email = crate::util::normalize_email(&stored.email);
        self.profiles.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        let mut profiles: Vec<Profile> = self.profiles.iter().map(|p| p.value().clone()).collect();
        profiles.sort_by_key(|p| p.created_at);
        Ok(profiles)
    }

    async fn insert_chat(&self, user_id: Uuid, title: &str) -> Result<Chat, StoreError> {
        let now = self.tick();
        let chat = Chat {
            id: Uuid::new_v4(),
            title: title.to_string(),
            user_id,
            created_at: now,
            updated_at: now,
        };
        self.chats.insert(chat.id, chat.clone());
        self.messages.insert(chat.id, Vec::new());
        Ok(chat)
    }

    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, StoreError> {
        let mut chats: Vec<ChatSummary> = self
            .chats
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| ChatSummary::from(c.value()))
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    async fn find_owned_chat(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Chat>, StoreError> {
        Ok(self
            .chats
            .get(&chat_id)
            .filter(|c| c.user_id == user_id)
            .map(|c| c.value().clone()))
    }

    async fn delete_chat(&self, chat_id: Uuid) -> Result<(), StoreError> {
        self.messages.remove(&chat_id);
        self.chats.remove(&chat_id);
        Ok(())
    }

    async fn touch_chat(&self, chat_id: Uuid) -> Result<(), StoreError> {
        let now = self.tick();
        match self.chats.get_mut(&chat_id) {
            Some(mut chat) => {
                chat.updated_at = now;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("chat {chat_id}"))),
        }
    }

    async fn insert_message(
        &self,
        chat_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        // The vector only exists while the chat does; never recreate it.
        let mut messages = self
            .messages
            .get_mut(&chat_id)
            .ok_or_else(|| StoreError::NotFound(format!("chat {chat_id}")))?;
        let message = ChatMessage {
            id: Uuid::new_v4(),
            chat_id,
            role,
            content: content.to_string(),
            created_at: self.tick(),
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, chat_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        let mut messages = self
            .messages
            .get(&chat_id)
            .map(|m| m.value().clone())
            .unwrap_or_default();
        sort_messages(&mut messages);
        Ok(messages)
    }

    async fn recent_messages(
        &self,
        chat_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.list_messages(chat_id).await?;
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}
