use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;

use super::{Chat, ChatMessage, ChatSummary, MessageRole, Profile};

/// Trait for persistence backends holding profiles, chats and messages.
///
/// Implementations do not enforce chat ownership on message operations;
/// callers check it with [`DataStore::find_owned_chat`] first.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Look up a profile by (normalized) email.
    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, StoreError>;

    /// Look up a profile by identity user id.
    async fn find_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError>;

    /// Insert or replace the profile keyed by its id.
    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, StoreError>;

    /// All profiles, oldest first.
    async fn list_profiles(&self) -> Result<Vec<Profile>, StoreError>;

    /// Create a chat owned by `user_id`.
    async fn insert_chat(&self, user_id: Uuid, title: &str) -> Result<Chat, StoreError>;

    /// Chats owned by `user_id`, most recently updated first.
    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, StoreError>;

    /// Fetch a chat only if it exists and is owned by `user_id`.
    async fn find_owned_chat(&self, chat_id: Uuid, user_id: Uuid)
        -> Result<Option<Chat>, StoreError>;

    /// Delete a chat and all of its messages.
    async fn delete_chat(&self, chat_id: Uuid) -> Result<(), StoreError>;

    /// Set the chat's `updatedAt` to now.
    async fn touch_chat(&self, chat_id: Uuid) -> Result<(), StoreError>;

    /// Append a message to a chat.
    async fn insert_message(
        &self,
        chat_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage, StoreError>;

    /// Every message of a chat in creation order.
    async fn list_messages(&self, chat_id: Uuid) -> Result<Vec<ChatMessage>, StoreError>;

    /// Up to `limit` most recent messages of a chat, oldest first.
    async fn recent_messages(
        &self,
        chat_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}
