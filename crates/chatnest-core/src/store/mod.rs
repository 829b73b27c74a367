pub mod backend;
pub mod memory_store;
pub mod postgrest_store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Role;

pub use backend::DataStore;
pub use memory_store::MemoryStore;
pub use postgrest_store::PostgrestStore;

/// Application-level user record (`users` table), distinct from the identity account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Author of a stored chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl From<MessageRole> for Role {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::User => Role::User,
            MessageRole::Assistant => Role::Assistant,
        }
    }
}

/// A conversation owned by exactly one user (`chats` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub title: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Chat list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Chat> for ChatSummary {
    fn from(chat: &Chat) -> Self {
        Self {
            id: chat.id,
            title: chat.title.clone(),
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}

/// A single append-only message (`messages` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A chat together with its messages in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatWithMessages {
    #[serde(flatten)]
    pub chat: Chat,
    pub messages: Vec<ChatMessage>,
}

/// Stable sort by creation time; equal timestamps keep their stored order.
pub fn sort_messages(messages: &mut [ChatMessage]) {
    messages.sort_by_key(|m| m.created_at);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            chat_id: Uuid::nil(),
            role: MessageRole::User,
            content: content.to_string(),
            created_at: DateTime::from_timestamp(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_message_role_serde() {
        assert_eq!(serde_json::to_string(&MessageRole::Assistant).unwrap(), "\"assistant\"");
        let role: MessageRole = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, MessageRole::User);
        assert!(serde_json::from_str::<MessageRole>("\"system\"").is_err());
        assert_eq!(Role::from(MessageRole::Assistant), Role::Assistant);
    }

    #[test]
    fn test_profile_wire_format() {
        let json = r#"{
            "id": "6f1c7a8e-2f0b-4c61-9a0e-3d1f2b9c4e5a",
            "name": "Alice",
            "email": "alice@x.com",
            "createdAt": "2024-05-01T10:00:00.123456+00:00"
        }"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.name, "Alice");
        assert!(!profile.email_verified);

        let out = serde_json::to_value(&profile).unwrap();
        assert!(out.get("createdAt").unwrap().is_string());
        assert_eq!(out["emailVerified"], false);
    }

    #[test]
    fn test_chat_with_messages_flattens_chat() {
        let chat = Chat {
            id: Uuid::new_v4(),
            title: "Trip".to_string(),
            user_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(ChatWithMessages {
            chat,
            messages: vec![message("hi", 1)],
        })
        .unwrap();
        assert_eq!(value["title"], "Trip");
        assert!(value.get("userId").is_some());
        assert_eq!(value["messages"][0]["content"], "hi");
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn test_sort_messages_is_stable() {
        let mut msgs = vec![message("c", 3), message("a", 1), message("b1", 2), message("b2", 2)];
        sort_messages(&mut msgs);
        let order: Vec<&str> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(order, vec!["a", "b1", "b2", "c"]);
    }
}
