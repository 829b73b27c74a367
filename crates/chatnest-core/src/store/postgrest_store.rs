use async_trait::async_trait;
use chrono::Utc;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::util::{http, truncate_string};

use super::backend::DataStore;
use super::{sort_messages, Chat, ChatMessage, ChatSummary, MessageRole, Profile};

const PROFILES: &str = "users";
const CHATS: &str = "chats";
const MESSAGES: &str = "messages";

/// Supabase PostgREST-backed data store.
///
/// Talks to `{url}/rest/v1/{table}` with the service key so row-level
/// security does not hide rows; ownership is enforced by the callers.
pub struct PostgrestStore {
    rest_url: String,
    api_key: String,
}

impl PostgrestStore {
    pub fn new(supabase_url: &str, api_key: &str) -> Self {
        Self {
            rest_url: format!("{}/rest/v1", supabase_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> RequestBuilder {
        http::client()
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn get(&self, table: &str) -> RequestBuilder {
        self.request(reqwest::Method::GET, table)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, StoreError> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(StoreError::Api {
            status: status.as_u16(),
            message: error_message(&text),
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Vec<T>, StoreError> {
        let response = self.send(req).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| StoreError::Parse(e.to_string()))
    }

    /// Insert (or upsert) a single row and return its stored representation.
    async fn insert_one<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        what: &str,
    ) -> Result<T, StoreError> {
        self.fetch::<T>(req)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Parse(format!("no {what} row returned")))
    }
}

/// Pull the human-readable message out of a PostgREST error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| truncate_string(body, 500, "..."))
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl DataStore for PostgrestStore {
    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, StoreError> {
        let email = crate::util::normalize_email(email);
        let req = self
            .get(PROFILES)
            .query(&[("select", "*".to_string()), ("email", eq(&email)), ("limit", "1".to_string())]);
        Ok(self.fetch::<Profile>(req).await?.into_iter().next())
    }

    async fn find_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        let req = self
            .get(PROFILES)
            .query(&[("select", "*".to_string()), ("id", eq(id)), ("limit", "1".to_string())]);
        Ok(self.fetch::<Profile>(req).await?.into_iter().next())
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, StoreError> {
        let mut row = profile.clone();
        row.email = crate::util::normalize_email(&row.email);
        debug!("Upserting profile {}", row.id);
        let req = self
            .request(reqwest::Method::POST, PROFILES)
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row);
        self.insert_one(req, "profile").await
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        let req = self
            .get(PROFILES)
            .query(&[("select", "*"), ("order", "createdAt.asc")]);
        self.fetch(req).await
    }

    async fn insert_chat(&self, user_id: Uuid, title: &str) -> Result<Chat, StoreError> {
        let now = Utc::now();
        let body = json!({
            "id": Uuid::new_v4(),
            "title": title,
            "userId": user_id,
            "createdAt": now,
            "updatedAt": now,
        });
        let req = self
            .request(reqwest::Method::POST, CHATS)
            .header("Prefer", "return=representation")
            .json(&body);
        self.insert_one(req, "chat").await
    }

    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, StoreError> {
        let req = self.get(CHATS).query(&[
            ("select", "id,title,createdAt,updatedAt".to_string()),
            ("userId", eq(user_id)),
            ("order", "updatedAt.desc".to_string()),
        ]);
        self.fetch(req).await
    }

    async fn find_owned_chat(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Chat>, StoreError> {
        let req = self.get(CHATS).query(&[
            ("select", "*".to_string()),
            ("id", eq(chat_id)),
            ("userId", eq(user_id)),
            ("limit", "1".to_string()),
        ]);
        Ok(self.fetch::<Chat>(req).await?.into_iter().next())
    }

    async fn delete_chat(&self, chat_id: Uuid) -> Result<(), StoreError> {
        let req = self
            .request(reqwest::Method::DELETE, MESSAGES)
            .query(&[("chatId", eq(chat_id))]);
        self.send(req).await?;

        let req = self
            .request(reqwest::Method::DELETE, CHATS)
            .query(&[("id", eq(chat_id))]);
        self.send(req).await?;
        Ok(())
    }

    async fn touch_chat(&self, chat_id: Uuid) -> Result<(), StoreError> {
        let req = self
            .request(reqwest::Method::PATCH, CHATS)
            .query(&[("id", eq(chat_id))])
            .json(&json!({ "updatedAt": Utc::now() }));
        self.send(req).await?;
        Ok(())
    }

    async fn insert_message(
        &self,
        chat_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let body = json!({
            "id": Uuid::new_v4(),
            "chatId": chat_id,
            "role": role,
            "content": content,
            "createdAt": Utc::now(),
        });
        let req = self
            .request(reqwest::Method::POST, MESSAGES)
            .header("Prefer", "return=representation")
            .json(&body);
        self.insert_one(req, "message").await
    }

    async fn list_messages(&self, chat_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        let req = self.get(MESSAGES).query(&[
            ("select", "*".to_string()),
            ("chatId", eq(chat_id)),
            ("order", "createdAt.asc".to_string()),
        ]);
        let mut messages: Vec<ChatMessage> = self.fetch(req).await?;
        sort_messages(&mut messages);
        Ok(messages)
    }

    async fn recent_messages(
        &self,
        chat_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let req = self.get(MESSAGES).query(&[
            ("select", "*".to_string()),
            ("chatId", eq(chat_id)),
            ("order", "createdAt.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let mut messages: Vec<ChatMessage> = self.fetch(req).await?;
        messages.reverse();
        sort_messages(&mut messages);
        Ok(messages)
    }
}
