use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::error::IdentityError;
use crate::util::http;

use super::{AuthSession, IdentityProvider, IdentityUser, SignUp};

/// Supabase Auth (GoTrue) client.
pub struct GoTrueClient {
    auth_url: String,
    anon_key: String,
    service_key: Option<String>,
}

impl GoTrueClient {
    pub fn new(supabase_url: &str, anon_key: &str, service_key: Option<&str>) -> Self {
        Self {
            auth_url: format!("{}/auth/v1", supabase_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
            service_key: service_key.map(|s| s.to_string()),
        }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        http::client()
            .post(format!("{}{}", self.auth_url, path))
            .header("apikey", &self.anon_key)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, IdentityError> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), &text))
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, IdentityError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| IdentityError::Parse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user_metadata: Option<serde_json::Value>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<RawUser> for IdentityUser {
    fn from(raw: RawUser) -> Self {
        let name = raw
            .user_metadata
            .as_ref()
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .map(|s| s.to_string());
        Self {
            id: raw.id,
            email: raw.email.unwrap_or_default(),
            email_confirmed: raw.email_confirmed_at.is_some(),
            name,
            created_at: raw.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    user: RawUser,
}

impl From<RawSession> for AuthSession {
    fn from(raw: RawSession) -> Self {
        Self {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token,
            expires_in: raw.expires_in,
            user: raw.user.into(),
        }
    }
}

/// Signup answers with a session when the project auto-confirms, otherwise
/// with the bare user.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSignUp {
    Session(RawSession),
    User(RawUser),
}

/// Map a GoTrue error body onto [`IdentityError`].
///
/// Newer servers send `{"code", "error_code", "msg"}`; older ones send
/// `{"error", "error_description"}`. Classification only looks at the codes
/// and the HTTP status.
pub fn classify_error(status: u16, body: &str) -> IdentityError {
    let value: serde_json::Value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    let field = |key: &str| value.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());

    let error_code = field("error_code");
    let legacy_error = field("error");
    let message = field("msg")
        .or_else(|| field("message"))
        .or_else(|| field("error_description"))
        .or_else(|| legacy_error.clone())
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body.to_string()
            }
        });

    if let Some(code) = error_code.as_deref() {
        match code {
            "invalid_credentials" => return IdentityError::InvalidCredentials,
            "email_not_confirmed" => return IdentityError::EmailNotConfirmed,
            "user_already_exists" | "email_exists" => return IdentityError::UserAlreadyExists,
            "weak_password" => return IdentityError::WeakPassword(message),
            "bad_jwt" | "no_authorization" | "session_not_found" | "session_expired" => {
                return IdentityError::InvalidToken
            }
            c if c.starts_with("over_") && c.ends_with("rate_limit") => {
                return IdentityError::RateLimited(message)
            }
            _ => {}
        }
    }

    match (status, legacy_error.as_deref()) {
        (429, _) => IdentityError::RateLimited(message),
        (_, Some("invalid_grant")) => IdentityError::InvalidCredentials,
        (401, _) => IdentityError::InvalidToken,
        _ => IdentityError::Rejected {
            status,
            code: error_code.or(legacy_error),
            message,
        },
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
        redirect_to: Option<&str>,
    ) -> Result<SignUp, IdentityError> {
        let mut req = self.post("/signup").json(&json!({
            "email": email,
            "password": password,
            "data": { "name": name },
        }));
        if let Some(redirect) = redirect_to {
            req = req.query(&[("redirect_to", redirect)]);
        }
        debug!("GoTrue signup for {}", email);

        let raw: RawSignUp = Self::parse(self.send(req).await?).await?;
        Ok(match raw {
            RawSignUp::Session(session) => {
                let session = AuthSession::from(session);
                SignUp {
                    user: session.user.clone(),
                    session: Some(session),
                }
            }
            RawSignUp::User(user) => SignUp {
                user: user.into(),
                session: None,
            },
        })
    }

    async fn admin_create_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<IdentityUser, IdentityError> {
        let service_key = self.service_key.as_deref().ok_or_else(|| {
            IdentityError::Other("Service role key required for admin user creation".to_string())
        })?;
        let req = http::client()
            .post(format!("{}/admin/users", self.auth_url))
            .header("apikey", service_key)
            .header("Authorization", format!("Bearer {service_key}"))
            .json(&json!({
                "email": email,
                "password": password,
                "email_confirm": true,
                "user_metadata": { "name": name },
            }));
        let raw: RawUser = Self::parse(self.send(req).await?).await?;
        Ok(raw.into())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, IdentityError> {
        let req = self
            .post("/token")
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        let raw: RawSession = Self::parse(self.send(req).await?).await?;
        Ok(raw.into())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        let req = self
            .post("/logout")
            .header("Authorization", format!("Bearer {access_token}"));
        self.send(req).await?;
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<IdentityUser, IdentityError> {
        let req = http::client()
            .get(format!("{}/user", self.auth_url))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {access_token}"));
        let raw: RawUser = Self::parse(self.send(req).await?).await?;
        Ok(raw.into())
    }

    async fn resend_signup(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), IdentityError> {
        let mut req = self
            .post("/resend")
            .json(&json!({ "type": "signup", "email": email }));
        if let Some(redirect) = redirect_to {
            req = req.query(&[("redirect_to", redirect)]);
        }
        self.send(req).await?;
        Ok(())
    }
}
