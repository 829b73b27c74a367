pub mod gotrue;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentityError;

pub use gotrue::GoTrueClient;
pub use memory::InMemoryIdentity;

/// An account as seen by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityUser {
    pub id: Uuid,
    pub email: String,
    pub email_confirmed: bool,
    /// Display name stored in the account metadata at signup.
    pub name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A signed-in session issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub user: IdentityUser,
}

/// Result of a self-service signup. `session` is only present when the
/// provider confirms accounts without email verification.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub user: IdentityUser,
    pub session: Option<AuthSession>,
}

/// Trait for identity backends (hosted GoTrue, or in-memory for dev/tests).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register an account that must verify its email; the verification link
    /// lands on `redirect_to`.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
        redirect_to: Option<&str>,
    ) -> Result<SignUp, IdentityError>;

    /// Create an already-confirmed account through the admin API.
    async fn admin_create_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<IdentityUser, IdentityError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, IdentityError>;

    /// Invalidate the session behind `access_token`.
    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError>;

    /// Resolve an access token to its account.
    async fn get_user(&self, access_token: &str) -> Result<IdentityUser, IdentityError>;

    /// Send the signup verification email again.
    async fn resend_signup(&self, email: &str, redirect_to: Option<&str>)
        -> Result<(), IdentityError>;
}
