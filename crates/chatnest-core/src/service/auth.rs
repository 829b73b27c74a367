use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{IdentityError, Result, ServiceError};
use crate::identity::{AuthSession, IdentityProvider, IdentityUser};
use crate::store::{DataStore, Profile};
use crate::util::{email_local_part, is_valid_email, normalize_email};

use super::CurrentUser;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Body returned by login and signup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub user: Profile,
    /// Access token; absent when the account still has to verify its email.
    pub token: Option<String>,
}

/// Login, signup, signout and email verification on top of an identity
/// provider plus the profile table.
pub struct AuthService {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn DataStore>,
    auto_confirm: bool,
    verification_redirect: Option<String>,
}

impl AuthService {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DataStore>,
        auto_confirm: bool,
        verification_redirect: Option<String>,
    ) -> Self {
        Self {
            identity,
            store,
            auto_confirm,
            verification_redirect,
        }
    }

    /// Sign in with email and password.
    ///
    /// Unknown emails are rejected before the identity provider is contacted.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResult> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ServiceError::Validation(
                "Email and password are required".to_string(),
            ));
        }
        let email = normalize_email(email);

        let existing = self
            .store
            .find_profile_by_email(&email)
            .await?
            .ok_or(ServiceError::NotRegistered)?;

        let session = self
            .identity
            .sign_in_with_password(&email, password)
            .await
            .map_err(map_sign_in_error)?;

        let profile = self.refresh_profile(existing, &session).await;
        info!("User {} logged in", profile.id);

        Ok(AuthResult {
            user: profile,
            token: Some(session.access_token),
        })
    }

    /// Bring the profile row in line with the signed-in account. Failures are
    /// logged; the login itself still succeeds.
    async fn refresh_profile(&self, existing: Profile, session: &AuthSession) -> Profile {
        let account = &session.user;
        let (base, stored) = if existing.id == account.id {
            (existing, true)
        } else {
            match self.store.find_profile(account.id).await {
                Ok(Some(p)) => (p, true),
                Ok(None) => (profile_from_account(account, Some(&existing.name)), false),
                Err(e) => {
                    warn!("Profile lookup for {} failed: {}", account.id, e);
                    return profile_from_account(account, Some(&existing.name));
                }
            }
        };

        let desired = Profile {
            email_verified: account.email_confirmed,
            ..base.clone()
        };
        if stored && desired == base {
            return desired;
        }
        match self.store.upsert_profile(&desired).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Profile refresh for {} failed: {}", account.id, e);
                desired
            }
        }
    }

    /// Register a new account and its profile. Returns a token only when the
    /// account could be signed in straight away.
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<AuthResult> {
        let name = name.trim();
        if name.is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(ServiceError::Validation(
                "Name, email, and password are required".to_string(),
            ));
        }
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(ServiceError::Validation("Invalid email address".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if self.store.find_profile_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict("Email already registered".to_string()));
        }

        let (account, token) = if self.auto_confirm {
            let account = self
                .identity
                .admin_create_user(&email, password, name)
                .await
                .map_err(map_sign_up_error)?;
            let token = match self.identity.sign_in_with_password(&email, password).await {
                Ok(session) => Some(session.access_token),
                Err(e) => {
                    warn!("Automatic sign-in after signup failed for {}: {}", account.id, e);
                    None
                }
            };
            (account, token)
        } else {
            let signup = self
                .identity
                .sign_up(&email, password, name, self.verification_redirect.as_deref())
                .await
                .map_err(map_sign_up_error)?;
            (signup.user, signup.session.map(|s| s.access_token))
        };

        let profile = Profile {
            id: account.id,
            name: name.to_string(),
            email: email.clone(),
            email_verified: account.email_confirmed,
            created_at: account.created_at.unwrap_or_else(Utc::now),
        };
        let profile = self.store.upsert_profile(&profile).await?;
        info!("Registered user {} (verified: {})", profile.id, profile.email_verified);

        Ok(AuthResult {
            user: profile,
            token,
        })
    }

    /// Invalidate the session behind `token`. A session that already expired
    /// counts as signed out.
    pub async fn signout(&self, token: Option<&str>) -> Result<()> {
        let token = bearer(token).ok_or(ServiceError::Unauthenticated)?;
        match self.identity.sign_out(token).await {
            Ok(()) => Ok(()),
            Err(IdentityError::InvalidToken) => {
                warn!("Sign-out with an expired or unknown session");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send the verification email again, to `email` or else to the account
    /// behind `token`. Returns the address it was sent to.
    pub async fn resend_verification(
        &self,
        email: Option<&str>,
        token: Option<&str>,
    ) -> Result<String> {
        let email = match email.map(str::trim).filter(|e| !e.is_empty()) {
            Some(e) => normalize_email(e),
            None => match bearer(token) {
                Some(t) => self.authenticate(Some(t)).await?.email,
                None => {
                    return Err(ServiceError::Validation(
                        "No email provided and not authenticated".to_string(),
                    ))
                }
            },
        };
        if !is_valid_email(&email) {
            return Err(ServiceError::Validation("Invalid email address".to_string()));
        }

        self.identity
            .resend_signup(&email, self.verification_redirect.as_deref())
            .await?;
        info!("Resent verification email to {}", email);
        Ok(email)
    }

    /// Resolve a bearer token to the calling user.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<CurrentUser> {
        let token = bearer(token).ok_or(ServiceError::Unauthenticated)?;
        let account = self.identity.get_user(token).await.map_err(|e| match e {
            IdentityError::InvalidToken => ServiceError::Unauthenticated,
            other => ServiceError::Identity(other),
        })?;
        Ok(CurrentUser {
            id: account.id,
            email: account.email,
        })
    }
}

fn bearer(token: Option<&str>) -> Option<&str> {
    token.map(str::trim).filter(|t| !t.is_empty())
}

fn profile_from_account(account: &IdentityUser, fallback_name: Option<&str>) -> Profile {
    let name = account
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| fallback_name.map(|n| n.to_string()))
        .unwrap_or_else(|| email_local_part(&account.email).to_string());
    Profile {
        id: account.id,
        name,
        email: normalize_email(&account.email),
        email_verified: account.email_confirmed,
        created_at: account.created_at.unwrap_or_else(Utc::now),
    }
}

fn map_sign_in_error(e: IdentityError) -> ServiceError {
    match e {
        IdentityError::InvalidCredentials => ServiceError::InvalidCredentials,
        IdentityError::EmailNotConfirmed => ServiceError::EmailNotVerified,
        other => ServiceError::Identity(other),
    }
}

fn map_sign_up_error(e: IdentityError) -> ServiceError {
    match e {
        IdentityError::UserAlreadyExists => {
            ServiceError::Conflict("Email already registered".to_string())
        }
        IdentityError::WeakPassword(msg) => ServiceError::Validation(msg),
        other => ServiceError::Identity(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryIdentity;
    use crate::store::MemoryStore;

    fn service(auto_confirm: bool) -> (AuthService, Arc<InMemoryIdentity>, Arc<MemoryStore>) {
        let identity = Arc::new(InMemoryIdentity::new(true));
        let store = Arc::new(MemoryStore::new());
        let svc = AuthService::new(
            identity.clone(),
            store.clone(),
            auto_confirm,
            Some("http://localhost:3000/verify-email".to_string()),
        );
        (svc, identity, store)
    }

    #[tokio::test]
    async fn test_signup_requires_verification() {
        let (svc, identity, store) = service(false);
        let result = svc.signup("Bob", "Bob@X.com", "secret1").await.unwrap();
        assert!(result.token.is_none());
        assert_eq!(result.user.email, "bob@x.com");
        assert_eq!(result.user.name, "Bob");
        assert!(!result.user.email_verified);
        assert_eq!(identity.verification_emails_sent("bob@x.com"), 1);

        let stored = store.find_profile(result.user.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Bob");

        let err = svc.login("bob@x.com", "secret1").await.unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_signup_auto_confirm_returns_token() {
        let (svc, _, _) = service(true);
        let result = svc.signup("Alice", "alice@x.com", "secret1").await.unwrap();
        assert!(result.user.email_verified);
        let token = result.token.unwrap();
        let me = svc.authenticate(Some(&token)).await.unwrap();
        assert_eq!(me.id, result.user.id);
    }

    #[tokio::test]
    async fn test_signup_validation_and_conflict() {
        let (svc, _, _) = service(true);
        for (name, email, pw) in [
            ("", "a@x.com", "secret1"),
            ("A", "not-an-email", "secret1"),
            ("A", "a@x.com", "12345"),
        ] {
            let err = svc.signup(name, email, pw).await.unwrap_err();
            assert_eq!(err.status_code(), 400, "{name} {email} {pw}");
        }

        svc.signup("A", "a@x.com", "secret1").await.unwrap();
        let err = svc.signup("A2", "A@x.com", "secret2").await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_login_flow() {
        let (svc, identity, _) = service(false);
        svc.signup("Bob", "bob@x.com", "secret1").await.unwrap();

        let err = svc.login("nobody@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotRegistered));
        assert_eq!(err.status_code(), 404);

        identity.confirm_email("bob@x.com");
        let err = svc.login("bob@x.com", "wrong-pw").await.unwrap_err();
        assert_eq!(err.status_code(), 401);

        let result = svc.login("BOB@x.com", "secret1").await.unwrap();
        assert!(result.token.is_some());
        assert!(result.user.email_verified);
        assert_eq!(result.user.name, "Bob");
    }

    #[tokio::test]
    async fn test_login_repairs_missing_verification_flag() {
        let (svc, identity, store) = service(false);
        let created = svc.signup("Bob", "bob@x.com", "secret1").await.unwrap();
        identity.confirm_email("bob@x.com");

        svc.login("bob@x.com", "secret1").await.unwrap();
        let stored = store.find_profile(created.user.id).await.unwrap().unwrap();
        assert!(stored.email_verified);
    }

    #[tokio::test]
    async fn test_signout_and_authenticate() {
        let (svc, _, _) = service(true);
        let token = svc
            .signup("A", "a@x.com", "secret1")
            .await
            .unwrap()
            .token
            .unwrap();

        assert!(matches!(
            svc.authenticate(None).await,
            Err(ServiceError::Unauthenticated)
        ));
        svc.signout(Some(&token)).await.unwrap();
        assert!(matches!(
            svc.authenticate(Some(&token)).await,
            Err(ServiceError::Unauthenticated)
        ));
        svc.signout(Some(&token)).await.unwrap();
        assert_eq!(svc.signout(None).await.unwrap_err().status_code(), 401);
    }

    #[tokio::test]
    async fn test_resend_verification() {
        let (svc, identity, _) = service(false);
        svc.signup("Bob", "bob@x.com", "secret1").await.unwrap();

        let sent_to = svc.resend_verification(Some("bob@x.com"), None).await.unwrap();
        assert_eq!(sent_to, "bob@x.com");
        assert_eq!(identity.verification_emails_sent("bob@x.com"), 2);

        let err = svc.resend_verification(None, None).await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = svc.resend_verification(None, Some("bogus")).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
}
