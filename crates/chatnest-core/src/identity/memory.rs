use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::IdentityError;
use crate::util::normalize_email;

use super::{AuthSession, IdentityProvider, IdentityUser, SignUp};

const MIN_PASSWORD_LEN: usize = 6;
const SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
struct Account {
    user: IdentityUser,
    password: String,
}

/// In-memory identity provider (for local dev/testing).
///
/// With `require_confirmation` set, self-service signups stay unconfirmed
/// until [`InMemoryIdentity::confirm_email`] is called, mirroring a hosted
/// project with email verification turned on.
pub struct InMemoryIdentity {
    accounts: DashMap<String, Account>,
    sessions: DashMap<String, String>,
    verification_emails: DashMap<String, u32>,
    require_confirmation: bool,
}

impl InMemoryIdentity {
    pub fn new(require_confirmation: bool) -> Self {
        Self {
            accounts: DashMap::new(),
            sessions: DashMap::new(),
            verification_emails: DashMap::new(),
            require_confirmation,
        }
    }

    /// Mark an account's email as verified, as clicking the emailed link would.
    pub fn confirm_email(&self, email: &str) -> bool {
        match self.accounts.get_mut(&normalize_email(email)) {
            Some(mut account) => {
                account.user.email_confirmed = true;
                true
            }
            None => false,
        }
    }

    /// How many verification emails were sent to `email`.
    pub fn verification_emails_sent(&self, email: &str) -> u32 {
        self.verification_emails
            .get(&normalize_email(email))
            .map(|c| *c)
            .unwrap_or(0)
    }

    fn create_account(
        &self,
        email: &str,
        password: &str,
        name: &str,
        confirmed: bool,
    ) -> Result<IdentityUser, IdentityError> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(IdentityError::WeakPassword(format!(
                "Password should be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let key = normalize_email(email);
        let user = IdentityUser {
            id: Uuid::new_v4(),
            email: key.clone(),
            email_confirmed: confirmed,
            name: Some(name.to_string()),
            created_at: Some(Utc::now()),
        };
        match self.accounts.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(IdentityError::UserAlreadyExists),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Account {
                    user: user.clone(),
                    password: password.to_string(),
                });
                Ok(user)
            }
        }
    }

    fn issue_session(&self, user: IdentityUser) -> AuthSession {
        let token = Uuid::new_v4().simple().to_string();
        self.sessions.insert(token.clone(), user.email.clone());
        AuthSession {
            access_token: token,
            refresh_token: Some(Uuid::new_v4().simple().to_string()),
            expires_in: Some(SESSION_TTL_SECS),
            user,
        }
    }

    fn record_verification_email(&self, email: &str) {
        *self
            .verification_emails
            .entry(normalize_email(email))
            .or_insert(0) += 1;
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentity {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
        _redirect_to: Option<&str>,
    ) -> Result<SignUp, IdentityError> {
        let confirmed = !self.require_confirmation;
        let user = self.create_account(email, password, name, confirmed)?;
        if confirmed {
            let session = self.issue_session(user.clone());
            Ok(SignUp {
                user,
                session: Some(session),
            })
        } else {
            self.record_verification_email(email);
            Ok(SignUp {
                user,
                session: None,
            })
        }
    }

    async fn admin_create_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<IdentityUser, IdentityError> {
        self.create_account(email, password, name, true)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, IdentityError> {
        let account = self
            .accounts
            .get(&normalize_email(email))
            .map(|a| a.value().clone())
            .ok_or(IdentityError::InvalidCredentials)?;
        if account.password != password {
            return Err(IdentityError::InvalidCredentials);
        }
        if !account.user.email_confirmed {
            return Err(IdentityError::EmailNotConfirmed);
        }
        Ok(self.issue_session(account.user))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        self.sessions
            .remove(access_token)
            .map(|_| ())
            .ok_or(IdentityError::InvalidToken)
    }

    async fn get_user(&self, access_token: &str) -> Result<IdentityUser, IdentityError> {
        let email = self
            .sessions
            .get(access_token)
            .map(|e| e.value().clone())
            .ok_or(IdentityError::InvalidToken)?;
        self.accounts
            .get(&email)
            .map(|a| a.user.clone())
            .ok_or(IdentityError::InvalidToken)
    }

    async fn resend_signup(
        &self,
        email: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), IdentityError> {
        let pending = self
            .accounts
            .get(&normalize_email(email))
            .map(|a| !a.user.email_confirmed)
            .unwrap_or(false);
        if pending {
            self.record_verification_email(email);
        }
        Ok(())
    }
}
