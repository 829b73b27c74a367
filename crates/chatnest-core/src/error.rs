/// Errors surfaced by the service layer. Every variant maps onto exactly one
/// HTTP status via [`ServiceError::status_code`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Please verify your email before logging in")]
    EmailNotVerified,

    #[error("Email not registered")]
    NotRegistered,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Identity provider error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::Unauthenticated | ServiceError::InvalidCredentials => 401,
            ServiceError::EmailNotVerified => 403,
            ServiceError::NotRegistered | ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Identity(e) => match e {
                IdentityError::InvalidToken => 401,
                IdentityError::RateLimited(_) => 429,
                _ => 500,
            },
            ServiceError::Provider(ProviderError::RateLimited(_)) => 429,
            ServiceError::Config(_) | ServiceError::Store(_) | ServiceError::Provider(_) => 500,
        }
    }

    /// Message returned to API clients. Storage and configuration details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ServiceError::Store(_) => "Database request failed".to_string(),
            ServiceError::Config(_) => "Server misconfigured".to_string(),
            ServiceError::Identity(IdentityError::Rejected { message, .. }) => message.clone(),
            ServiceError::Identity(IdentityError::Http(_)) => {
                "Identity provider unavailable".to_string()
            }
            ServiceError::Provider(_) => "Completion provider request failed".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Identity-provider failures, classified from the provider's structured error codes.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Email not confirmed")]
    EmailNotConfirmed,

    #[error("User already registered")]
    UserAlreadyExists,

    #[error("Invalid or expired session token")]
    InvalidToken,

    #[error("Weak password: {0}")]
    WeakPassword(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Identity provider rejected request ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("No API key configured for provider")]
    NoApiKey,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
