pub mod auth;
pub mod chat;
pub mod completion;
pub mod users;

#[cfg(feature = "http-api")]
pub mod http;

use serde::Serialize;
use uuid::Uuid;

pub use auth::{AuthResult, AuthService};
pub use chat::{ChatService, Exchange};
pub use completion::CompletionOrchestrator;
pub use users::UserDirectory;

/// The authenticated caller, resolved from the bearer token on every
/// protected request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
}
