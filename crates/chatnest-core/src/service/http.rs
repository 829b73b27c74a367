use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection, QueryRejection},
        DefaultBodyLimit, FromRequestParts, Path, Query, State,
    },
    http::{self, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Backend, Config};
use crate::error::ServiceError;
use crate::identity::{GoTrueClient, IdentityProvider, InMemoryIdentity};
use crate::provider::{self, LlmProvider};
use crate::store::{DataStore, MemoryStore, PostgrestStore};
use crate::util::parse_uuid;

use super::{AuthService, ChatService, CompletionOrchestrator, CurrentUser, UserDirectory};

/// Request bodies above this size are rejected.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the HTTP API.
pub struct AppState {
    pub config: Config,
    pub auth: AuthService,
    pub chats: ChatService,
    pub users: UserDirectory,
}

impl AppState {
    pub fn new(
        config: Config,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DataStore>,
        provider: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        let auth = AuthService::new(
            identity,
            store.clone(),
            config.auth.auto_confirm,
            config.verification_redirect(),
        );
        let completion = CompletionOrchestrator::new(store.clone(), provider, &config.completion);
        let chats = ChatService::new(store.clone(), completion);
        let users = UserDirectory::new(store);
        Self {
            config,
            auth,
            chats,
            users,
        }
    }

    /// Build the backends selected by `config.backend`.
    pub fn from_config(config: Config) -> Result<Self, ServiceError> {
        config.validate()?;

        let (identity, store): (Arc<dyn IdentityProvider>, Arc<dyn DataStore>) =
            match config.backend {
                Backend::Supabase => {
                    let url = &config.supabase.url;
                    let service_key = Some(config.supabase.service_role_key.as_str())
                        .filter(|k| !k.is_empty());
                    if service_key.is_none() {
                        warn!("No service role key configured; table access uses the anon key");
                    }
                    let rest_key = service_key.unwrap_or(&config.supabase.anon_key);
                    (
                        Arc::new(GoTrueClient::new(url, &config.supabase.anon_key, service_key)),
                        Arc::new(PostgrestStore::new(url, rest_key)),
                    )
                }
                Backend::Memory => {
                    info!("Using in-memory identity and storage; data is lost on restart");
                    (
                        Arc::new(InMemoryIdentity::new(false)),
                        Arc::new(MemoryStore::new()),
                    )
                }
            };

        let provider = provider::create_provider(&config.completion)?;
        Ok(Self::new(config, identity, store, provider))
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
struct Envelope<T> {
    data: T,
    status: &'static str,
}

#[derive(Serialize)]
struct DataOnly<T> {
    data: T,
}

#[derive(Serialize)]
struct MessageBody {
    message: String,
}

fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    (
        status,
        Json(Envelope {
            data,
            status: "success",
        }),
    )
        .into_response()
}

/// Error response: `{"error": "...", "status": "error"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", err);
        } else {
            debug!("Request rejected ({}): {}", status, err);
        }
        Self {
            status,
            message: err.client_message(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: format!("Invalid request body: {}", rejection.body_text()),
        }
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: format!("Invalid request body: {}", rejection.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.message,
                "status": "error",
            })),
        )
            .into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// Raw bearer token from the `Authorization` header, if any.
pub struct BearerToken(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(BearerToken(bearer_token(&parts.headers)))
    }
}

fn bearer_token(headers: &http::HeaderMap) -> Option<String> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers);
        Ok(state.auth.authenticate(token.as_deref()).await?)
    }
}

fn chat_id(raw: &str) -> Result<Uuid, ApiError> {
    parse_uuid(raw).ok_or_else(|| ApiError::bad_request("Invalid chat ID"))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Create the axum Router with all API routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION]);

    Router::new()
        // Auth
        .route("/api/auth", post(handle_auth))
        .route("/api/auth/resend-verification", post(handle_resend_verification))
        // Chats
        .route("/api/chat", post(handle_create_chat).get(handle_list_chats))
        .route("/api/chat/{id}", get(handle_get_chat).delete(handle_delete_chat))
        .route(
            "/api/chat/{id}/message",
            get(handle_list_messages).post(handle_send_message),
        )
        .route("/api/chats/{id}", get(handle_chat_detail))
        // Users
        .route("/api/users", get(handle_list_users))
        .route("/api/users/{id}", get(handle_get_user))
        // Health
        .route("/health", get(handle_health))
        .method_not_allowed_fallback(handle_method_not_allowed)
        .fallback(handle_not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
                .layer(cors),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AuthRequest {
    action: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// POST /api/auth — `login`, `signup` or `signout`, chosen by `action`
async fn handle_auth(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload?;
    let email = req.email.as_deref().unwrap_or_default();
    let password = req.password.as_deref().unwrap_or_default();

    match req.action.as_deref() {
        None | Some("") => Err(ApiError::bad_request("Action field is required")),
        Some("login") => {
            let result = state.auth.login(email, password).await?;
            Ok((StatusCode::OK, Json(result)).into_response())
        }
        Some("signup") => {
            let name = req.name.as_deref().unwrap_or_default();
            let result = state.auth.signup(name, email, password).await?;
            Ok((StatusCode::CREATED, Json(result)).into_response())
        }
        Some("signout") => {
            state.auth.signout(token.as_deref()).await?;
            Ok(Json(MessageBody {
                message: "Signed out successfully".to_string(),
            })
            .into_response())
        }
        Some(_) => Err(ApiError::bad_request("Invalid action")),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ResendRequest {
    #[serde(default)]
    email: Option<String>,
}

/// POST /api/auth/resend-verification — Resend the signup email
async fn handle_resend_verification(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult {
    let body = body?;
    // Malformed JSON falls back to the session's email.
    let req: ResendRequest = serde_json::from_slice(&body).unwrap_or_default();
    state
        .auth
        .resend_verification(req.email.as_deref(), token.as_deref())
        .await?;
    Ok(Json(MessageBody {
        message: "Verification email sent successfully".to_string(),
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateChatRequest {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChatDetailQuery {
    #[serde(rename = "messagesOnly")]
    messages_only: Option<String>,
}

/// POST /api/chat — Create a chat
async fn handle_create_chat(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    payload: Result<Json<CreateChatRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload?;
    let chat = state.chats.create_chat(&user, &req.title).await?;
    Ok(success(StatusCode::CREATED, chat))
}

/// GET /api/chat — List the caller's chats, most recent first
async fn handle_list_chats(State(state): State<Arc<AppState>>, user: CurrentUser) -> ApiResult {
    let chats = state.chats.list_chats(&user).await?;
    Ok(success(StatusCode::OK, chats))
}

/// GET /api/chat/:id — Chat with messages
async fn handle_get_chat(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let chat = state.chats.get_chat(&user, chat_id(&id)?).await?;
    Ok(success(StatusCode::OK, chat))
}

/// DELETE /api/chat/:id — Delete chat and its messages
async fn handle_delete_chat(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let id = chat_id(&id)?;
    state.chats.delete_chat(&user, id).await?;
    Ok(success(
        StatusCode::OK,
        serde_json::json!({ "id": id, "deleted": true }),
    ))
}

/// GET /api/chat/:id/message — Messages in creation order
async fn handle_list_messages(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let messages = state.chats.get_messages(&user, chat_id(&id)?).await?;
    Ok(success(StatusCode::OK, messages))
}

/// POST /api/chat/:id/message — Send a message and get the assistant reply
async fn handle_send_message(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult {
    let id = chat_id(&id)?;
    let Json(req) = payload?;
    let exchange = state.chats.exchange(&user, id, &req.message).await?;
    Ok(success(StatusCode::CREATED, exchange))
}

/// GET /api/chats/:id — Chat detail, or just its messages with `?messagesOnly=true`
async fn handle_chat_detail(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    query: Result<Query<ChatDetailQuery>, QueryRejection>,
) -> ApiResult {
    let id = chat_id(&id)?;
    let Query(query) = query?;
    let response = if query.messages_only.as_deref() == Some("true") {
        let messages = state.chats.get_messages(&user, id).await?;
        Json(DataOnly { data: messages }).into_response()
    } else {
        let chat = state.chats.get_chat(&user, id).await?;
        Json(DataOnly { data: chat }).into_response()
    };
    Ok(response)
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// GET /api/users — All profiles
async fn handle_list_users(State(state): State<Arc<AppState>>, _user: CurrentUser) -> ApiResult {
    let users = state.users.list().await?;
    Ok(Json(users).into_response())
}

/// GET /api/users/:id — One profile
async fn handle_get_user(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_uuid(&id).ok_or_else(|| ApiError::bad_request("Invalid user ID"))?;
    let profile = state.users.get(id).await?;
    Ok(Json(profile).into_response())
}

/// GET /health — Health check
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

async fn handle_not_found() -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        message: "Not found".to_string(),
    }
}

async fn handle_method_not_allowed() -> ApiError {
    ApiError {
        status: StatusCode::METHOD_NOT_ALLOWED,
        message: "Method not allowed".to_string(),
    }
}

/// Start the HTTP server on the given address.
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = http::HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));

        headers.insert(http::header::AUTHORIZATION, "bearer  xyz ".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(http::header::AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(http::header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_api_error_from_service_error() {
        let err = ApiError::from(ServiceError::EmailNotVerified);
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.message, "Please verify your email before logging in");

        let err = ApiError::from(ServiceError::Store(crate::error::StoreError::Other(
            "connection refused".into(),
        )));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Database request failed");
    }

    #[test]
    fn test_from_config_memory_backend() {
        let config = Config {
            backend: Backend::Memory,
            ..Default::default()
        };
        assert!(AppState::from_config(config).is_ok());

        let err = AppState::from_config(Config::default()).err().unwrap();
        assert!(matches!(err, ServiceError::Config(_)));
    }
}
