//! End-to-end tests for the HTTP API over the in-memory backends

#[cfg(feature = "http-api")]
mod http_api_tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use chatnest_core::config::{Backend, Config};
    use chatnest_core::error::ProviderError;
    use chatnest_core::identity::InMemoryIdentity;
    use chatnest_core::provider::LlmProvider;
    use chatnest_core::service::http::{create_router, AppState};
    use chatnest_core::store::MemoryStore;
    use chatnest_core::types::{CompletionResponse, FinishReason, Message, TokenUsage};

    /// Replies with the last user message reversed, or fails when it says "fail".
    struct ReverseProvider;

    #[async_trait]
    impl LlmProvider for ReverseProvider {
        async fn chat(
            &self,
            messages: &[Message],
            _model: &str,
            _max_tokens: u32,
            _temperature: f64,
        ) -> Result<CompletionResponse, ProviderError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if last == "fail" {
                return Err(ProviderError::RateLimited("Rate limit reached".into()));
            }
            Ok(CompletionResponse {
                content: Some(last.chars().rev().collect()),
                finish_reason: FinishReason::Stop,
                usage: TokenUsage::default(),
            })
        }
    }

    struct TestApp {
        router: Router,
        identity: Arc<InMemoryIdentity>,
    }

    fn app(with_provider: bool) -> TestApp {
        let identity = Arc::new(InMemoryIdentity::new(true));
        let config = Config {
            backend: Backend::Memory,
            ..Default::default()
        };
        let provider: Option<Arc<dyn LlmProvider>> = if with_provider {
            Some(Arc::new(ReverseProvider))
        } else {
            None
        };
        let state = AppState::new(
            config,
            identity.clone(),
            Arc::new(MemoryStore::new()),
            provider,
        );
        TestApp {
            router: create_router(Arc::new(state)),
            identity,
        }
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header("authorization", format!("Bearer {t}"));
        }
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Sign up, verify and log in; returns the access token.
    async fn login_user(app: &TestApp, email: &str) -> String {
        let (status, _) = call(
            &app.router,
            "POST",
            "/api/auth",
            None,
            Some(json!({ "action": "signup", "name": "Tester", "email": email, "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        app.identity.confirm_email(email);

        let (status, body) = call(
            &app.router,
            "POST",
            "/api/auth",
            None,
            Some(json!({ "action": "login", "email": email, "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(false);
        let (status, body) = call(&app.router, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], chatnest_core::VERSION);
    }

    #[tokio::test]
    async fn test_auth_flow_status_codes() {
        let app = app(false);
        let r = &app.router;

        let (status, body) = call(r, "POST", "/api/auth", None, Some(json!({ "email": "a@x.com" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Action field is required");
        assert_eq!(body["status"], "error");

        let (status, _) = call(r, "POST", "/api/auth", None, Some(json!({ "action": "dance" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            r,
            "POST",
            "/api/auth",
            None,
            Some(json!({ "action": "signup", "name": "Bob", "email": "bob@x.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["email"], "bob@x.com");
        assert!(body["token"].is_null());

        let (status, _) = call(
            r,
            "POST",
            "/api/auth",
            None,
            Some(json!({ "action": "signup", "name": "Bob", "email": "bob@x.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let login = |email: &'static str, pw: &'static str| {
            json!({ "action": "login", "email": email, "password": pw })
        };
        let (status, _) = call(r, "POST", "/api/auth", None, Some(login("ghost@x.com", "secret1"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(r, "POST", "/api/auth", None, Some(login("bob@x.com", "secret1"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Please verify your email before logging in");

        app.identity.confirm_email("bob@x.com");
        let (status, _) = call(r, "POST", "/api/auth", None, Some(login("bob@x.com", "wrong!!"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(r, "POST", "/api/auth", None, Some(login("bob@x.com", "secret1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["emailVerified"], true);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, _) = call(r, "POST", "/api/auth", Some(&token), Some(json!({ "action": "signout" }))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(r, "GET", "/api/chat", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let app = app(false);
        let request = Request::builder()
            .method("POST")
            .uri("/api/auth")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_wrong_method_uses_error_body() {
        let app = app(false);
        let (status, body) = call(&app.router, "PUT", "/api/chat", None, None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Method not allowed");

        let (status, body) = call(&app.router, "GET", "/api/auth", None, None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_oversized_body_uses_error_body() {
        let app = app(false);
        let padding = "x".repeat(2 * 1024 * 1024);
        let payload = json!({ "action": "login", "email": "a@x.com", "password": padding });

        for uri in ["/api/auth", "/api/auth/resend-verification"] {
            let (status, body) = call(&app.router, "POST", uri, None, Some(payload.clone())).await;
            assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{uri}");
            assert_eq!(body["status"], "error");
            assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));
        }
    }

    #[tokio::test]
    async fn test_resend_verification() {
        let app = app(false);
        let r = &app.router;
        call(
            r,
            "POST",
            "/api/auth",
            None,
            Some(json!({ "action": "signup", "name": "Bob", "email": "bob@x.com", "password": "secret1" })),
        )
        .await;

        let (status, body) = call(
            r,
            "POST",
            "/api/auth/resend-verification",
            None,
            Some(json!({ "email": "bob@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Verification email sent successfully");
        assert_eq!(app.identity.verification_emails_sent("bob@x.com"), 2);

        let (status, body) = call(r, "POST", "/api/auth/resend-verification", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No email provided and not authenticated");
    }

    #[tokio::test]
    async fn test_chat_requires_auth() {
        let app = app(false);
        let (status, body) = call(&app.router, "GET", "/api/chat", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "error");

        let (status, _) = call(&app.router, "GET", "/api/users", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_chat_lifecycle() {
        let app = app(true);
        let r = &app.router;
        let token = login_user(&app, "alice@x.com").await;

        let (status, body) = call(r, "POST", "/api/chat", Some(&token), Some(json!({ "title": "  Trip " }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["title"], "Trip");
        let chat_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = call(r, "POST", "/api/chat", Some(&token), Some(json!({ "title": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            r,
            "POST",
            &format!("/api/chat/{chat_id}/message"),
            Some(&token),
            Some(json!({ "message": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["message"]["role"], "user");
        assert_eq!(body["data"]["message"]["content"], "hello");
        assert_eq!(body["data"]["reply"]["role"], "assistant");
        assert_eq!(body["data"]["reply"]["content"], "olleh");

        let (status, body) = call(
            r,
            "POST",
            &format!("/api/chat/{chat_id}/message"),
            Some(&token),
            Some(json!({ "message": "fail" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["data"]["reply"].is_null());

        let (status, body) = call(r, "GET", &format!("/api/chat/{chat_id}/message"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let contents: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["hello", "olleh", "fail"]);

        let (status, body) = call(r, "GET", &format!("/api/chats/{chat_id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("status").is_none());
        assert_eq!(body["data"]["messages"].as_array().unwrap().len(), 3);

        let (status, body) = call(
            r,
            "GET",
            &format!("/api/chats/{chat_id}?messagesOnly=true"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 3);

        let (status, body) = call(r, "GET", "/api/chat", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["id"], chat_id.as_str());

        let (status, _) = call(r, "DELETE", &format!("/api/chat/{chat_id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(r, "GET", &format!("/api/chat/{chat_id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chat_isolation_and_bad_ids() {
        let app = app(false);
        let r = &app.router;
        let alice = login_user(&app, "alice@x.com").await;
        let mallory = login_user(&app, "mallory@x.com").await;

        let (_, body) = call(r, "POST", "/api/chat", Some(&alice), Some(json!({ "title": "secret" }))).await;
        let chat_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(r, "GET", &format!("/api/chat/{chat_id}"), Some(&mallory), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Chat not found");

        let (status, _) = call(
            r,
            "POST",
            &format!("/api/chat/{chat_id}/message"),
            Some(&mallory),
            Some(json!({ "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(r, "GET", "/api/chat/not-a-uuid", Some(&alice), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            r,
            "GET",
            &format!("/api/chats/{chat_id}?messagesOnly=true&messagesOnly=false"),
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        // No completion provider configured: the reply is omitted.
        let (status, body) = call(
            r,
            "POST",
            &format!("/api/chat/{chat_id}/message"),
            Some(&alice),
            Some(json!({ "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["data"]["reply"].is_null());
    }

    #[tokio::test]
    async fn test_users_endpoints() {
        let app = app(false);
        let r = &app.router;
        let token = login_user(&app, "alice@x.com").await;

        let (status, body) = call(r, "GET", "/api/users", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let users = body.as_array().unwrap();
        assert_eq!(users.len(), 1);
        let id = users[0]["id"].as_str().unwrap().to_string();

        let (status, body) = call(r, "GET", &format!("/api/users/{id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "alice@x.com");

        let missing = uuid::Uuid::new_v4();
        let (status, _) = call(r, "GET", &format!("/api/users/{missing}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
