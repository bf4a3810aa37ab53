#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use greencredit::api;
use greencredit::auth::bootstrap_admin;
use greencredit::config::Settings;
use greencredit::error::{ApiError, ApiResult};
use greencredit::ledger::MemoryLedger;
use greencredit::scoring::{EsgScorer, Features};
use greencredit::users::MemoryUserStore;
use greencredit::AppState;

pub const PREDICTION: f64 = 72.5;
pub const ADMIN_EMAIL: &str = "admin@greencredit.ai";
pub const ADMIN_PASSWORD: &str = "admin123";

/// Scorer that answers every request with [`PREDICTION`], or fails when
/// switched down.
#[derive(Default)]
pub struct FakeScorer {
    down: AtomicBool,
}

impl FakeScorer {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl EsgScorer for FakeScorer {
    async fn score(&self, _features: &Features) -> ApiResult<f64> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ApiError::Upstream("model not loaded".into()));
        }
        Ok(PREDICTION)
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub ledger: Arc<MemoryLedger>,
    pub scorer: Arc<FakeScorer>,
}

pub fn test_settings() -> Settings {
    Settings {
        rate_limit_max: 10_000,
        confirmation_poll: Duration::from_millis(1),
        confirmation_max_attempts: 5,
        ..Settings::default()
    }
}

pub async fn test_app() -> TestApp {
    test_app_with(test_settings()).await
}

/// Memory-backed app whose ledger signs as the admin wallet.
pub async fn test_app_with(settings: Settings) -> TestApp {
    let users = Arc::new(MemoryUserStore::new());
    bootstrap_admin(users.as_ref(), &settings.admin).await.unwrap();

    let account = settings.admin.wallet.unwrap_or(Address::repeat_byte(0xAD));
    let ledger = Arc::new(MemoryLedger::new(account));
    let scorer = Arc::new(FakeScorer::default());
    let state = AppState::new(settings, users, ledger.clone(), scorer.clone());
    TestApp {
        router: api::router(state.clone()),
        state,
        ledger,
        scorer,
    }
}

impl TestApp {
    /// Run a prebuilt request through the router.
    pub async fn send(&self, req: Request<Body>) -> Response {
        self.router.clone().oneshot(req).await.unwrap()
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = self.send(req.body(body).unwrap()).await;
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, token, Some(body)).await
    }

    /// Register `name` and return its bearer token.
    pub async fn user_token(&self, name: &str) -> String {
        let (status, body) = self
            .post(
                "/register",
                None,
                serde_json::json!({
                    "username": name,
                    "email": format!("{name}@example.com"),
                    "password": "secret123",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn admin_token(&self) -> String {
        let (status, body) = self
            .post(
                "/login",
                None,
                serde_json::json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "admin login failed: {body}");
        body["token"].as_str().unwrap().to_string()
    }
}
