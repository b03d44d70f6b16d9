#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use appmax_recon::appmax::error::AppmaxError;
use appmax_recon::appmax::refund::RefundGateway;
use appmax_recon::auth::{SessionKeys, SESSION_COOKIE};
use appmax_recon::metrics::Metrics;
use appmax_recon::reconcile::SignaturePolicy;
use appmax_recon::store::{InMemoryStore, Stores};
use appmax_recon::{router, AppState};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TEST_SESSION_SECRET: &str = "admin-session-test-secret";

/// Refund gateway that replays scripted responses and records every call.
#[derive(Default)]
pub struct FakeGateway {
    responses: Mutex<VecDeque<Result<Value, AppmaxError>>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, body: Value) {
        self.responses.lock().unwrap().push_back(Ok(body));
    }

    pub fn push_err(&self, err: AppmaxError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    /// Hold every call open this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RefundGateway for FakeGateway {
    async fn refund_order(&self, external_order_id: &str, reason: &str) -> Result<Value, AppmaxError> {
        self.calls
            .lock()
            .unwrap()
            .push((external_order_id.to_string(), reason.to_string()));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(serde_json::json!({ "success": true })))
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub sessions: SessionKeys,
    pub metrics: Metrics,
    pub router: Router,
}

pub struct TestAppBuilder {
    secret: Option<String>,
    gateway_configured: bool,
    sessions_configured: bool,
}

impl TestAppBuilder {
    pub fn webhook_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    pub fn without_gateway(mut self) -> Self {
        self.gateway_configured = false;
        self
    }

    pub fn without_sessions(mut self) -> Self {
        self.sessions_configured = false;
        self
    }

    pub fn build(self) -> TestApp {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let sessions = SessionKeys::from_secret(TEST_SESSION_SECRET);
        let metrics = Metrics::new().unwrap();

        let state = AppState::with_gateway(
            Stores::shared(store.clone()),
            SignaturePolicy {
                secret: self.secret,
                tolerance_secs: 300,
            },
            None,
            self.gateway_configured
                .then(|| gateway.clone() as Arc<dyn RefundGateway>),
            self.sessions_configured.then(|| sessions.clone()),
            metrics.clone(),
            None,
        );

        TestApp {
            store,
            gateway,
            sessions,
            metrics,
            router: router(state),
        }
    }
}

/// In-memory app with a fake gateway and admin sessions enabled.
pub fn test_app() -> TestAppBuilder {
    TestAppBuilder {
        secret: None,
        gateway_configured: true,
        sessions_configured: true,
    }
}

impl TestApp {
    /// `Cookie` header value for a session with the given role.
    pub fn cookie(&self, role: &str) -> String {
        let token = self
            .sessions
            .sign_session("admin-1", Some("ops@example.com"), role, 15)
            .unwrap();
        format!("{}={}", SESSION_COOKIE, token)
    }

    pub fn admin_cookie(&self) -> String {
        self.cookie("admin")
    }
}

/// Read response body as JSON.
pub async fn body_json(response: axum::http::Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Generate a unique external order ID.
pub fn unique_external_id() -> String {
    format!("ext-{}", Uuid::new_v4())
}

/// Connect to the test database and run migrations.
pub async fn setup_pool() -> PgPool {
    dotenvy::dotenv().ok();

    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for Postgres tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}
