pub mod admin;
pub mod health;
pub mod metrics;
pub mod webhooks;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::appmax::refund::RefundGateway;
use crate::appmax::AppmaxClient;
use crate::auth::SessionKeys;
use crate::metrics::Metrics;
use crate::middleware::{client_ip::client_ip_middleware, metrics::metrics_middleware, tracing::trace_id_middleware};
use crate::reconcile::{SignaturePolicy, WebhookPipeline};
use crate::refund::RefundCoordinator;
use crate::store::Stores;

/// Everything the handlers share. Built once at startup and cloned per
/// request.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub pipeline: WebhookPipeline,
    pub refunds: RefundCoordinator,
    pub appmax: Option<AppmaxClient>,
    pub sessions: Option<SessionKeys>,
    pub metrics: Metrics,
    /// `None` when running on in-memory stores.
    pub db: Option<PgPool>,
}

impl AppState {
    pub fn new(
        stores: Stores,
        policy: SignaturePolicy,
        appmax: Option<AppmaxClient>,
        sessions: Option<SessionKeys>,
        metrics: Metrics,
        db: Option<PgPool>,
    ) -> Self {
        let gateway = appmax
            .clone()
            .map(|client| Arc::new(client) as Arc<dyn RefundGateway>);
        Self::with_gateway(stores, policy, appmax, gateway, sessions, metrics, db)
    }

    /// Like [`AppState::new`] with an explicit refund gateway, so callers can
    /// substitute the outbound refund call.
    pub fn with_gateway(
        stores: Stores,
        policy: SignaturePolicy,
        appmax: Option<AppmaxClient>,
        gateway: Option<Arc<dyn RefundGateway>>,
        sessions: Option<SessionKeys>,
        metrics: Metrics,
        db: Option<PgPool>,
    ) -> Self {
        Self {
            pipeline: WebhookPipeline::new(stores.clone(), policy),
            refunds: RefundCoordinator::new(stores.clone(), gateway),
            stores,
            appmax,
            sessions,
            metrics,
            db,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let metrics = state.metrics.clone();

    Router::new()
        // Gateway webhooks, both historical paths
        .route(
            "/api/webhooks/appmax",
            post(webhooks::receive_appmax_webhook).get(webhooks::webhook_liveness),
        )
        .route(
            "/api/webhook/appmax",
            post(webhooks::receive_appmax_webhook).get(webhooks::webhook_liveness),
        )
        // Admin
        .route("/api/admin/orders/{id}/refund", post(admin::refund_order))
        .route("/api/admin/orders/{id}/refunds", get(admin::list_order_refunds))
        .route("/api/admin/webhooks/{id}", get(admin::get_webhook))
        .route("/api/admin/webhooks/{id}/replay", post(admin::replay_webhook))
        .route("/api/admin/appmax/test-webhook", post(admin::test_webhook))
        .route("/api/admin/appmax/test-checkout", post(admin::test_checkout))
        // Health
        .route("/api/health/live", get(health::health_live))
        .route("/api/health/ready", get(health::health_ready))
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
        .layer(from_fn_with_state(metrics, metrics_middleware))
        .layer(from_fn(client_ip_middleware))
        .layer(from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
