use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use axum_extra::extract::cookie::CookieJar;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::AppState;
use crate::appmax::diagnostics::{synthetic_order_payload, TestCheckoutInput};
use crate::appmax::webhook::sign;
use crate::auth::{session_from_jar, AdminSession};
use crate::middleware::client_ip::ClientIp;
use crate::models::ErrorResponse;
use crate::reconcile::engine::SOURCE_DIAGNOSTIC;
use crate::reconcile::ingest::ReplayError;
use crate::reconcile::{InboundWebhook, IngestError};
use crate::refund::{RefundError, RefundRequest};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn require_admin(state: &AppState, jar: &CookieJar) -> Result<AdminSession, ApiError> {
    session_from_jar(state.sessions.as_ref(), jar)
        .filter(AdminSession::is_elevated)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "UNAUTHORIZED",
                    "Admin session with an elevated role required",
                )),
            )
        })
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, "admin request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("INTERNAL_ERROR", err.to_string())),
    )
}

impl IntoResponse for RefundError {
    fn into_response(self) -> Response {
        let status = match &self {
            RefundError::Unauthorized => StatusCode::UNAUTHORIZED,
            RefundError::NotFound(_) => StatusCode::NOT_FOUND,
            RefundError::AlreadyRefunded(_) => StatusCode::CONFLICT,
            RefundError::ConfigError => StatusCode::SERVICE_UNAVAILABLE,
            RefundError::Appmax { .. } => StatusCode::BAD_GATEWAY,
            RefundError::DbUpdate(_) | RefundError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
            "error": self.code(),
            "gateway_refunded": self.gateway_refunded(),
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub external_order_id: String,
    pub reason: Option<String>,
}

/// Refund an order at the gateway, then locally.
pub async fn refund_order(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(order_id): Path<Uuid>,
    Json(body): Json<RefundBody>,
) -> Response {
    let session = session_from_jar(state.sessions.as_ref(), &jar);
    let request = RefundRequest {
        order_id,
        external_order_id: body.external_order_id,
        reason: body.reason,
    };

    match state.refunds.refund(session.as_ref(), request).await {
        Ok(receipt) => {
            state.metrics.refunds_total.with_label_values(&["success"]).inc();
            (StatusCode::OK, Json(receipt)).into_response()
        }
        Err(err) => {
            state.metrics.refunds_total.with_label_values(&[err.code()]).inc();
            err.into_response()
        }
    }
}

pub async fn list_order_refunds(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(order_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    require_admin(&state, &jar)?;
    let entries = state.refunds.history(order_id).await.map_err(internal)?;
    Ok(Json(json!({ "order_id": order_id, "refunds": entries })).into_response())
}

pub async fn get_webhook(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    require_admin(&state, &jar)?;
    let entry = state
        .stores
        .webhooks
        .get_webhook(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("NOT_FOUND", format!("Webhook {} not found", id))),
            )
        })?;
    Ok(Json(entry).into_response())
}

pub async fn replay_webhook(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let session = require_admin(&state, &jar)?;
    tracing::info!(audit_id = %id, actor = %session.user_id, "webhook replay requested");

    match state.pipeline.replay(id).await {
        Ok(outcome) => Ok(Json(outcome).into_response()),
        Err(ReplayError::NotFound(id)) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("NOT_FOUND", format!("Webhook {} not found", id))),
        )),
        Err(ReplayError::Store(err)) => Err(internal(err)),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TestWebhookBody {
    pub external_id: Option<String>,
    pub amount: Option<Decimal>,
    pub email: Option<String>,
}

/// Push a synthetic order-approved event through the live ingestion path.
pub async fn test_webhook(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(ClientIp(source_ip)): Extension<ClientIp>,
    body: Bytes,
) -> Result<Response, ApiError> {
    require_admin(&state, &jar)?;

    let input: TestWebhookBody = if body.is_empty() {
        TestWebhookBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("invalid_body", e.to_string())),
            )
        })?
    };

    let external_id = input
        .external_id
        .unwrap_or_else(|| format!("DIAG-{}", Uuid::new_v4().simple()));
    let payload = synthetic_order_payload(
        &external_id,
        input.amount.unwrap_or_else(|| Decimal::new(100, 0)),
        input.email.as_deref().unwrap_or("diagnostico@example.com"),
    );
    let raw = serde_json::to_vec(&payload).map_err(internal)?;

    let signature = state.pipeline.secret().and_then(|secret| sign(&raw, secret));

    let request = InboundWebhook {
        body: &raw,
        signature: signature.as_deref(),
        timestamp: None,
        source_ip: source_ip.as_deref(),
        source: SOURCE_DIAGNOSTIC,
    };

    match state.pipeline.ingest(request).await {
        Ok(outcome) => Ok(Json(json!({
            "signed": signature.is_some(),
            "payload": payload,
            "outcome": outcome,
        }))
        .into_response()),
        Err(IngestError::SignatureRejected) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(
                "signature_mismatch",
                "Synthetic webhook failed signature verification",
            )),
        )),
    }
}

/// Run the v3 create-customer, create-order, create-pix chain.
pub async fn test_checkout(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, ApiError> {
    require_admin(&state, &jar)?;

    let client = state.appmax.as_ref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(
                "CONFIG_ERROR",
                "Gateway credentials are not configured",
            )),
        )
    })?;

    let input: TestCheckoutInput = if body.is_empty() {
        TestCheckoutInput::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("invalid_body", e.to_string())),
            )
        })?
    };

    let report = client.test_checkout(input).await;
    Ok(Json(report).into_response())
}
