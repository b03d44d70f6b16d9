use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;

use super::AppState;
use crate::appmax::webhook::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::middleware::client_ip::ClientIp;
use crate::models::ErrorResponse;
use crate::reconcile::engine::SOURCE_APPMAX;
use crate::reconcile::{InboundWebhook, IngestError};

/// Receive an Appmax webhook.
///
/// Responds 200 for everything past the signature check, including
/// processing failures, so the gateway does not retry. The body says what
/// actually happened.
pub async fn receive_appmax_webhook(
    State(state): State<AppState>,
    Extension(ClientIp(source_ip)): Extension<ClientIp>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = InboundWebhook {
        body: &body,
        signature: header_str(&headers, SIGNATURE_HEADER),
        timestamp: header_str(&headers, TIMESTAMP_HEADER),
        source_ip: source_ip.as_deref(),
        source: SOURCE_APPMAX,
    };

    match state.pipeline.ingest(request).await {
        Ok(outcome) => {
            state
                .metrics
                .webhooks_total
                .with_label_values(&[outcome.processing.label()])
                .inc();
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(IngestError::SignatureRejected) => {
            state.metrics.webhooks_total.with_label_values(&["rejected"]).inc();
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "invalid_signature",
                    "Webhook signature verification failed",
                )),
            )
                .into_response()
        }
    }
}

pub async fn webhook_liveness() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "appmax-webhook",
        "accepts": "POST",
    }))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
