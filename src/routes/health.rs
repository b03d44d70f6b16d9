use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use super::AppState;

pub async fn health_live() -> StatusCode {
    StatusCode::OK
}

pub async fn health_ready(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let Some(db) = &state.db else {
        return Ok(Json(json!({
            "status": "ready",
            "database": "in-memory",
            "gateway": gateway_label(&state),
        })));
    };

    sqlx::query("SELECT 1")
        .fetch_one(db)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    Ok(Json(json!({
        "status": "ready",
        "database": "connected",
        "gateway": gateway_label(&state),
    })))
}

fn gateway_label(state: &AppState) -> &'static str {
    if state.appmax.is_some() {
        "configured"
    } else {
        "unconfigured"
    }
}
