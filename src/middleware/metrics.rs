use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics::Metrics;

pub async fn metrics_middleware(
    State(metrics): State<Metrics>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // Route templates keep label cardinality bounded
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = req.method().to_string();
    let start = Instant::now();

    let res = next.run(req).await;

    let status = res.status().as_u16().to_string();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[&path, &method, &status])
        .observe(start.elapsed().as_secs_f64());

    res
}
