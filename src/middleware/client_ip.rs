use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

/// Best-known address of the caller, attached to every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

fn header_ip(headers: &HeaderMap) -> Option<String> {
    // Prefer X-Forwarded-For (first IP), then X-Real-IP
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = xff.split(',').next().map(|s| s.trim()).filter(|s| !s.is_empty());
        if let Some(ip) = first {
            return Some(ip.to_string());
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

pub fn extract_ip(headers: &HeaderMap, connect: Option<SocketAddr>) -> Option<String> {
    header_ip(headers).or_else(|| connect.map(|c| c.ip().to_string()))
}

pub async fn client_ip_middleware(mut req: Request<Body>, next: Next) -> Response {
    // Present only when served with into_make_service_with_connect_info::<SocketAddr>()
    let connect = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let ip = extract_ip(req.headers(), connect);
    req.extensions_mut().insert(ClientIp(ip));

    next.run(req).await
}
