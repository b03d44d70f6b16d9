mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use appmax_recon::appmax::webhook::sign;
use appmax_recon::models::OrderStatus;
use appmax_recon::reconcile::normalize::{PLACEHOLDER_EMAIL, UNKNOWN_CUSTOMER_NAME};
use appmax_recon::store::OrderStore;
use common::{body_json, test_app, TestApp, TEST_WEBHOOK_SECRET};

const WEBHOOK_PATH: &str = "/api/webhooks/appmax";

async fn post_webhook(app: &TestApp, path: &str, body: &str, signature: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.10");
    if let Some(signature) = signature {
        request = request.header("x-appmax-signature", signature);
    }

    let response = app
        .router
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    (status, body_json(response).await)
}

/// TEST 1: the canonical order-approved delivery
#[tokio::test]
async fn test_order_approved_end_to_end() {
    let app = test_app().build();
    let payload = json!({
        "event": "order.approved",
        "order_id": "TEST-1",
        "amount": 100.0,
        "payment_method": "pix",
        "customer": { "name": "Teste", "email": "teste@x.com" }
    });

    let (status, body) = post_webhook(&app, WEBHOOK_PATH, &payload.to_string(), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transport"], "ok");
    assert_eq!(body["processing"]["outcome"], "reconciled");
    assert_eq!(body["processing"]["status"], "approved");

    let orders = app.store.orders().await;
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.external_id, "TEST-1");
    assert_eq!(order.status, OrderStatus::Approved);
    assert_eq!(order.total_amount, Decimal::new(100, 0));
    assert_eq!(order.payment_method, "pix");
    assert!(order.paid_at.is_some());
    assert_eq!(order.metadata["raw_payload"], payload);

    let entries = app.store.webhook_entries().await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].success);
    assert!(entries[0].processed);
    assert_eq!(entries[0].source_ip.as_deref(), Some("203.0.113.10"));
    assert_eq!(entries[0].event_type.as_deref(), Some("order.approved"));
}

/// TEST 2: identical re-delivery creates nothing new
#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let app = test_app().build();
    let payload = json!({
        "event": "order.paid",
        "data": {
            "id": 5521,
            "total": "149,90",
            "customer": { "firstname": "Ana", "lastname": "Souza", "email": "ana@example.com" },
            "products": [
                { "sku": "PLAN-1", "name": "Plano anual", "price": "129.90", "qty": 1 },
                { "sku": "BUMP-1", "name": "Bonus", "price": "20.00", "qty": 1 }
            ]
        }
    })
    .to_string();

    for _ in 0..2 {
        let (status, _) = post_webhook(&app, WEBHOOK_PATH, &payload, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let orders = app.store.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].external_id, "5521");
    assert_eq!(orders[0].total_amount, Decimal::new(14990, 2));
    assert_eq!(orders[0].customer_name, "Ana Souza");

    let items = app.store.line_items(orders[0].id).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].product_id, "PLAN-1");
    assert_eq!(items[1].product_id, "BUMP-1");

    // each delivery is still audited
    assert_eq!(app.store.webhook_entries().await.len(), 2);
}

/// TEST 3: no id anywhere in the payload
#[tokio::test]
async fn test_missing_id_is_recorded_not_reconciled() {
    let app = test_app().build();
    let payload = json!({ "event": "order.approved", "customer": { "email": "x@y.com" } });

    let (status, body) = post_webhook(&app, WEBHOOK_PATH, &payload.to_string(), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processing"]["outcome"], "skipped");
    assert_eq!(body["processing"]["reason"], "MISSING_ID");

    let entries = app.store.webhook_entries().await;
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].processed);
    assert!(app.store.orders().await.is_empty());
}

/// TEST 4: a payload without any customer still persists an order
#[tokio::test]
async fn test_missing_customer_uses_placeholders() {
    let app = test_app().build();
    let payload = json!({ "order_id": "NO-CUST-1", "status": "pending" });

    let (status, _) = post_webhook(&app, WEBHOOK_PATH, &payload.to_string(), None).await;
    assert_eq!(status, StatusCode::OK);

    let order = app.store.find_by_external_id("NO-CUST-1").await.unwrap().unwrap();
    assert_eq!(order.customer_name, UNKNOWN_CUSTOMER_NAME);
    assert_eq!(order.customer_email, PLACEHOLDER_EMAIL);
    assert_eq!(order.total_amount, Decimal::ZERO);
    assert_eq!(order.payment_method, "credit_card");
    assert!(order.paid_at.is_none());
}

/// TEST 5: with a secret configured, bad signatures never reach the store
#[tokio::test]
async fn test_signature_enforced_when_secret_configured() {
    let app = test_app().webhook_secret(TEST_WEBHOOK_SECRET).build();
    let payload = json!({ "order_id": "SIG-1", "status": "approved" }).to_string();

    let (status, body) = post_webhook(&app, WEBHOOK_PATH, &payload, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_signature");

    let wrong = sign(payload.as_bytes(), "some-other-secret").unwrap();
    let (status, _) = post_webhook(&app, WEBHOOK_PATH, &payload, Some(&wrong)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(app.store.webhook_entries().await.is_empty());
    assert!(app.store.orders().await.is_empty());

    let good = sign(payload.as_bytes(), TEST_WEBHOOK_SECRET).unwrap();
    let (status, body) = post_webhook(&app, WEBHOOK_PATH, &payload, Some(&good)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processing"]["outcome"], "reconciled");
    assert_eq!(app.store.webhook_entries().await[0].signature, "valid");
}

/// TEST 6: permissive mode accepts unsigned requests and marks them skipped
#[tokio::test]
async fn test_unsigned_request_accepted_without_secret() {
    let app = test_app().build();
    let payload = json!({ "order_id": "PERM-1", "status": "approved" }).to_string();

    let (status, _) = post_webhook(&app, WEBHOOK_PATH, &payload, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.webhook_entries().await[0].signature, "skipped");
}

/// TEST 7: stale timestamp header is treated as a replay
#[tokio::test]
async fn test_stale_timestamp_rejected() {
    let app = test_app().webhook_secret(TEST_WEBHOOK_SECRET).build();
    let payload = json!({ "order_id": "TS-1", "status": "approved" }).to_string();
    let signature = sign(payload.as_bytes(), TEST_WEBHOOK_SECRET).unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(WEBHOOK_PATH)
                .header("x-appmax-signature", signature)
                .header("x-appmax-timestamp", "1000000")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.store.webhook_entries().await.is_empty());
}

/// TEST 8: a late pending event does not undo an approval
#[tokio::test]
async fn test_out_of_order_delivery_keeps_approved() {
    let app = test_app().build();
    let approved = json!({ "order_id": "OOO-1", "status": "approved", "total": 50 }).to_string();
    let pending = json!({ "order_id": "OOO-1", "status": "pending", "total": 50 }).to_string();

    post_webhook(&app, WEBHOOK_PATH, &approved, None).await;
    let paid_at = app
        .store
        .find_by_external_id("OOO-1")
        .await
        .unwrap()
        .unwrap()
        .paid_at;

    let (status, body) = post_webhook(&app, WEBHOOK_PATH, &pending, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processing"]["status"], "approved");

    let order = app.store.find_by_external_id("OOO-1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Approved);
    assert_eq!(order.paid_at, paid_at);
    assert_eq!(order.metadata["diagnostics"]["blocked_transition"]["to"], "pending");
}

/// TEST 9: refunded orders are not revived by a late approval
#[tokio::test]
async fn test_terminal_status_sticks() {
    let app = test_app().build();
    for status in ["approved", "refunded", "approved"] {
        let payload = json!({ "order_id": "TERM-1", "status": status }).to_string();
        post_webhook(&app, WEBHOOK_PATH, &payload, None).await;
    }

    let order = app.store.find_by_external_id("TERM-1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);
}

/// TEST 10: store failures still answer 200 with a failed outcome
#[tokio::test]
async fn test_processing_failure_is_success_shaped() {
    let app = test_app().build();
    app.store.set_order_writes_failing(true).await;
    let payload = json!({ "order_id": "FAIL-1", "status": "approved" }).to_string();

    let (status, body) = post_webhook(&app, WEBHOOK_PATH, &payload, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transport"], "ok");
    assert_eq!(body["processing"]["outcome"], "failed");
    assert!(body["processing"]["error"].is_string());

    let entries = app.store.webhook_entries().await;
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].processed);
}

/// TEST 11: concurrent duplicates resolve to one order
#[tokio::test]
async fn test_concurrent_duplicates_create_one_order() {
    let app = test_app().build();
    let payload = json!({ "order_id": "RACE-1", "status": "approved" }).to_string();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = app.router.clone();
        let body = payload.clone();
        handles.push(tokio::spawn(async move {
            router
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri(WEBHOOK_PATH)
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap()
                .status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(app.store.orders().await.len(), 1);
    assert_eq!(app.store.webhook_entries().await.len(), 8);
}

/// TEST 12: both historical paths accept POST and answer GET
#[tokio::test]
async fn test_legacy_path_and_liveness() {
    let app = test_app().build();
    let payload = json!({ "order_id": "LEGACY-1", "status": "paid" }).to_string();
    let (status, _) = post_webhook(&app, "/api/webhook/appmax", &payload, None).await;
    assert_eq!(status, StatusCode::OK);

    for path in [WEBHOOK_PATH, "/api/webhook/appmax"] {
        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }
}

/// TEST 13: outcomes are counted
#[tokio::test]
async fn test_webhook_outcomes_exported_as_metrics() {
    let app = test_app().webhook_secret(TEST_WEBHOOK_SECRET).build();
    post_webhook(&app, WEBHOOK_PATH, "{}", None).await;

    let rendered = app.metrics.render().unwrap();
    assert!(rendered.contains("recon_webhooks_total{outcome=\"rejected\"} 1"));

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
