//! Webhook entry point: verify, parse, normalize, reconcile.
//!
//! Every inbound payload, whether live, replayed or synthetic, enters
//! through [`WebhookPipeline`]. Once the signature check passes the
//! transport outcome is always `Ok`; processing results travel separately.

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

use super::engine::{Delivery, ProcessingOutcome, ReconciliationEngine};
use super::normalize::{self, NormalizeError};
use crate::appmax::webhook::verify_signature;
use crate::models::SignatureCheck;
use crate::store::{StoreError, Stores};

pub const INVALID_JSON: &str = "INVALID_JSON";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Webhook signature verification failed")]
    SignatureRejected,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("webhook {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportOutcome {
    Ok,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookOutcome {
    pub transport: TransportOutcome,
    pub processing: ProcessingOutcome,
}

impl WebhookOutcome {
    fn accepted(processing: ProcessingOutcome) -> Self {
        Self {
            transport: TransportOutcome::Ok,
            processing,
        }
    }
}

/// One inbound request as seen by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct InboundWebhook<'a> {
    pub body: &'a [u8],
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub source_ip: Option<&'a str>,
    pub source: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct SignaturePolicy {
    pub secret: Option<String>,
    pub tolerance_secs: i64,
}

#[derive(Clone)]
pub struct WebhookPipeline {
    engine: ReconciliationEngine,
    stores: Stores,
    policy: SignaturePolicy,
}

impl WebhookPipeline {
    pub fn new(stores: Stores, policy: SignaturePolicy) -> Self {
        Self {
            engine: ReconciliationEngine::new(stores.clone()),
            stores,
            policy,
        }
    }

    /// Secret used to verify inbound signatures, if any.
    pub fn secret(&self) -> Option<&str> {
        self.policy.secret.as_deref()
    }

    /// Verify the request, then hand it to reconciliation. Only an invalid
    /// signature is an error; nothing has been written when it is returned.
    pub async fn ingest(&self, request: InboundWebhook<'_>) -> Result<WebhookOutcome, IngestError> {
        let check = verify_signature(
            request.body,
            request.signature,
            request.timestamp,
            self.policy.secret.as_deref(),
            self.policy.tolerance_secs,
        );

        match check {
            SignatureCheck::Invalid => {
                tracing::warn!(source_ip = ?request.source_ip, "webhook rejected: invalid signature");
                return Err(IngestError::SignatureRejected);
            }
            SignatureCheck::Skipped => {
                tracing::warn!(
                    source_ip = ?request.source_ip,
                    "webhook accepted without signature check, no secret configured"
                );
            }
            SignatureCheck::Valid | SignatureCheck::NotApplicable => {}
        }

        let delivery = Delivery {
            source: request.source.to_string(),
            source_ip: request.source_ip.map(str::to_string),
            signature: check,
        };

        let processing = match serde_json::from_slice::<JsonValue>(request.body) {
            Ok(payload) => self.process(payload, &delivery).await,
            Err(err) => {
                tracing::warn!(error = %err, "webhook body is not valid JSON");
                let raw = json!({ "raw_body": String::from_utf8_lossy(request.body) });
                self.engine.record_only(raw, None, &delivery, INVALID_JSON).await
            }
        };

        Ok(WebhookOutcome::accepted(processing))
    }

    /// Feed a stored payload through reconciliation again under a new audit
    /// entry.
    pub async fn replay(&self, audit_id: Uuid) -> Result<WebhookOutcome, ReplayError> {
        let entry = self
            .stores
            .webhooks
            .get_webhook(audit_id)
            .await?
            .ok_or(ReplayError::NotFound(audit_id))?;

        tracing::info!(%audit_id, "replaying webhook");
        let processing = self.process(entry.payload, &Delivery::replay()).await;
        Ok(WebhookOutcome::accepted(processing))
    }

    async fn process(&self, payload: JsonValue, delivery: &Delivery) -> ProcessingOutcome {
        match normalize::normalize(&payload) {
            Ok(event) => self.engine.reconcile(event, payload, delivery).await,
            Err(err @ NormalizeError::MissingId) => {
                let event_type = normalize::event_type(&payload);
                self.engine
                    .record_only(payload, event_type, delivery, err.code())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appmax::webhook::sign;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    const SECRET: &str = "whsec_pipeline";

    fn pipeline(secret: Option<&str>) -> (Arc<InMemoryStore>, WebhookPipeline) {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = WebhookPipeline::new(
            Stores::shared(store.clone()),
            SignaturePolicy {
                secret: secret.map(str::to_string),
                tolerance_secs: 300,
            },
        );
        (store, pipeline)
    }

    fn inbound<'a>(body: &'a [u8], signature: Option<&'a str>) -> InboundWebhook<'a> {
        InboundWebhook {
            body,
            signature,
            timestamp: None,
            source_ip: Some("198.51.100.1"),
            source: "appmax",
        }
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_any_write() {
        let (store, pipeline) = pipeline(Some(SECRET));
        let body = br#"{"order_id":"S-1","status":"approved"}"#;

        let result = pipeline.ingest(inbound(body, Some("sha256=00"))).await;
        assert!(matches!(result, Err(IngestError::SignatureRejected)));

        let result = pipeline.ingest(inbound(body, None)).await;
        assert!(matches!(result, Err(IngestError::SignatureRejected)));

        assert!(store.webhook_entries().await.is_empty());
        assert!(store.orders().await.is_empty());
    }

    #[tokio::test]
    async fn signed_request_is_reconciled() {
        let (store, pipeline) = pipeline(Some(SECRET));
        let body = br#"{"order_id":"S-2","status":"approved"}"#;
        let signature = sign(body, SECRET).unwrap();

        let outcome = pipeline.ingest(inbound(body, Some(&signature))).await.unwrap();
        assert_eq!(outcome.transport, TransportOutcome::Ok);
        assert_eq!(outcome.processing.label(), "reconciled");
        assert_eq!(store.webhook_entries().await[0].signature, "valid");
    }

    #[tokio::test]
    async fn unparseable_body_is_recorded_not_rejected() {
        let (store, pipeline) = pipeline(None);
        let outcome = pipeline.ingest(inbound(b"not json", None)).await.unwrap();

        assert!(matches!(
            outcome.processing,
            ProcessingOutcome::Skipped { ref reason, .. } if reason == INVALID_JSON
        ));
        let entries = store.webhook_entries().await;
        assert_eq!(entries[0].payload["raw_body"], "not json");
        assert_eq!(entries[0].signature, "skipped");
    }

    #[tokio::test]
    async fn replay_creates_a_second_audit_entry() {
        let (store, pipeline) = pipeline(None);
        let body = br#"{"order_id":"R-1","status":"pending"}"#;
        let first = pipeline.ingest(inbound(body, None)).await.unwrap();
        let ProcessingOutcome::Reconciled { audit_id, order_id, .. } = first.processing else {
            panic!("expected reconciled");
        };

        let replayed = pipeline.replay(audit_id).await.unwrap();
        let ProcessingOutcome::Reconciled {
            audit_id: replay_audit,
            order_id: replay_order,
            ..
        } = replayed.processing
        else {
            panic!("expected reconciled replay");
        };

        assert_ne!(replay_audit, audit_id);
        assert_eq!(replay_order, order_id);
        let entries = store.webhook_entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].source, "replay");
        assert_eq!(entries[1].signature, "not_applicable");
        assert_eq!(store.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn replay_of_unknown_entry_is_not_found() {
        let (_store, pipeline) = pipeline(None);
        let result = pipeline.replay(Uuid::new_v4()).await;
        assert!(matches!(result, Err(ReplayError::NotFound(_))));
    }
}
