//! Folds a normalized event into order and line-item state, bracketed by
//! a webhook audit entry.

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::normalize::OrderEvent;
use super::status::map_status;
use crate::models::{
    LineItem, NewWebhookAuditEntry, OrderStatus, OrderUpsert, SignatureCheck, WebhookAuditEntry,
};
use crate::store::{StoreError, Stores};

pub const SOURCE_APPMAX: &str = "appmax";
pub const SOURCE_REPLAY: &str = "replay";
pub const SOURCE_DIAGNOSTIC: &str = "diagnostic";

/// Where a payload came from and how far it is trusted.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub source: String,
    pub source_ip: Option<String>,
    pub signature: SignatureCheck,
}

impl Delivery {
    pub fn appmax(source_ip: Option<String>, signature: SignatureCheck) -> Self {
        Self {
            source: SOURCE_APPMAX.to_string(),
            source_ip,
            signature,
        }
    }

    pub fn replay() -> Self {
        Self {
            source: SOURCE_REPLAY.to_string(),
            source_ip: None,
            signature: SignatureCheck::NotApplicable,
        }
    }

    fn audit_entry(&self, event_type: Option<String>, payload: JsonValue) -> NewWebhookAuditEntry {
        NewWebhookAuditEntry {
            source: self.source.clone(),
            event_type,
            source_ip: self.source_ip.clone(),
            signature: self.signature,
            payload,
        }
    }
}

/// What happened to a payload after it was accepted at the transport level.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Reconciled {
        audit_id: Uuid,
        order_id: Uuid,
        external_id: String,
        status: OrderStatus,
    },
    /// Recorded for inspection, deliberately not reconciled.
    Skipped {
        audit_id: Option<Uuid>,
        reason: String,
    },
    Failed {
        audit_id: Option<Uuid>,
        error: String,
    },
}

impl ProcessingOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingOutcome::Reconciled { .. } => "reconciled",
            ProcessingOutcome::Skipped { .. } => "skipped",
            ProcessingOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileResult {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub inserted: bool,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    stores: Stores,
}

impl ReconciliationEngine {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Audit, upsert the order, upsert its line items, then close the audit
    /// entry. A failed write leaves the entry `processed = false` with the
    /// error attached.
    pub async fn reconcile(
        &self,
        event: OrderEvent,
        raw_payload: JsonValue,
        delivery: &Delivery,
    ) -> ProcessingOutcome {
        let entry = match self
            .open_audit(delivery, Some(event.event_type.clone()), raw_payload.clone())
            .await
        {
            Ok(entry) => entry,
            Err(err) => {
                tracing::error!(external_id = %event.external_id, error = %err, "failed to write webhook audit entry");
                return ProcessingOutcome::Failed {
                    audit_id: None,
                    error: err.to_string(),
                };
            }
        };

        match self.apply(&event, raw_payload).await {
            Ok(result) => {
                if let Err(err) = self.stores.webhooks.mark_processed(entry.id).await {
                    tracing::error!(audit_id = %entry.id, error = %err, "failed to close webhook audit entry");
                }
                tracing::info!(
                    audit_id = %entry.id,
                    order_id = %result.order_id,
                    external_id = %event.external_id,
                    status = %result.status,
                    inserted = result.inserted,
                    "webhook reconciled"
                );
                ProcessingOutcome::Reconciled {
                    audit_id: entry.id,
                    order_id: result.order_id,
                    external_id: event.external_id,
                    status: result.status,
                }
            }
            Err(err) => {
                tracing::error!(
                    audit_id = %entry.id,
                    external_id = %event.external_id,
                    error = %err,
                    "webhook reconciliation failed"
                );
                if let Err(mark_err) = self.stores.webhooks.mark_failed(entry.id, &err.to_string()).await {
                    tracing::error!(audit_id = %entry.id, error = %mark_err, "failed to flag webhook audit entry");
                }
                ProcessingOutcome::Failed {
                    audit_id: Some(entry.id),
                    error: err.to_string(),
                }
            }
        }
    }

    /// Record a payload that will not be reconciled, with `reason` as the
    /// entry's error.
    pub async fn record_only(
        &self,
        raw_payload: JsonValue,
        event_type: Option<String>,
        delivery: &Delivery,
        reason: &str,
    ) -> ProcessingOutcome {
        let audit_id = match self.open_audit(delivery, event_type, raw_payload).await {
            Ok(entry) => {
                if let Err(err) = self.stores.webhooks.mark_failed(entry.id, reason).await {
                    tracing::error!(audit_id = %entry.id, error = %err, "failed to flag webhook audit entry");
                }
                Some(entry.id)
            }
            Err(err) => {
                tracing::error!(error = %err, reason, "failed to write webhook audit entry");
                None
            }
        };

        tracing::warn!(?audit_id, reason, "webhook recorded without reconciliation");
        ProcessingOutcome::Skipped {
            audit_id,
            reason: reason.to_string(),
        }
    }

    async fn open_audit(
        &self,
        delivery: &Delivery,
        event_type: Option<String>,
        payload: JsonValue,
    ) -> Result<WebhookAuditEntry, StoreError> {
        self.stores
            .webhooks
            .record_webhook(delivery.audit_entry(event_type, payload))
            .await
    }

    async fn apply(&self, event: &OrderEvent, raw_payload: JsonValue) -> Result<ReconcileResult, StoreError> {
        let status = map_status(event.raw_status.as_deref().unwrap_or_default());

        let upserted = self
            .stores
            .orders
            .upsert_order(order_upsert(event, status, raw_payload))
            .await?;

        if let Some(blocked) = upserted.blocked {
            tracing::warn!(
                order_id = %upserted.order.id,
                external_id = %event.external_id,
                from = %blocked.from,
                to = %blocked.to,
                "status regression blocked"
            );
        }

        let items = line_items(upserted.order.id, event);
        if !items.is_empty() {
            self.stores.orders.upsert_line_items(&items).await?;
        }

        Ok(ReconcileResult {
            order_id: upserted.order.id,
            status: upserted.order.status,
            inserted: upserted.inserted,
        })
    }
}

/// `metadata` keeps the payload exactly as received for forensic replay.
fn order_upsert(event: &OrderEvent, status: OrderStatus, raw_payload: JsonValue) -> OrderUpsert {
    OrderUpsert {
        external_id: event.external_id.clone(),
        customer: event.customer.clone(),
        subtotal: event.subtotal,
        discount: event.discount,
        total_amount: event.total_amount,
        payment_method: event.payment_method.clone(),
        status,
        tracking: event.tracking.to_json(),
        metadata: json!({
            "gateway": SOURCE_APPMAX,
            "event_type": event.event_type,
            "raw_status": event.raw_status,
            "raw_payload": raw_payload,
            "diagnostics": {},
        }),
    }
}

fn line_items(order_id: Uuid, event: &OrderEvent) -> Vec<LineItem> {
    event
        .line_items
        .iter()
        .enumerate()
        .map(|(position, item)| LineItem {
            order_id,
            product_id: item.product_id.clone(),
            product_name: item.name.clone(),
            unit_price: item.unit_price,
            quantity: item.quantity,
            role: item.role,
            position: position as i32,
        })
        .collect()
}
