use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;
use uuid::Uuid;

/// Canonical order status. `Refunded` and `Refused` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Approved,
    Refunded,
    Refused,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Approved => "approved",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Refused => "refused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Refunded | OrderStatus::Refused)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order ("sale") aggregate, keyed externally by the gateway order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub external_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub customer_tax_id: Option<String>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub payment_method: String,
    pub status: OrderStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub tracking: JsonValue,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Customer snapshot captured at event time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub tax_id: Option<String>,
}

/// Write model for the order upsert, built from a normalized event.
#[derive(Debug, Clone)]
pub struct OrderUpsert {
    pub external_id: String,
    pub customer: CustomerSnapshot,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub payment_method: String,
    pub status: OrderStatus,
    pub tracking: JsonValue,
    pub metadata: JsonValue,
}

/// A status change the monotonic guard refused to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockedTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Result of an order upsert at the store layer.
#[derive(Debug, Clone)]
pub struct UpsertedOrder {
    pub order: Order,
    pub inserted: bool,
    pub blocked: Option<BlockedTransition>,
}

impl OrderUpsert {
    /// Build the row for a first-seen external id.
    pub fn into_new_order(self, id: Uuid, now: DateTime<Utc>) -> Order {
        let paid_at = (self.status == OrderStatus::Approved).then_some(now);
        Order {
            id,
            external_id: self.external_id,
            customer_name: self.customer.name,
            customer_email: self.customer.email,
            customer_phone: self.customer.phone,
            customer_tax_id: self.customer.tax_id,
            subtotal: self.subtotal,
            discount: self.discount,
            total_amount: self.total_amount,
            payment_method: self.payment_method,
            status: self.status,
            paid_at,
            refund_reason: None,
            refunded_at: None,
            tracking: self.tracking,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold this event into an existing row. Every mutable field is replaced
    /// except `status`, which only moves forward.
    pub fn apply_to(&self, existing: &Order, now: DateTime<Utc>) -> (Order, Option<BlockedTransition>) {
        let status = existing.status.advance(self.status);
        let blocked = (status != self.status).then_some(BlockedTransition {
            from: existing.status,
            to: self.status,
        });

        let paid_at = if status == OrderStatus::Approved && self.status == OrderStatus::Approved {
            Some(now)
        } else {
            existing.paid_at
        };

        let mut metadata = self.metadata.clone();
        if let Some(obj) = metadata.as_object_mut() {
            let diagnostics = obj
                .entry("diagnostics")
                .or_insert_with(|| json!({}));
            if let Some(diag) = diagnostics.as_object_mut() {
                // Diagnostics accumulate across deliveries
                if let Some(previous) = existing.metadata["diagnostics"].as_object() {
                    for (key, value) in previous {
                        diag.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
                if let Some(blocked) = blocked {
                    diag.insert(
                        "blocked_transition".to_string(),
                        json!({ "from": blocked.from, "to": blocked.to }),
                    );
                }
            }
        }

        let order = Order {
            id: existing.id,
            external_id: existing.external_id.clone(),
            customer_name: self.customer.name.clone(),
            customer_email: self.customer.email.clone(),
            customer_phone: self.customer.phone.clone(),
            customer_tax_id: self.customer.tax_id.clone(),
            subtotal: self.subtotal,
            discount: self.discount,
            total_amount: self.total_amount,
            payment_method: self.payment_method.clone(),
            status,
            paid_at,
            refund_reason: existing.refund_reason.clone(),
            refunded_at: existing.refunded_at,
            tracking: self.tracking.clone(),
            metadata,
            created_at: existing.created_at,
            updated_at: now,
        };

        (order, blocked)
    }
}

/// Position-derived role of a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    Primary,
    Addon,
}

impl ItemRole {
    pub fn for_position(position: usize) -> Self {
        if position == 0 {
            ItemRole::Primary
        } else {
            ItemRole::Addon
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemRole::Primary => "primary",
            ItemRole::Addon => "addon",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(ItemRole::Primary),
            "addon" => Some(ItemRole::Addon),
            _ => None,
        }
    }
}

/// Line item owned by one order, identified by (order_id, product_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub order_id: Uuid,
    pub product_id: String,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub role: ItemRole,
    pub position: i32,
}

/// Trust level attached to an inbound webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureCheck {
    Valid,
    Invalid,
    Skipped,
    /// Internally produced payloads (replay).
    NotApplicable,
}

impl SignatureCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureCheck::Valid => "valid",
            SignatureCheck::Invalid => "invalid",
            SignatureCheck::Skipped => "skipped",
            SignatureCheck::NotApplicable => "not_applicable",
        }
    }
}

/// Append-only record of one inbound webhook request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookAuditEntry {
    pub id: Uuid,
    pub source: String,
    pub event_type: Option<String>,
    pub source_ip: Option<String>,
    pub signature: String,
    pub payload: JsonValue,
    pub processed: bool,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookAuditEntry {
    pub source: String,
    pub event_type: Option<String>,
    pub source_ip: Option<String>,
    pub signature: SignatureCheck,
    pub payload: JsonValue,
}

impl NewWebhookAuditEntry {
    pub fn into_entry(self, id: Uuid, now: DateTime<Utc>) -> WebhookAuditEntry {
        WebhookAuditEntry {
            id,
            source: self.source,
            event_type: self.event_type,
            source_ip: self.source_ip,
            signature: self.signature.as_str().to_string(),
            payload: self.payload,
            processed: false,
            success: false,
            error: None,
            created_at: now,
            processed_at: None,
        }
    }
}

/// Record of an admin-initiated refund attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RefundAuditEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub external_order_id: String,
    pub actor_id: String,
    pub actor_email: Option<String>,
    pub reason: String,
    pub amount: Decimal,
    pub success: bool,
    pub error_code: Option<String>,
    pub gateway_response: JsonValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRefundAuditEntry {
    pub order_id: Uuid,
    pub external_order_id: String,
    pub actor_id: String,
    pub actor_email: Option<String>,
    pub reason: String,
    pub amount: Decimal,
    pub success: bool,
    pub error_code: Option<String>,
    pub gateway_response: JsonValue,
}

impl NewRefundAuditEntry {
    pub fn into_entry(self, id: Uuid, now: DateTime<Utc>) -> RefundAuditEntry {
        RefundAuditEntry {
            id,
            order_id: self.order_id,
            external_order_id: self.external_order_id,
            actor_id: self.actor_id,
            actor_email: self.actor_email,
            reason: self.reason,
            amount: self.amount,
            success: self.success,
            error_code: self.error_code,
            gateway_response: self.gateway_response,
            created_at: now,
        }
    }
}

/// Abandoned checkout, touched here only to flip recovery attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AbandonedCart {
    pub id: Uuid,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub status: String,
    pub recovered_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const CART_STATUS_ABANDONED: &str = "abandoned";
pub const CART_STATUS_RECOVERED: &str = "recovered";

/// Standard error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
