//! Persistence seams for the reconciliation and refund paths.
//!
//! Every component receives the narrow store it needs through
//! [`Stores`]; nothing reaches for a global client. Postgres backs
//! production, [`memory::InMemoryStore`] backs tests and database-less runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    LineItem, NewRefundAuditEntry, NewWebhookAuditEntry, Order, OrderUpsert, RefundAuditEntry,
    UpsertedOrder, WebhookAuditEntry,
};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// A refund claim older than this is treated as abandoned and may be taken
/// over. Comfortably above the gateway call timeout.
pub const REFUND_CLAIM_TTL_SECS: i64 = 300;

/// Orders and their line items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert-or-update keyed by `external_id`. Must be atomic with respect to
    /// concurrent calls for the same key.
    async fn upsert_order(&self, upsert: OrderUpsert) -> Result<UpsertedOrder, StoreError>;

    /// Insert-or-update keyed by `(order_id, product_id)`.
    async fn upsert_line_items(&self, items: &[LineItem]) -> Result<(), StoreError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Order>, StoreError>;

    async fn line_items(&self, order_id: Uuid) -> Result<Vec<LineItem>, StoreError>;

    /// Atomically reserve the order for one refund attempt. `false` when the
    /// order is already refunded or another live claim holds it.
    async fn claim_refund(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Drop a claim whose attempt did not move money.
    async fn release_refund_claim(&self, id: Uuid) -> Result<(), StoreError>;

    /// Fails with `Conflict` if the order is already refunded.
    async fn mark_refunded(&self, id: Uuid, reason: &str) -> Result<Order, StoreError>;
}

/// Append-only ledger of inbound webhooks.
#[async_trait]
pub trait WebhookAuditStore: Send + Sync {
    async fn record_webhook(&self, entry: NewWebhookAuditEntry) -> Result<WebhookAuditEntry, StoreError>;

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError>;

    /// Leaves `processed = false`; only the error text is attached.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError>;

    async fn get_webhook(&self, id: Uuid) -> Result<Option<WebhookAuditEntry>, StoreError>;
}

#[async_trait]
pub trait RefundAuditStore: Send + Sync {
    async fn record_refund(&self, entry: NewRefundAuditEntry) -> Result<RefundAuditEntry, StoreError>;

    /// Newest first.
    async fn refunds_for_order(&self, order_id: Uuid) -> Result<Vec<RefundAuditEntry>, StoreError>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// Flip `recovered` carts for this email back to `abandoned`. Returns the
    /// number of carts touched.
    async fn revert_recovery(&self, customer_email: &str) -> Result<u64, StoreError>;
}

/// The set of stores handed to the pipeline and the refund coordinator.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub webhooks: Arc<dyn WebhookAuditStore>,
    pub refunds: Arc<dyn RefundAuditStore>,
    pub carts: Arc<dyn CartStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: OrderStore + WebhookAuditStore + RefundAuditStore + CartStore + 'static,
    {
        Self {
            orders: store.clone(),
            webhooks: store.clone(),
            refunds: store.clone(),
            carts: store,
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::shared(Arc::new(PgStore::new(pool)))
    }
}
