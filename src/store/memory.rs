//! In-memory implementation of the store traits for tests and local runs
//! without a database.
//!
//! A single mutex guards all tables, which gives the same uniqueness
//! guarantee the Postgres constraints give: two concurrent upserts for one
//! external id resolve to one row.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CartStore, OrderStore, RefundAuditStore, StoreError, WebhookAuditStore, REFUND_CLAIM_TTL_SECS,
};
use crate::models::{
    AbandonedCart, LineItem, NewRefundAuditEntry, NewWebhookAuditEntry, Order, OrderStatus,
    OrderUpsert, RefundAuditEntry, UpsertedOrder, WebhookAuditEntry, CART_STATUS_ABANDONED,
    CART_STATUS_RECOVERED,
};

#[derive(Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    by_external_id: HashMap<String, Uuid>,
    items: BTreeMap<(Uuid, String), LineItem>,
    webhooks: Vec<WebhookAuditEntry>,
    refunds: Vec<RefundAuditEntry>,
    carts: Vec<AbandonedCart>,
    refund_claims: HashMap<Uuid, DateTime<Utc>>,
    fail_order_writes: bool,
}

impl Tables {
    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_order_writes {
            return Err(StoreError::Unavailable("order writes disabled".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every order/line-item write fail until switched back.
    pub async fn set_order_writes_failing(&self, failing: bool) {
        self.tables.lock().await.fail_order_writes = failing;
    }

    pub async fn insert_order(&self, order: Order) {
        let mut tables = self.tables.lock().await;
        tables
            .by_external_id
            .insert(order.external_id.clone(), order.id);
        tables.orders.insert(order.id, order);
    }

    pub async fn insert_cart(&self, customer_email: &str, status: &str) -> Uuid {
        let now = Utc::now();
        let cart = AbandonedCart {
            id: Uuid::new_v4(),
            customer_email: customer_email.to_string(),
            customer_name: None,
            status: status.to_string(),
            recovered_order_id: None,
            created_at: now,
            updated_at: now,
        };
        let id = cart.id;
        self.tables.lock().await.carts.push(cart);
        id
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.tables.lock().await.orders.values().cloned().collect()
    }

    pub async fn webhook_entries(&self) -> Vec<WebhookAuditEntry> {
        self.tables.lock().await.webhooks.clone()
    }

    pub async fn refund_entries(&self) -> Vec<RefundAuditEntry> {
        self.tables.lock().await.refunds.clone()
    }

    pub async fn carts(&self) -> Vec<AbandonedCart> {
        self.tables.lock().await.carts.clone()
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn upsert_order(&self, upsert: OrderUpsert) -> Result<UpsertedOrder, StoreError> {
        let now = Utc::now();
        let mut tables = self.tables.lock().await;
        tables.check_writable()?;

        let existing = tables
            .by_external_id
            .get(&upsert.external_id)
            .and_then(|id| tables.orders.get(id))
            .cloned();

        let result = match existing {
            None => {
                let order = upsert.into_new_order(Uuid::new_v4(), now);
                tables
                    .by_external_id
                    .insert(order.external_id.clone(), order.id);
                UpsertedOrder {
                    order,
                    inserted: true,
                    blocked: None,
                }
            }
            Some(existing) => {
                let (order, blocked) = upsert.apply_to(&existing, now);
                UpsertedOrder {
                    order,
                    inserted: false,
                    blocked,
                }
            }
        };

        tables.orders.insert(result.order.id, result.order.clone());
        Ok(result)
    }

    async fn upsert_line_items(&self, items: &[LineItem]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_writable()?;
        for item in items {
            tables
                .items
                .insert((item.order_id, item.product_id.clone()), item.clone());
        }
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .by_external_id
            .get(external_id)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn line_items(&self, order_id: Uuid) -> Result<Vec<LineItem>, StoreError> {
        let tables = self.tables.lock().await;
        let mut items: Vec<LineItem> = tables
            .items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.position);
        Ok(items)
    }

    async fn claim_refund(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let refundable = tables
            .orders
            .get(&id)
            .is_some_and(|o| o.status != OrderStatus::Refunded);
        let now = Utc::now();
        let live = tables
            .refund_claims
            .get(&id)
            .is_some_and(|started| now - *started < Duration::seconds(REFUND_CLAIM_TTL_SECS));
        if !refundable || live {
            return Ok(false);
        }
        tables.refund_claims.insert(id, now);
        Ok(true)
    }

    async fn release_refund_claim(&self, id: Uuid) -> Result<(), StoreError> {
        self.tables.lock().await.refund_claims.remove(&id);
        Ok(())
    }

    async fn mark_refunded(&self, id: Uuid, reason: &str) -> Result<Order, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_writable()?;
        tables.refund_claims.remove(&id);
        let order = tables
            .orders
            .get_mut(&id)
            .filter(|o| o.status != OrderStatus::Refunded)
            .ok_or_else(|| StoreError::Conflict(format!("order {id} missing or already refunded")))?;
        let now = Utc::now();
        order.status = OrderStatus::Refunded;
        order.refund_reason = Some(reason.to_string());
        order.refunded_at = Some(now);
        order.updated_at = now;
        Ok(order.clone())
    }
}

#[async_trait]
impl WebhookAuditStore for InMemoryStore {
    async fn record_webhook(&self, entry: NewWebhookAuditEntry) -> Result<WebhookAuditEntry, StoreError> {
        let entry = entry.into_entry(Uuid::new_v4(), Utc::now());
        self.tables.lock().await.webhooks.push(entry.clone());
        Ok(entry)
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let entry = tables
            .webhooks
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("webhook {id}")))?;
        entry.processed = true;
        entry.success = true;
        entry.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let entry = tables
            .webhooks
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("webhook {id}")))?;
        entry.success = false;
        entry.error = Some(error.to_string());
        Ok(())
    }

    async fn get_webhook(&self, id: Uuid) -> Result<Option<WebhookAuditEntry>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .webhooks
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }
}

#[async_trait]
impl RefundAuditStore for InMemoryStore {
    async fn record_refund(&self, entry: NewRefundAuditEntry) -> Result<RefundAuditEntry, StoreError> {
        let entry = entry.into_entry(Uuid::new_v4(), Utc::now());
        self.tables.lock().await.refunds.push(entry.clone());
        Ok(entry)
    }

    async fn refunds_for_order(&self, order_id: Uuid) -> Result<Vec<RefundAuditEntry>, StoreError> {
        let tables = self.tables.lock().await;
        // Pushed in time order, so reversing yields newest first even when
        // two entries share a timestamp.
        Ok(tables
            .refunds
            .iter()
            .rev()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn revert_recovery(&self, customer_email: &str) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut touched = 0;
        for cart in tables.carts.iter_mut().filter(|c| {
            c.customer_email.eq_ignore_ascii_case(customer_email) && c.status == CART_STATUS_RECOVERED
        }) {
            cart.status = CART_STATUS_ABANDONED.to_string();
            cart.recovered_order_id = None;
            cart.updated_at = now;
            touched += 1;
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CustomerSnapshot;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::Arc;

    fn upsert(external_id: &str, status: OrderStatus) -> OrderUpsert {
        OrderUpsert {
            external_id: external_id.to_string(),
            customer: CustomerSnapshot {
                name: "Teste".to_string(),
                email: "teste@x.com".to_string(),
                phone: None,
                tax_id: None,
            },
            subtotal: Decimal::new(100, 0),
            discount: Decimal::ZERO,
            total_amount: Decimal::new(100, 0),
            payment_method: "pix".to_string(),
            status,
            tracking: json!({}),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn concurrent_upserts_for_one_external_id_create_one_row() {
        let store = Arc::new(InMemoryStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.upsert_order(upsert("DUP-1", OrderStatus::Approved)).await })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().inserted {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(store.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn revert_recovery_only_touches_recovered_carts_for_email() {
        let store = InMemoryStore::new();
        store.insert_cart("ana@example.com", CART_STATUS_RECOVERED).await;
        store.insert_cart("ANA@example.com", CART_STATUS_RECOVERED).await;
        store.insert_cart("ana@example.com", "expired").await;
        store.insert_cart("bia@example.com", CART_STATUS_RECOVERED).await;

        let touched = store.revert_recovery("ana@example.com").await.unwrap();
        assert_eq!(touched, 2);

        let carts = store.carts().await;
        let recovered = carts.iter().filter(|c| c.status == CART_STATUS_RECOVERED).count();
        assert_eq!(recovered, 1);
        assert!(carts.iter().any(|c| c.status == "expired"));
    }

    #[tokio::test]
    async fn failing_writes_leave_orders_untouched() {
        let store = InMemoryStore::new();
        let first = store.upsert_order(upsert("F-1", OrderStatus::Approved)).await.unwrap();

        store.set_order_writes_failing(true).await;
        assert!(store.mark_refunded(first.order.id, "x").await.is_err());
        store.set_order_writes_failing(false).await;

        let after = store.get_order(first.order.id).await.unwrap().unwrap();
        assert_eq!(after, first.order);
    }

    #[tokio::test]
    async fn refund_claim_is_exclusive_until_released() {
        let store = InMemoryStore::new();
        let order = store.upsert_order(upsert("C-1", OrderStatus::Approved)).await.unwrap().order;

        assert!(store.claim_refund(order.id).await.unwrap());
        assert!(!store.claim_refund(order.id).await.unwrap());

        store.release_refund_claim(order.id).await.unwrap();
        assert!(store.claim_refund(order.id).await.unwrap());

        store.mark_refunded(order.id, "x").await.unwrap();
        assert!(!store.claim_refund(order.id).await.unwrap());
        assert!(matches!(
            store.mark_refunded(order.id, "x").await,
            Err(StoreError::Conflict(_))
        ));
    }
}
