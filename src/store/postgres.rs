use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    CartStore, OrderStore, RefundAuditStore, StoreError, WebhookAuditStore, REFUND_CLAIM_TTL_SECS,
};
use crate::models::{
    ItemRole, LineItem, NewRefundAuditEntry, NewWebhookAuditEntry, Order, OrderUpsert,
    RefundAuditEntry, UpsertedOrder, WebhookAuditEntry, CART_STATUS_ABANDONED,
    CART_STATUS_RECOVERED,
};

const ORDER_COLUMNS: &str = r#"
    id, external_id, customer_name, customer_email, customer_phone, customer_tax_id,
    subtotal, discount, total_amount, payment_method, status, paid_at,
    refund_reason, refunded_at, tracking, metadata, created_at, updated_at
"#;

const WEBHOOK_COLUMNS: &str = r#"
    id, source, event_type, source_ip, signature, payload, processed, success,
    error, created_at, processed_at
"#;

const REFUND_COLUMNS: &str = r#"
    id, order_id, external_order_id, actor_id, actor_email, reason, amount,
    success, error_code, gateway_response, created_at
"#;

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct LineItemRow {
    order_id: Uuid,
    product_id: String,
    product_name: String,
    unit_price: Decimal,
    quantity: i32,
    role: String,
    position: i32,
}

impl From<LineItemRow> for LineItem {
    fn from(row: LineItemRow) -> Self {
        LineItem {
            order_id: row.order_id,
            product_id: row.product_id,
            product_name: row.product_name,
            unit_price: row.unit_price,
            quantity: row.quantity,
            role: ItemRole::parse(&row.role).unwrap_or(ItemRole::Addon),
            position: row.position,
        }
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn upsert_order(&self, upsert: OrderUpsert) -> Result<UpsertedOrder, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // The unique constraint on external_id decides who inserts; a
        // concurrent loser blocks here until the winner commits.
        let candidate = upsert.clone().into_new_order(Uuid::new_v4(), now);
        let inserted = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders (
                id, external_id, customer_name, customer_email, customer_phone, customer_tax_id,
                subtotal, discount, total_amount, payment_method, status, paid_at,
                tracking, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(candidate.id)
        .bind(&candidate.external_id)
        .bind(&candidate.customer_name)
        .bind(&candidate.customer_email)
        .bind(&candidate.customer_phone)
        .bind(&candidate.customer_tax_id)
        .bind(candidate.subtotal)
        .bind(candidate.discount)
        .bind(candidate.total_amount)
        .bind(&candidate.payment_method)
        .bind(candidate.status)
        .bind(candidate.paid_at)
        .bind(&candidate.tracking)
        .bind(&candidate.metadata)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(order) = inserted {
            tx.commit().await?;
            return Ok(UpsertedOrder {
                order,
                inserted: true,
                blocked: None,
            });
        }

        let existing = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE external_id = $1 FOR UPDATE"
        ))
        .bind(&upsert.external_id)
        .fetch_one(&mut *tx)
        .await?;

        let (merged, blocked) = upsert.apply_to(&existing, now);

        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET customer_name = $2, customer_email = $3, customer_phone = $4,
                customer_tax_id = $5, subtotal = $6, discount = $7, total_amount = $8,
                payment_method = $9, status = $10, paid_at = $11, tracking = $12,
                metadata = $13, updated_at = $14
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(merged.id)
        .bind(&merged.customer_name)
        .bind(&merged.customer_email)
        .bind(&merged.customer_phone)
        .bind(&merged.customer_tax_id)
        .bind(merged.subtotal)
        .bind(merged.discount)
        .bind(merged.total_amount)
        .bind(&merged.payment_method)
        .bind(merged.status)
        .bind(merged.paid_at)
        .bind(&merged.tracking)
        .bind(&merged.metadata)
        .bind(merged.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(UpsertedOrder {
            order,
            inserted: false,
            blocked,
        })
    }

    async fn upsert_line_items(&self, items: &[LineItem]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    order_id, product_id, product_name, unit_price, quantity, role, position,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
                ON CONFLICT (order_id, product_id)
                DO UPDATE SET
                    product_name = EXCLUDED.product_name,
                    unit_price = EXCLUDED.unit_price,
                    quantity = EXCLUDED.quantity,
                    role = EXCLUDED.role,
                    position = EXCLUDED.position,
                    updated_at = NOW()
                "#,
            )
            .bind(item.order_id)
            .bind(&item.product_id)
            .bind(&item.product_name)
            .bind(item.unit_price)
            .bind(item.quantity)
            .bind(item.role.as_str())
            .bind(item.position)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn line_items(&self, order_id: Uuid) -> Result<Vec<LineItem>, StoreError> {
        let rows = sqlx::query_as::<_, LineItemRow>(
            r#"
            SELECT order_id, product_id, product_name, unit_price, quantity, role, position
            FROM order_items
            WHERE order_id = $1
            ORDER BY position
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LineItem::from).collect())
    }

    async fn claim_refund(&self, id: Uuid) -> Result<bool, StoreError> {
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET refund_started_at = NOW()
            WHERE id = $1
              AND status <> 'refunded'
              AND (refund_started_at IS NULL
                   OR refund_started_at < NOW() - make_interval(secs => $2))
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(REFUND_CLAIM_TTL_SECS as f64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(claimed.is_some())
    }

    async fn release_refund_claim(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET refund_started_at = NULL WHERE id = $1 AND status <> 'refunded'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_refunded(&self, id: Uuid, reason: &str) -> Result<Order, StoreError> {
        sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET status = 'refunded', refund_reason = $2, refunded_at = NOW(),
                refund_started_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status <> 'refunded'
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::Conflict(format!("order {id} missing or already refunded")))
    }
}

#[async_trait]
impl WebhookAuditStore for PgStore {
    async fn record_webhook(&self, entry: NewWebhookAuditEntry) -> Result<WebhookAuditEntry, StoreError> {
        let entry = sqlx::query_as::<_, WebhookAuditEntry>(&format!(
            r#"
            INSERT INTO webhook_audit_log (
                id, source, event_type, source_ip, signature, payload, processed, success, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, FALSE, NOW())
            RETURNING {WEBHOOK_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&entry.source)
        .bind(&entry.event_type)
        .bind(&entry.source_ip)
        .bind(entry.signature.as_str())
        .bind(&entry.payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_audit_log
            SET processed = TRUE, success = TRUE, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_audit_log
            SET success = FALSE, error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_webhook(&self, id: Uuid) -> Result<Option<WebhookAuditEntry>, StoreError> {
        let entry = sqlx::query_as::<_, WebhookAuditEntry>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhook_audit_log WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }
}

#[async_trait]
impl RefundAuditStore for PgStore {
    async fn record_refund(&self, entry: NewRefundAuditEntry) -> Result<RefundAuditEntry, StoreError> {
        let entry = sqlx::query_as::<_, RefundAuditEntry>(&format!(
            r#"
            INSERT INTO refund_audit_log (
                id, order_id, external_order_id, actor_id, actor_email, reason, amount,
                success, error_code, gateway_response, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            RETURNING {REFUND_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(entry.order_id)
        .bind(&entry.external_order_id)
        .bind(&entry.actor_id)
        .bind(&entry.actor_email)
        .bind(&entry.reason)
        .bind(entry.amount)
        .bind(entry.success)
        .bind(&entry.error_code)
        .bind(&entry.gateway_response)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn refunds_for_order(&self, order_id: Uuid) -> Result<Vec<RefundAuditEntry>, StoreError> {
        let entries = sqlx::query_as::<_, RefundAuditEntry>(&format!(
            r#"
            SELECT {REFUND_COLUMNS}
            FROM refund_audit_log
            WHERE order_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn revert_recovery(&self, customer_email: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE abandoned_carts
            SET status = $2, recovered_order_id = NULL, updated_at = NOW()
            WHERE LOWER(customer_email) = LOWER($1) AND status = $3
            "#,
        )
        .bind(customer_email)
        .bind(CART_STATUS_ABANDONED)
        .bind(CART_STATUS_RECOVERED)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
