//! Admin-initiated refunds.
//!
//! Local state changes only after the gateway confirms the refund. Checks
//! run in a fixed order and the first failure wins.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::appmax::error::AppmaxError;
use crate::appmax::refund::RefundGateway;
use crate::auth::AdminSession;
use crate::models::{NewRefundAuditEntry, Order, OrderStatus, RefundAuditEntry};
use crate::reconcile::normalize::PLACEHOLDER_EMAIL;
use crate::store::Stores;

pub const DEFAULT_REFUND_REASON: &str = "Refund requested by admin";

#[derive(Error, Debug)]
pub enum RefundError {
    #[error("Admin session with an elevated role required")]
    Unauthorized,

    #[error("Order {0} not found")]
    NotFound(Uuid),

    #[error("Order {0} is already refunded or has a refund in progress")]
    AlreadyRefunded(Uuid),

    #[error("Gateway credentials are not configured")]
    ConfigError,

    #[error("Gateway refused the refund: {message}")]
    Appmax {
        status_code: Option<u16>,
        message: String,
    },

    /// The gateway refunded but the local order could not be updated.
    #[error("Refund confirmed by the gateway but the order could not be updated: {0}")]
    DbUpdate(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RefundError {
    pub fn code(&self) -> &'static str {
        match self {
            RefundError::Unauthorized => "UNAUTHORIZED",
            RefundError::NotFound(_) => "NOT_FOUND",
            RefundError::AlreadyRefunded(_) => "ALREADY_REFUNDED",
            RefundError::ConfigError => "CONFIG_ERROR",
            RefundError::Appmax { .. } => "APPMAX_ERROR",
            RefundError::DbUpdate(_) => "DB_UPDATE_ERROR",
            RefundError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether money may have moved at the gateway.
    pub fn gateway_refunded(&self) -> bool {
        matches!(self, RefundError::DbUpdate(_))
    }
}

impl From<AppmaxError> for RefundError {
    fn from(err: AppmaxError) -> Self {
        RefundError::Appmax {
            status_code: err.status_code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub order_id: Uuid,
    pub external_order_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
    pub success: bool,
    pub message: String,
    pub order: Order,
    pub gateway_response: JsonValue,
    pub carts_reverted: u64,
}

#[derive(Clone)]
pub struct RefundCoordinator {
    stores: Stores,
    gateway: Option<Arc<dyn RefundGateway>>,
}

impl RefundCoordinator {
    /// `gateway` is `None` when no credentials are configured.
    pub fn new(stores: Stores, gateway: Option<Arc<dyn RefundGateway>>) -> Self {
        Self { stores, gateway }
    }

    pub async fn refund(
        &self,
        actor: Option<&AdminSession>,
        request: RefundRequest,
    ) -> Result<RefundReceipt, RefundError> {
        let actor = actor.filter(|a| a.is_elevated()).ok_or(RefundError::Unauthorized)?;

        let order = self
            .stores
            .orders
            .get_order(request.order_id)
            .await
            .map_err(|e| RefundError::Internal(e.to_string()))?
            .filter(|o| o.external_id == request.external_order_id)
            .ok_or(RefundError::NotFound(request.order_id))?;

        if order.status == OrderStatus::Refunded {
            return Err(RefundError::AlreadyRefunded(order.id));
        }

        let gateway = self.gateway.as_ref().ok_or(RefundError::ConfigError)?;

        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REFUND_REASON)
            .to_string();

        // A concurrent request for the same order loses here, before the gateway
        let claimed = self
            .stores
            .orders
            .claim_refund(order.id)
            .await
            .map_err(|e| RefundError::Internal(e.to_string()))?;
        if !claimed {
            tracing::warn!(order_id = %order.id, "refund already claimed by another request");
            return Err(RefundError::AlreadyRefunded(order.id));
        }

        tracing::info!(
            order_id = %order.id,
            external_id = %order.external_id,
            actor = %actor.user_id,
            "requesting refund at gateway"
        );

        let gateway_response = match gateway.refund_order(&order.external_id, &reason).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(order_id = %order.id, error = %err, "gateway refund failed");
                if let Err(release_err) = self.stores.orders.release_refund_claim(order.id).await {
                    tracing::error!(order_id = %order.id, error = %release_err, "failed to release refund claim");
                }
                let detail = json!({ "status_code": err.status_code(), "message": err.to_string() });
                let err = RefundError::from(err);
                self.audit(&order, actor, &reason, Some(err.code()), detail).await;
                return Err(err);
            }
        };

        let refunded = match self.stores.orders.mark_refunded(order.id, &reason).await {
            Ok(order) => order,
            Err(err) => {
                tracing::error!(
                    order_id = %order.id,
                    external_id = %order.external_id,
                    error = %err,
                    "gateway refunded but local order update failed; manual reconciliation required"
                );
                // The claim is left to expire so retries cannot reach the gateway again meanwhile
                let err = RefundError::DbUpdate(err.to_string());
                self.audit(&order, actor, &reason, Some(err.code()), gateway_response).await;
                return Err(err);
            }
        };

        self.audit(&order, actor, &reason, None, gateway_response.clone()).await;
        let carts_reverted = self.revert_cart(&refunded).await;

        tracing::info!(order_id = %refunded.id, carts_reverted, "order refunded");

        Ok(RefundReceipt {
            success: true,
            message: format!("Order {} refunded", refunded.external_id),
            order: refunded,
            gateway_response,
            carts_reverted,
        })
    }

    /// Audit trail for one order, newest first.
    pub async fn history(&self, order_id: Uuid) -> Result<Vec<RefundAuditEntry>, RefundError> {
        self.stores
            .refunds
            .refunds_for_order(order_id)
            .await
            .map_err(|e| RefundError::Internal(e.to_string()))
    }

    async fn audit(
        &self,
        order: &Order,
        actor: &AdminSession,
        reason: &str,
        error_code: Option<&str>,
        gateway_response: JsonValue,
    ) {
        let entry = NewRefundAuditEntry {
            order_id: order.id,
            external_order_id: order.external_id.clone(),
            actor_id: actor.user_id.clone(),
            actor_email: actor.email.clone(),
            reason: reason.to_string(),
            amount: order.total_amount,
            success: error_code.is_none(),
            error_code: error_code.map(str::to_string),
            gateway_response,
        };
        if let Err(err) = self.stores.refunds.record_refund(entry).await {
            tracing::error!(order_id = %order.id, error = %err, "failed to write refund audit entry");
        }
    }

    async fn revert_cart(&self, order: &Order) -> u64 {
        if order.customer_email.eq_ignore_ascii_case(PLACEHOLDER_EMAIL) {
            return 0;
        }
        match self.stores.carts.revert_recovery(&order.customer_email).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(order_id = %order.id, error = %err, "failed to revert cart recovery");
                0
            }
        }
    }
}
