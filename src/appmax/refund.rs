use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::error::AppmaxError;
use super::types::RefundRequest;
use super::AppmaxClient;

/// Outbound refund call. Implemented by [`AppmaxClient`]; tests substitute a
/// scripted fake.
#[async_trait]
pub trait RefundGateway: Send + Sync {
    /// Returns the gateway's response body on success. Timeouts and network
    /// failures surface as `HttpError`, never as success.
    async fn refund_order(&self, external_order_id: &str, reason: &str) -> Result<JsonValue, AppmaxError>;
}

impl AppmaxClient {
    /// Refund an order at the gateway
    pub async fn refund_order(&self, external_order_id: &str, reason: &str) -> Result<JsonValue, AppmaxError> {
        let path = format!("/orders/{}/refund", external_order_id);
        let body = RefundRequest {
            reason: reason.to_string(),
        };
        self.post(&path, &body).await
    }
}

#[async_trait]
impl RefundGateway for AppmaxClient {
    async fn refund_order(&self, external_order_id: &str, reason: &str) -> Result<JsonValue, AppmaxError> {
        AppmaxClient::refund_order(self, external_order_id, reason).await
    }
}
