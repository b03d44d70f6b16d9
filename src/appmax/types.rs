use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Body of `POST /orders/{id}/refund`
#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    pub reason: String,
}

/// Body of `POST /customer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCustomerRequest {
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub telephone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderProduct {
    pub sku: String,
    pub name: String,
    pub qty: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

/// Body of `POST /order`
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    pub customer_id: JsonValue,
    pub products: Vec<OrderProduct>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PixCart {
    pub order_id: JsonValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct PixCustomer {
    pub customer_id: JsonValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct PixDetails {
    pub document_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PixPayment {
    pub pix: PixDetails,
}

/// Body of `POST /payment/pix`
#[derive(Debug, Clone, Serialize)]
pub struct CreatePixPaymentRequest {
    pub cart: PixCart,
    pub customer: PixCustomer,
    pub payment: PixPayment,
}

/// Extract `data.id` (or a top-level `id`) from a v3 response, keeping the
/// JSON type the gateway used.
pub fn response_id(response: &JsonValue) -> Option<JsonValue> {
    response
        .pointer("/data/id")
        .or_else(|| response.get("id"))
        .filter(|id| id.is_string() || id.is_number())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_id_prefers_data_id() {
        assert_eq!(response_id(&json!({"data": {"id": 42}, "id": 1})), Some(json!(42)));
        assert_eq!(response_id(&json!({"id": "abc"})), Some(json!("abc")));
        assert_eq!(response_id(&json!({"data": {"id": null}})), None);
    }

    #[test]
    fn order_request_serializes_prices_as_numbers() {
        let body = CreateOrderRequest {
            customer_id: json!(7),
            products: vec![OrderProduct {
                sku: "SKU-1".to_string(),
                name: "Plano".to_string(),
                qty: 1,
                price: Decimal::new(4990, 2),
            }],
            total: Decimal::new(4990, 2),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["total"], json!(49.9));
        assert_eq!(value["products"][0]["price"], json!(49.9));
    }
}
