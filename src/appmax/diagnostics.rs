//! Operator-facing probes against the gateway. Nothing here reconciles
//! anything; synthetic webhooks go through the same ingestion entry point
//! as live traffic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use super::error::AppmaxError;
use super::types::{
    response_id, CreateCustomerRequest, CreateOrderRequest, CreatePixPaymentRequest, OrderProduct,
    PixCart, PixCustomer, PixDetails, PixPayment,
};
use super::AppmaxClient;

/// Overrides for the test checkout; every field has a harmless default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestCheckoutInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub telephone: Option<String>,
    pub document_number: Option<String>,
    pub product_name: Option<String>,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStep {
    pub step: &'static str,
    pub ok: bool,
    pub status_code: Option<u16>,
    /// Gateway body as received, or the transport error text.
    pub response: JsonValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCheckoutReport {
    pub success: bool,
    pub customer_id: Option<JsonValue>,
    pub order_id: Option<JsonValue>,
    pub steps: Vec<CheckoutStep>,
}

impl AppmaxClient {
    /// Run create-customer, create-order and create-pix-payment in sequence,
    /// feeding each returned id into the next call. Stops at the first
    /// failing step.
    pub async fn test_checkout(&self, input: TestCheckoutInput) -> TestCheckoutReport {
        let name = input.name.unwrap_or_else(|| "Teste Diagnostico".to_string());
        let (firstname, lastname) = match name.split_once(' ') {
            Some((first, last)) => (first.to_string(), last.to_string()),
            None => (name.clone(), "-".to_string()),
        };
        let amount = input.amount.unwrap_or_else(|| Decimal::new(100, 2));

        let mut report = TestCheckoutReport {
            success: false,
            customer_id: None,
            order_id: None,
            steps: Vec::new(),
        };

        let customer = CreateCustomerRequest {
            firstname,
            lastname,
            email: input.email.unwrap_or_else(|| "diagnostico@example.com".to_string()),
            telephone: input.telephone.unwrap_or_else(|| "11999999999".to_string()),
            ip: None,
        };
        let Some(customer_id) = self.run_step(&mut report, "create_customer", "/customer", &customer).await else {
            return report;
        };
        report.customer_id = Some(customer_id.clone());

        let order = CreateOrderRequest {
            customer_id: customer_id.clone(),
            products: vec![OrderProduct {
                sku: "DIAG-001".to_string(),
                name: input.product_name.unwrap_or_else(|| "Produto diagnostico".to_string()),
                qty: 1,
                price: amount,
            }],
            total: amount,
        };
        let Some(order_id) = self.run_step(&mut report, "create_order", "/order", &order).await else {
            return report;
        };
        report.order_id = Some(order_id.clone());

        let payment = CreatePixPaymentRequest {
            cart: PixCart { order_id },
            customer: PixCustomer { customer_id },
            payment: PixPayment {
                pix: PixDetails {
                    document_number: input.document_number.unwrap_or_else(|| "00000000000".to_string()),
                },
            },
        };
        self.run_step(&mut report, "create_pix_payment", "/payment/pix", &payment)
            .await;
        report.success = report.steps.last().map(|s| s.ok).unwrap_or(false);
        report
    }

    /// Returns the id carried by the response, if the step succeeded.
    async fn run_step<B: Serialize>(
        &self,
        report: &mut TestCheckoutReport,
        step: &'static str,
        path: &str,
        body: &B,
    ) -> Option<JsonValue> {
        match self.post::<JsonValue, B>(path, body).await {
            Ok(response) => {
                let id = response_id(&response);
                report.steps.push(CheckoutStep {
                    step,
                    ok: true,
                    status_code: None,
                    response,
                });
                if id.is_none() {
                    tracing::warn!(step, "gateway response carried no id");
                }
                id
            }
            Err(err) => {
                tracing::warn!(step, error = %err, "test checkout step failed");
                report.steps.push(failed_step(step, err));
                None
            }
        }
    }
}

fn failed_step(step: &'static str, err: AppmaxError) -> CheckoutStep {
    let status_code = err.status_code();
    let response = match err {
        AppmaxError::ApiError { message, .. } => {
            serde_json::from_str(&message).unwrap_or(JsonValue::String(message))
        }
        other => JsonValue::String(other.to_string()),
    };
    CheckoutStep {
        step,
        ok: false,
        status_code,
        response,
    }
}

/// Synthetic order-approved payload for the webhook diagnostic.
pub fn synthetic_order_payload(external_id: &str, amount: Decimal, email: &str) -> JsonValue {
    json!({
        "event": "order.approved",
        "order_id": external_id,
        "amount": amount.to_string(),
        "payment_method": "pix",
        "status": "approved",
        "customer": {
            "name": "Teste Diagnostico",
            "email": email,
        },
        "products": [
            { "sku": "DIAG-001", "name": "Produto diagnostico", "price": amount.to_string(), "qty": 1 }
        ],
        "diagnostic": true,
    })
}
