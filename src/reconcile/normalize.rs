//! Canonical event extraction from Appmax payloads.
//!
//! Payload shape drifts between event types: the order may sit under
//! `data.order`, `data`, `order` or at the top level, and most fields have
//! several aliases. Each field is resolved by an ordered rule list where the
//! first present value wins, so every alias is visible in one place.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::str::FromStr;
use thiserror::Error;

use crate::models::{CustomerSnapshot, ItemRole};

pub const UNKNOWN_CUSTOMER_NAME: &str = "Unknown customer";
pub const PLACEHOLDER_EMAIL: &str = "unknown-customer@placeholder.invalid";
pub const DEFAULT_PAYMENT_METHOD: &str = "credit_card";
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// Candidate locations of the order object, closest first.
const ORDER_SCOPES: &[&str] = &["/data/order", "/data", "/order", ""];

#[derive(Debug, Clone, Copy)]
enum Rule {
    /// Absolute JSON pointer into the payload.
    At(&'static str),
    /// Key looked up in each order scope in turn.
    Scoped(&'static str),
}

use Rule::{At, Scoped};

const EXTERNAL_ID: &[Rule] = &[
    At("/data/order/id"),
    At("/data/id"),
    At("/order/id"),
    Scoped("order_id"),
    At("/id"),
];
const EVENT_TYPE: &[Rule] = &[At("/event"), At("/type"), At("/event_type"), At("/data/event")];
const RAW_STATUS: &[Rule] = &[Scoped("status"), Scoped("order_status"), Scoped("payment_status")];
const TOTAL_AMOUNT: &[Rule] = &[
    Scoped("total"),
    Scoped("total_amount"),
    Scoped("amount"),
    Scoped("total_products"),
    Scoped("value"),
];
const DISCOUNT: &[Rule] = &[Scoped("discount"), Scoped("discount_amount"), Scoped("discount_value")];
const SUBTOTAL: &[Rule] = &[Scoped("subtotal"), Scoped("sub_total")];
const PAYMENT_METHOD: &[Rule] = &[
    Scoped("payment_method"),
    Scoped("payment_type"),
    At("/data/payment/method"),
    At("/payment/method"),
];
const LINE_ITEMS: &[Rule] = &[
    Scoped("products"),
    Scoped("items"),
    Scoped("line_items"),
    Scoped("bundles"),
];

const CUSTOMER: &[Rule] = &[Scoped("customer"), Scoped("client"), Scoped("buyer")];
const CUSTOMER_NAME: &[&str] = &["name", "full_name", "fullname"];
const CUSTOMER_FIRST_NAME: &[&str] = &["firstname", "first_name"];
const CUSTOMER_LAST_NAME: &[&str] = &["lastname", "last_name"];
const CUSTOMER_EMAIL: &[&str] = &["email", "mail"];
const CUSTOMER_PHONE: &[&str] = &["telephone", "phone", "cellphone", "mobile"];
const CUSTOMER_TAX_ID: &[&str] = &["document_number", "cpf", "cnpj", "document", "tax_id"];
const FLAT_CUSTOMER_NAME: &[Rule] = &[Scoped("customer_name")];
const FLAT_CUSTOMER_EMAIL: &[Rule] = &[Scoped("customer_email")];
const FLAT_CUSTOMER_PHONE: &[Rule] = &[Scoped("customer_phone")];
const FLAT_CUSTOMER_TAX_ID: &[Rule] = &[Scoped("customer_document")];

const ITEM_ID: &[&str] = &["product_id", "id", "sku"];
const ITEM_NAME: &[&str] = &["name", "title", "product_name"];
const ITEM_PRICE: &[&str] = &["price", "unit_price", "value", "amount"];
const ITEM_QUANTITY: &[&str] = &["quantity", "qty"];

const TRACKING: &[Rule] = &[Scoped("tracking"), Scoped("utm"), Scoped("utms")];
const TRACKING_KEYS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    "src",
    "sck",
];

/// Event-name suffixes that are not gateway status words themselves.
const EVENT_STATUS_ALIASES: &[(&str, &str)] = &[
    ("refund", "refunded"),
    ("cancel", "canceled"),
    ("cancelled", "canceled"),
    ("approve", "approved"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("payload carries no order id")]
    MissingId,
}

impl NormalizeError {
    pub fn code(&self) -> &'static str {
        match self {
            NormalizeError::MissingId => "MISSING_ID",
        }
    }
}

/// Canonical view of one gateway notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderEvent {
    pub external_id: String,
    pub customer: CustomerSnapshot,
    pub raw_status: Option<String>,
    pub subtotal: Decimal,
    pub total_amount: Decimal,
    pub discount: Decimal,
    pub payment_method: String,
    pub line_items: Vec<EventLineItem>,
    pub tracking: TrackingAttribution,
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLineItem {
    pub product_id: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub role: ItemRole,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackingAttribution(pub Map<String, JsonValue>);

impl TrackingAttribution {
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.0.clone())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }
}

/// Extract an `OrderEvent` from an arbitrary payload.
///
/// Only a missing order id is fatal; every other gap degrades to a default.
pub fn normalize(payload: &JsonValue) -> Result<OrderEvent, NormalizeError> {
    let external_id = lookup(payload, EXTERNAL_ID, is_text)
        .and_then(coerce_string)
        .ok_or(NormalizeError::MissingId)?;

    let event_type = event_type(payload).unwrap_or_else(|| UNKNOWN_EVENT_TYPE.to_string());

    let raw_status = lookup(payload, RAW_STATUS, is_text)
        .and_then(coerce_string)
        .or_else(|| status_from_event_type(&event_type));

    let total_amount = first_decimal(payload, TOTAL_AMOUNT).unwrap_or(Decimal::ZERO);
    let discount = first_decimal(payload, DISCOUNT).unwrap_or(Decimal::ZERO);
    let subtotal = first_decimal(payload, SUBTOTAL).unwrap_or(total_amount + discount);

    let payment_method = lookup(payload, PAYMENT_METHOD, is_text)
        .and_then(coerce_string)
        .map(|m| m.to_lowercase())
        .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string());

    let line_items = lookup(payload, LINE_ITEMS, JsonValue::is_array)
        .and_then(JsonValue::as_array)
        .map(|items| merge_repeated_products(items.iter().enumerate().map(|(i, item)| line_item(i, item))))
        .unwrap_or_default();

    Ok(OrderEvent {
        external_id,
        customer: customer(payload),
        raw_status,
        subtotal,
        total_amount,
        discount,
        payment_method,
        line_items,
        tracking: tracking(payload),
        event_type,
    })
}

/// Best-effort event type, also used for audit entries of unparseable events.
pub fn event_type(payload: &JsonValue) -> Option<String> {
    lookup(payload, EVENT_TYPE, is_text).and_then(coerce_string)
}

fn customer(payload: &JsonValue) -> CustomerSnapshot {
    let object = lookup(payload, CUSTOMER, JsonValue::is_object);
    let field = |keys: &[&str]| object.and_then(|o| first_key(o, keys, is_text)).and_then(coerce_string);

    let name = field(CUSTOMER_NAME)
        .or_else(|| {
            let first = field(CUSTOMER_FIRST_NAME);
            let last = field(CUSTOMER_LAST_NAME);
            match (first, last) {
                (Some(f), Some(l)) => Some(format!("{f} {l}")),
                (f, l) => f.or(l),
            }
        })
        .or_else(|| lookup(payload, FLAT_CUSTOMER_NAME, is_text).and_then(coerce_string))
        .unwrap_or_else(|| UNKNOWN_CUSTOMER_NAME.to_string());

    let email = field(CUSTOMER_EMAIL)
        .or_else(|| lookup(payload, FLAT_CUSTOMER_EMAIL, is_text).and_then(coerce_string))
        .map(|e| e.to_lowercase())
        .unwrap_or_else(|| PLACEHOLDER_EMAIL.to_string());

    let phone = field(CUSTOMER_PHONE)
        .or_else(|| lookup(payload, FLAT_CUSTOMER_PHONE, is_text).and_then(coerce_string));
    let tax_id = field(CUSTOMER_TAX_ID)
        .or_else(|| lookup(payload, FLAT_CUSTOMER_TAX_ID, is_text).and_then(coerce_string));

    CustomerSnapshot {
        name,
        email,
        phone,
        tax_id,
    }
}

fn line_item(position: usize, item: &JsonValue) -> EventLineItem {
    let name = first_key(item, ITEM_NAME, is_text).and_then(coerce_string);
    let product_id = first_key(item, ITEM_ID, is_text)
        .and_then(coerce_string)
        .or_else(|| name.clone())
        .unwrap_or_else(|| format!("item-{}", position + 1));

    EventLineItem {
        name: name.unwrap_or_else(|| product_id.clone()),
        product_id,
        unit_price: first_key(item, ITEM_PRICE, is_numeric_like)
            .and_then(parse_decimal)
            .unwrap_or(Decimal::ZERO),
        quantity: first_key(item, ITEM_QUANTITY, is_quantity)
            .and_then(parse_quantity)
            .unwrap_or(1),
        role: ItemRole::for_position(position),
    }
}

/// One row per product id. A repeated product adds its quantity to the first
/// occurrence, which keeps its position, price and role.
fn merge_repeated_products(items: impl Iterator<Item = EventLineItem>) -> Vec<EventLineItem> {
    let mut merged: Vec<EventLineItem> = Vec::new();
    for item in items {
        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(first) => first.quantity = first.quantity.saturating_add(item.quantity),
            None => merged.push(item),
        }
    }
    merged
}

fn tracking(payload: &JsonValue) -> TrackingAttribution {
    let object = lookup(payload, TRACKING, JsonValue::is_object);
    let mut map = Map::new();
    for key in TRACKING_KEYS {
        let value = object
            .and_then(|o| o.get(*key))
            .filter(|v| is_text(v))
            .or_else(|| lookup(payload, &[Scoped(*key)], is_text));
        if let Some(v) = value.and_then(coerce_string) {
            map.insert((*key).to_string(), JsonValue::String(v));
        }
    }
    TrackingAttribution(map)
}

/// Derive a status word from the event name: `order.approved` → `approved`,
/// `OrderPaid` → `paid`, `PaymentNotAuthorized` → `payment_not_authorized`.
fn status_from_event_type(event_type: &str) -> Option<String> {
    if event_type == UNKNOWN_EVENT_TYPE {
        return None;
    }
    let tail = event_type.rsplit('.').next().unwrap_or(event_type);
    let snake = to_snake_case(tail);
    let word = snake.strip_prefix("order_").unwrap_or(&snake).to_string();
    if word.is_empty() {
        return None;
    }
    let word = EVENT_STATUS_ALIASES
        .iter()
        .find(|(alias, _)| *alias == word)
        .map(|(_, status)| status.to_string())
        .unwrap_or(word);
    Some(word)
}

fn to_snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for (i, ch) in input.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '-' || ch == ' ' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}

fn lookup<'a>(
    payload: &'a JsonValue,
    rules: &[Rule],
    accept: fn(&JsonValue) -> bool,
) -> Option<&'a JsonValue> {
    rules.iter().find_map(|rule| match rule {
        At(pointer) => payload.pointer(pointer).filter(|v| accept(v)),
        Scoped(key) => ORDER_SCOPES.iter().find_map(|scope| {
            let base = if scope.is_empty() {
                Some(payload)
            } else {
                payload.pointer(scope)
            };
            base.filter(|b| b.is_object())
                .and_then(|b| b.get(*key))
                .filter(|v| accept(v))
        }),
    })
}

fn first_key<'a>(
    object: &'a JsonValue,
    keys: &[&str],
    accept: fn(&JsonValue) -> bool,
) -> Option<&'a JsonValue> {
    keys.iter()
        .find_map(|key| object.get(*key).filter(|v| accept(v)))
}

fn first_decimal(payload: &JsonValue, rules: &[Rule]) -> Option<Decimal> {
    rules
        .iter()
        .find_map(|rule| lookup(payload, std::slice::from_ref(rule), is_numeric_like).and_then(parse_decimal))
}

fn is_text(value: &JsonValue) -> bool {
    coerce_string(value).is_some()
}

fn is_numeric_like(value: &JsonValue) -> bool {
    parse_decimal(value).is_some()
}

fn is_quantity(value: &JsonValue) -> bool {
    parse_quantity(value).is_some()
}

fn coerce_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_decimal(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        JsonValue::String(s) => parse_decimal_str(s),
        _ => None,
    }
}

/// Accepts `1234.56`, `1234,56` and `1.234,56`.
fn parse_decimal_str(raw: &str) -> Option<Decimal> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let normalized = match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(_), None) => s.replace(',', "."),
        _ => s.to_string(),
    };
    Decimal::from_str(&normalized).ok()
}

fn parse_quantity(value: &JsonValue) -> Option<i32> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .and_then(|q| i32::try_from(q).ok()),
        JsonValue::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}
