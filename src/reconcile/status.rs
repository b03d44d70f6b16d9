use crate::models::OrderStatus;

/// Gateway vocabulary → canonical status. Keys are lower-case.
const STATUS_TABLE: &[(&str, OrderStatus)] = &[
    ("pending", OrderStatus::Pending),
    ("approved", OrderStatus::Approved),
    ("paid", OrderStatus::Approved),
    ("processing", OrderStatus::Pending),
    ("refunded", OrderStatus::Refunded),
    ("canceled", OrderStatus::Refused),
    ("payment_not_authorized", OrderStatus::Refused),
    ("refused", OrderStatus::Refused),
];

/// Map a raw gateway status to the canonical enum.
///
/// Case-insensitive. Anything unrecognised maps to `Pending`.
pub fn map_status(raw: &str) -> OrderStatus {
    let key = raw.trim().to_ascii_lowercase();
    STATUS_TABLE
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, status)| *status)
        .unwrap_or(OrderStatus::Pending)
}

impl OrderStatus {
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Approved => 1,
            OrderStatus::Refunded | OrderStatus::Refused => 2,
        }
    }

    /// Status after an incoming event is folded in.
    ///
    /// Terminal statuses stick; otherwise the status may only stay level or
    /// move forward (`pending` → `approved` → `refunded|refused`).
    pub fn advance(self, incoming: OrderStatus) -> OrderStatus {
        if self.is_terminal() {
            return self;
        }
        if incoming.rank() < self.rank() {
            return self;
        }
        incoming
    }
}
