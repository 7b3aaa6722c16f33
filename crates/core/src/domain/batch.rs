use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{ItemId, OfferingId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCosts {
    pub base_cost: Decimal,
    pub freight_cost: Decimal,
    pub additional_cost: Decimal,
    pub guardrail_margin_pct: Decimal,
}

/// A costed lot of an offering. `total_cost` and `guardrail_price` are derived
/// from `costs` by the batch cost calculator and persisted alongside them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub offering_id: OfferingId,
    pub item_id: ItemId,
    pub costs: BatchCosts,
    pub total_cost: Decimal,
    pub guardrail_price: Decimal,
    pub in_stock: bool,
    pub slow_move_item: bool,
    pub produced_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
