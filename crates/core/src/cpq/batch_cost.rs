use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::batch::{Batch, BatchCosts, BatchId};
use crate::domain::catalog::{ItemId, OfferingId};
use crate::errors::EngineError;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCostBreakdown {
    pub total_cost: Decimal,
    pub guardrail_price: Decimal,
}

/// Fully-loaded unit cost and guardrail floor of a lot.
///
/// `total_cost = base + freight + additional` and
/// `guardrail_price = total_cost * (1 + guardrail_margin_pct / 100)`.
pub fn compute_batch_costs(costs: &BatchCosts) -> Result<BatchCostBreakdown, EngineError> {
    for (field, value) in [
        ("base_cost", costs.base_cost),
        ("freight_cost", costs.freight_cost),
        ("additional_cost", costs.additional_cost),
        ("guardrail_margin_pct", costs.guardrail_margin_pct),
    ] {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(EngineError::InvalidInput(format!("{field} must be >= 0, got {value}")));
        }
    }

    let total_cost = costs.base_cost + costs.freight_cost + costs.additional_cost;
    let guardrail_price = total_cost * (Decimal::ONE + costs.guardrail_margin_pct / HUNDRED);

    Ok(BatchCostBreakdown { total_cost, guardrail_price })
}

/// Batch create-or-update payload. Absent cost components fall back to the
/// stored batch on update and to zero on create.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInput {
    pub id: Option<BatchId>,
    pub offering_id: Option<OfferingId>,
    pub base_cost: Option<Decimal>,
    pub freight_cost: Option<Decimal>,
    pub additional_cost: Option<Decimal>,
    pub guardrail_margin_pct: Option<Decimal>,
    pub in_stock: Option<bool>,
    pub slow_move_item: Option<bool>,
    pub produced_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub fn merge_batch_input(
    existing: Option<Batch>,
    input: BatchInput,
    batch_id: BatchId,
    offering_id: OfferingId,
    item_id: ItemId,
    now: DateTime<Utc>,
) -> Result<Batch, EngineError> {
    let previous = existing.as_ref().map(|batch| batch.costs);
    let keep = |value: Option<Decimal>, stored: fn(&BatchCosts) -> Decimal| {
        value.or_else(|| previous.as_ref().map(stored)).unwrap_or(Decimal::ZERO)
    };
    let costs = BatchCosts {
        base_cost: keep(input.base_cost, |costs| costs.base_cost),
        freight_cost: keep(input.freight_cost, |costs| costs.freight_cost),
        additional_cost: keep(input.additional_cost, |costs| costs.additional_cost),
        guardrail_margin_pct: keep(input.guardrail_margin_pct, |costs| costs.guardrail_margin_pct),
    };
    let breakdown = compute_batch_costs(&costs)?;

    let (in_stock, slow_move_item, produced_at, expires_at) = match &existing {
        Some(batch) => (
            input.in_stock.unwrap_or(batch.in_stock),
            input.slow_move_item.unwrap_or(batch.slow_move_item),
            input.produced_at.or(batch.produced_at),
            input.expires_at.or(batch.expires_at),
        ),
        None => (
            input.in_stock.unwrap_or(true),
            input.slow_move_item.unwrap_or(false),
            input.produced_at,
            input.expires_at,
        ),
    };

    Ok(Batch {
        id: batch_id,
        offering_id,
        item_id,
        costs,
        total_cost: breakdown.total_cost,
        guardrail_price: breakdown.guardrail_price,
        in_stock,
        slow_move_item,
        produced_at,
        expires_at,
        updated_at: now,
    })
}
