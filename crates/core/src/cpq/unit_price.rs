use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::batch::{Batch, BatchId};
use crate::domain::catalog::{ItemId, OfferingId, ProviderOffering, SegmentId};
use crate::domain::tier::{PriceTier, PriceTierId, TierPricing, TierScope};

/// Lookups that found nothing. Indexed reads may lag behind writes, so the
/// engine retries these before surfacing them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PricingNotFound {
    #[error("no active price tier in scope `{scope}` covers quantity {quantity}")]
    NoMatchingTier { scope: String, quantity: Decimal },
    #[error("offering `{offering_id}` has no in-stock batch to apply a margin to")]
    NoAvailableBatch { offering_id: String },
    #[error("batch `{batch_id}` of offering `{offering_id}` not found")]
    BatchNotFound { offering_id: String, batch_id: String },
    #[error("offering `{offering_id}` not found")]
    OfferingNotFound { offering_id: String },
    #[error("item `{item_id}` not found")]
    ItemNotFound { item_id: String },
    #[error("price tier `{tier_id}` not found")]
    TierNotFound { tier_id: String },
    #[error("discount rule `{rule_id}` not found")]
    RuleNotFound { rule_id: String },
    #[error("discount prompt `{prompt_id}` not found")]
    PromptNotFound { prompt_id: String },
    #[error("quote `{quote_id}` not found")]
    QuoteNotFound { quote_id: String },
    #[error("line `{line_id}` of quote `{quote_id}` not found")]
    LineNotFound { quote_id: String, line_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPriceRequest {
    pub item_id: ItemId,
    pub offering_id: OfferingId,
    pub segment_id: SegmentId,
    pub quantity: Decimal,
    pub batch_id: Option<BatchId>,
}

impl UnitPriceRequest {
    pub fn scope(&self) -> TierScope {
        TierScope {
            item_id: self.item_id.clone(),
            offering_id: self.offering_id.clone(),
            segment_id: self.segment_id.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPrice {
    pub unit_price: Decimal,
    pub tier_id: PriceTierId,
    pub pricing: TierPricing,
    pub batch_id: Option<BatchId>,
    pub total_cost: Option<Decimal>,
    /// Batch guardrail when a batch is involved, else the offering base price.
    pub guardrail_price: Decimal,
    pub slow_move_item: bool,
}

/// The requested batch, or the first in-stock batch by ascending id.
pub fn select_batch<'a>(batches: &'a [Batch], requested: Option<&BatchId>) -> Option<&'a Batch> {
    match requested {
        Some(batch_id) => batches.iter().find(|batch| &batch.id == batch_id),
        None => batches
            .iter()
            .filter(|batch| batch.in_stock)
            .min_by(|left, right| left.id.cmp(&right.id)),
    }
}

pub fn margin_price(total_cost: Decimal, margin_pct: Decimal) -> Decimal {
    total_cost * (Decimal::ONE + margin_pct / Decimal::ONE_HUNDRED)
}

/// Prices one unit from the selected tier. `batch` is the batch resolved for
/// the request, if any; margin tiers require one.
pub fn price_from_tier(
    tier: &PriceTier,
    offering: &ProviderOffering,
    batch: Option<&Batch>,
) -> Result<UnitPrice, PricingNotFound> {
    let unit_price = match (tier.pricing, batch) {
        (TierPricing::FixedPrice(price), _) => price,
        (TierPricing::MarginOverCost(margin_pct), Some(batch)) => {
            margin_price(batch.total_cost, margin_pct)
        }
        (TierPricing::MarginOverCost(_), None) => {
            return Err(PricingNotFound::NoAvailableBatch { offering_id: offering.id.0.clone() });
        }
    };

    Ok(UnitPrice {
        unit_price,
        tier_id: tier.id.clone(),
        pricing: tier.pricing,
        batch_id: batch.map(|batch| batch.id.clone()),
        total_cost: batch.map(|batch| batch.total_cost),
        guardrail_price: batch.map_or(offering.base_price, |batch| batch.guardrail_price),
        slow_move_item: batch.is_some_and(|batch| batch.slow_move_item),
    })
}
