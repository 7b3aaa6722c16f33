use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::batch::BatchId;
use crate::domain::catalog::{ItemId, OfferingId, SegmentId};
use crate::domain::discount::DiscountPromptId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuoteId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuoteLineId(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTotals {
    pub total_amount: Decimal,
    pub total_discount: Decimal,
    pub final_total: Decimal,
}

/// Order header. `totals` are derived from the lines and `shipping_amount`;
/// `version` increments on every totals write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub shipping_amount: Decimal,
    pub totals: QuoteTotals,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(id: QuoteId, shipping_amount: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id,
            shipping_amount,
            totals: QuoteTotals::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub id: QuoteLineId,
    pub quote_id: QuoteId,
    pub item_id: ItemId,
    pub offering_id: OfferingId,
    pub segment_id: SegmentId,
    pub batch_id: Option<BatchId>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub final_subtotal: Decimal,
    pub discount_pct: Option<Decimal>,
    pub discount_prompt_id: Option<DiscountPromptId>,
    pub guardrail_price: Option<Decimal>,
    pub slow_move_item: bool,
    pub updated_at: DateTime<Utc>,
}

impl QuoteLine {
    /// True when the discounted unit price falls under the guardrail floor.
    pub fn below_guardrail(&self) -> bool {
        match self.guardrail_price {
            Some(guardrail) if !self.quantity.is_zero() => {
                self.final_subtotal / self.quantity < guardrail
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{QuoteId, QuoteLine, QuoteLineId};
    use crate::domain::catalog::{ItemId, OfferingId, SegmentId};

    fn line(final_subtotal: i64, guardrail: Option<i64>) -> QuoteLine {
        QuoteLine {
            id: QuoteLineId("L-1".to_string()),
            quote_id: QuoteId("Q-1".to_string()),
            item_id: ItemId("item-bolt".to_string()),
            offering_id: OfferingId("off-bolt-acme".to_string()),
            segment_id: SegmentId("seg-retail".to_string()),
            batch_id: None,
            quantity: Decimal::from(10),
            unit_price: Decimal::from(12),
            subtotal: Decimal::from(120),
            discount_amount: Decimal::from(120 - final_subtotal),
            final_subtotal: Decimal::from(final_subtotal),
            discount_pct: None,
            discount_prompt_id: None,
            guardrail_price: guardrail.map(Decimal::from),
            slow_move_item: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn flags_lines_discounted_under_guardrail() {
        assert!(line(90, Some(10)).below_guardrail());
        assert!(!line(110, Some(10)).below_guardrail());
        assert!(!line(10, None).below_guardrail());
    }
}
