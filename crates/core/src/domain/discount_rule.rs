use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::tiers::ChainLink;
use crate::domain::tier::{TierScope, TierStatus};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscountRuleId(pub String);

/// A subtotal band capping the discount for one (item, offering, segment)
/// scope. Rules of a scope form a chain with the same cascade as price tiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub id: DiscountRuleId,
    pub scope: TierScope,
    pub lower_bound: Decimal,
    pub upper_bound: Option<Decimal>,
    pub max_discount_pct: Decimal,
    pub status: TierStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiscountRule {
    pub fn is_open(&self) -> bool {
        self.upper_bound.is_none()
    }

    /// Lower bound inclusive, upper bound exclusive.
    pub fn contains(&self, subtotal: Decimal) -> bool {
        self.lower_bound <= subtotal && self.upper_bound.map_or(true, |upper| subtotal < upper)
    }
}

impl ChainLink for DiscountRule {
    fn lower_bound(&self) -> Decimal {
        self.lower_bound
    }

    fn upper_bound(&self) -> Option<Decimal> {
        self.upper_bound
    }

    fn link_id(&self) -> &str {
        &self.id.0
    }

    fn close_at(&mut self, upper_bound: Decimal, now: DateTime<Utc>) {
        self.upper_bound = Some(upper_bound);
        self.updated_at = now;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDiscountRule {
    pub scope: TierScope,
    pub lower_bound: Decimal,
    pub max_discount_pct: Decimal,
    pub status: TierStatus,
}

/// Mutable fields of an existing rule. Bounds are owned by the cascade.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountRulePatch {
    pub max_discount_pct: Option<Decimal>,
    pub status: Option<TierStatus>,
}
