use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{ItemId, OfferingId, SegmentId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriceTierId(pub String);

/// The (item, offering, segment) partition a tier chain lives in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TierScope {
    pub item_id: ItemId,
    pub offering_id: OfferingId,
    pub segment_id: SegmentId,
}

impl TierScope {
    pub fn new(
        item_id: impl Into<String>,
        offering_id: impl Into<String>,
        segment_id: impl Into<String>,
    ) -> Self {
        Self {
            item_id: ItemId(item_id.into()),
            offering_id: OfferingId(offering_id.into()),
            segment_id: SegmentId(segment_id.into()),
        }
    }

    pub fn lock_key(&self) -> String {
        format!("{}/{}/{}", self.item_id.0, self.offering_id.0, self.segment_id.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TierPricing {
    FixedPrice(Decimal),
    MarginOverCost(Decimal),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStatus {
    InReview,
    Active,
    Inactive,
}

impl TierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InReview => "in_review",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_review" => Some(Self::InReview),
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    pub id: PriceTierId,
    pub scope: TierScope,
    pub lower_bound: Decimal,
    pub upper_bound: Option<Decimal>,
    pub pricing: TierPricing,
    pub status: TierStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PriceTier {
    pub fn is_open(&self) -> bool {
        self.upper_bound.is_none()
    }

    /// Lower bound inclusive, upper bound exclusive.
    pub fn contains(&self, quantity: Decimal) -> bool {
        self.lower_bound <= quantity && self.upper_bound.map_or(true, |upper| quantity < upper)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPriceTier {
    pub scope: TierScope,
    pub lower_bound: Decimal,
    pub pricing: TierPricing,
    pub status: TierStatus,
}

/// Mutable fields of an existing tier. Bounds are owned by the cascade.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTierPatch {
    pub pricing: Option<TierPricing>,
    pub status: Option<TierStatus>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{PriceTier, PriceTierId, TierPricing, TierScope, TierStatus};

    fn tier(lower: i64, upper: Option<i64>) -> PriceTier {
        PriceTier {
            id: PriceTierId("t".to_string()),
            scope: TierScope::new("item", "offering", "segment"),
            lower_bound: Decimal::from(lower),
            upper_bound: upper.map(Decimal::from),
            pricing: TierPricing::FixedPrice(Decimal::ONE),
            status: TierStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn bounds_are_lower_inclusive_upper_exclusive() {
        let closed = tier(10, Some(20));
        assert!(closed.contains(Decimal::from(10)));
        assert!(closed.contains(Decimal::new(1999, 2)));
        assert!(!closed.contains(Decimal::from(20)));
        assert!(!closed.contains(Decimal::from(9)));

        let open = tier(20, None);
        assert!(open.is_open());
        assert!(open.contains(Decimal::from(1_000_000)));
    }
}
