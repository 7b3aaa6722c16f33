use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::discount_rules::{normalize, DiscountRuleError};
use crate::domain::catalog::{ItemId, OfferingId, SegmentId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscountPromptId(pub String);

/// One subtotal band of a discount rule set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountTier {
    pub lower_bound: Decimal,
    pub upper_bound: Option<Decimal>,
    pub max_discount_pct: Decimal,
}

impl DiscountTier {
    pub fn new(
        lower_bound: Decimal,
        upper_bound: Option<Decimal>,
        max_discount_pct: Decimal,
    ) -> Self {
        Self { lower_bound, upper_bound, max_discount_pct }
    }

    pub fn contains(&self, subtotal: Decimal) -> bool {
        self.lower_bound <= subtotal && self.upper_bound.map_or(true, |upper| subtotal < upper)
    }
}

/// A normalized rule set. Only obtainable through [`normalize`], including when
/// deserialized, so holders can rely on the contiguity invariants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<DiscountTier>", into = "Vec<DiscountTier>")]
pub struct DiscountRuleSet {
    tiers: Vec<DiscountTier>,
}

impl DiscountRuleSet {
    pub(crate) fn from_normalized(tiers: Vec<DiscountTier>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[DiscountTier] {
        &self.tiers
    }

    pub fn into_tiers(self) -> Vec<DiscountTier> {
        self.tiers
    }

    pub fn tier_for(&self, subtotal: Decimal) -> Option<&DiscountTier> {
        self.tiers.iter().find(|tier| tier.contains(subtotal))
    }
}

impl TryFrom<Vec<DiscountTier>> for DiscountRuleSet {
    type Error = DiscountRuleError;

    fn try_from(tiers: Vec<DiscountTier>) -> Result<Self, Self::Error> {
        normalize(tiers)
    }
}

impl From<DiscountRuleSet> for Vec<DiscountTier> {
    fn from(value: DiscountRuleSet) -> Self {
        value.tiers
    }
}

/// Breadth at which a prompt applies, with the key it is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "target", rename_all = "snake_case")]
pub enum DiscountScope {
    Global,
    Segment(SegmentId),
    Item(ItemId),
    Offering(OfferingId),
}

impl DiscountScope {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Segment(_) => "segment",
            Self::Item(_) => "item",
            Self::Offering(_) => "offering",
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Segment(id) => Some(&id.0),
            Self::Item(id) => Some(&id.0),
            Self::Offering(id) => Some(&id.0),
        }
    }

    pub fn from_parts(kind: &str, target: Option<String>) -> Option<Self> {
        match (kind, target) {
            ("global", _) => Some(Self::Global),
            ("segment", Some(target)) => Some(Self::Segment(SegmentId(target))),
            ("item", Some(target)) => Some(Self::Item(ItemId(target))),
            ("offering", Some(target)) => Some(Self::Offering(OfferingId(target))),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    InReview,
    Active,
    Inactive,
}

impl PromptStatus {
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
pub struct DiscountPrompt {
    pub id: DiscountPromptId,
    pub scope: DiscountScope,
    pub prompt: String,
    pub conditions: Vec<String>,
    pub rules: DiscountRuleSet,
    pub priority: i32,
    pub status: PromptStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create-or-update payload. On update, `rules` are merged into the stored set
/// by lower bound and every other `Some` field replaces the stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountPromptInput {
    pub id: Option<DiscountPromptId>,
    pub scope: Option<DiscountScope>,
    pub prompt: Option<String>,
    pub conditions: Option<Vec<String>>,
    pub rules: Vec<DiscountTier>,
    pub priority: Option<i32>,
    pub status: Option<PromptStatus>,
}
