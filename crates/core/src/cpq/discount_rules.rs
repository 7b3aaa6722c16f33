use std::collections::BTreeMap;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::discount::{DiscountRuleSet, DiscountTier};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DiscountRuleError {
    #[error("discount rule set must contain at least one tier")]
    Empty,
    #[error("discount rule set must start at 0, first lower bound is {lower_bound}")]
    NonZeroStart { lower_bound: Decimal },
    #[error("discount tiers must not share a lower bound, {lower_bound} appears twice")]
    DuplicateLowerBound { lower_bound: Decimal },
    #[error(
        "discount tiers must be contiguous: tier ending at {upper_bound} is followed by a tier \
         starting at {next_lower_bound}"
    )]
    GapOrOverlap { upper_bound: Decimal, next_lower_bound: Decimal },
    #[error(
        "only the last discount tier may be open-ended, tier at {lower_bound} has no upper bound"
    )]
    OpenTierNotLast { lower_bound: Decimal },
    #[error("the last discount tier must be open-ended, it ends at {upper_bound}")]
    LastTierBounded { upper_bound: Decimal },
    #[error(
        "discount tier upper bound {upper_bound} must be greater than its lower bound {lower_bound}"
    )]
    EmptyRange { lower_bound: Decimal, upper_bound: Decimal },
    #[error("max discount must be within [0, 100], tier at {lower_bound} has {max_discount_pct}")]
    PercentageOutOfRange { lower_bound: Decimal, max_discount_pct: Decimal },
    #[error(
        "max discount must strictly increase across tiers, {max_discount_pct} at {lower_bound} \
         does not exceed {previous_pct}"
    )]
    NonMonotonicDiscount { lower_bound: Decimal, max_discount_pct: Decimal, previous_pct: Decimal },
}

/// Sorts and validates a tiered discount rule set. Normalizing an already
/// normalized set returns it unchanged.
pub fn normalize(mut tiers: Vec<DiscountTier>) -> Result<DiscountRuleSet, DiscountRuleError> {
    if tiers.is_empty() {
        return Err(DiscountRuleError::Empty);
    }
    tiers.sort_by(|left, right| left.lower_bound.cmp(&right.lower_bound));

    for pair in tiers.windows(2) {
        if pair[0].lower_bound == pair[1].lower_bound {
            return Err(DiscountRuleError::DuplicateLowerBound {
                lower_bound: pair[0].lower_bound,
            });
        }
    }

    let first = tiers[0].lower_bound;
    if !first.is_zero() {
        return Err(DiscountRuleError::NonZeroStart { lower_bound: first });
    }

    let last_index = tiers.len() - 1;
    let mut previous_pct: Option<Decimal> = None;
    for (index, tier) in tiers.iter().enumerate() {
        if tier.max_discount_pct < Decimal::ZERO || tier.max_discount_pct > Decimal::ONE_HUNDRED {
            return Err(DiscountRuleError::PercentageOutOfRange {
                lower_bound: tier.lower_bound,
                max_discount_pct: tier.max_discount_pct,
            });
        }

        match (tier.upper_bound, index == last_index) {
            (Some(upper_bound), _) if upper_bound <= tier.lower_bound => {
                return Err(DiscountRuleError::EmptyRange {
                    lower_bound: tier.lower_bound,
                    upper_bound,
                });
            }
            (Some(upper_bound), true) => {
                return Err(DiscountRuleError::LastTierBounded { upper_bound });
            }
            (Some(upper_bound), false) => {
                let next_lower_bound = tiers[index + 1].lower_bound;
                if upper_bound != next_lower_bound {
                    return Err(DiscountRuleError::GapOrOverlap { upper_bound, next_lower_bound });
                }
            }
            (None, false) => {
                return Err(DiscountRuleError::OpenTierNotLast { lower_bound: tier.lower_bound });
            }
            (None, true) => {}
        }

        if let Some(previous_pct) = previous_pct {
            if tier.max_discount_pct <= previous_pct {
                return Err(DiscountRuleError::NonMonotonicDiscount {
                    lower_bound: tier.lower_bound,
                    max_discount_pct: tier.max_discount_pct,
                    previous_pct,
                });
            }
        }
        previous_pct = Some(tier.max_discount_pct);
    }

    Ok(DiscountRuleSet::from_normalized(tiers))
}

/// Merges `updates` into `existing` keyed by lower bound, updates winning,
/// and normalizes the result.
pub fn merge(
    existing: &DiscountRuleSet,
    updates: Vec<DiscountTier>,
) -> Result<DiscountRuleSet, DiscountRuleError> {
    let mut by_lower_bound = BTreeMap::new();
    for tier in existing.tiers().iter().copied().chain(updates) {
        by_lower_bound.insert(tier.lower_bound, tier);
    }
    normalize(by_lower_bound.into_values().collect())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{merge, normalize, DiscountRuleError};
    use crate::domain::discount::{DiscountRuleSet, DiscountTier};

    fn tier(lower: i64, upper: Option<i64>, pct: i64) -> DiscountTier {
        DiscountTier::new(Decimal::from(lower), upper.map(Decimal::from), Decimal::from(pct))
    }

    #[test]
    fn sorts_unordered_input() {
        let rules = normalize(vec![tier(1000, None, 10), tier(0, Some(1000), 5)])
            .expect("valid rules");

        assert_eq!(rules.tiers(), &[tier(0, Some(1000), 5), tier(1000, None, 10)]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize(vec![
            tier(5000, None, 12),
            tier(0, Some(1000), 2),
            tier(1000, Some(5000), 6),
        ])
        .expect("valid rules");
        let twice = normalize(once.clone().into_tiers()).expect("still valid");

        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_non_zero_start() {
        let error = normalize(vec![tier(10, None, 5)]).expect_err("must start at zero");
        assert_eq!(error, DiscountRuleError::NonZeroStart { lower_bound: Decimal::from(10) });
        assert!(error.to_string().contains("must start at 0"));
    }

    #[test]
    fn rejects_gaps_and_overlaps() {
        assert_eq!(
            normalize(vec![tier(0, Some(500), 5), tier(1000, None, 10)]),
            Err(DiscountRuleError::GapOrOverlap {
                upper_bound: Decimal::from(500),
                next_lower_bound: Decimal::from(1000),
            })
        );
        assert!(matches!(
            normalize(vec![tier(0, Some(1500), 5), tier(1000, None, 10)]),
            Err(DiscountRuleError::GapOrOverlap { .. })
        ));
    }

    #[test]
    fn rejects_misplaced_open_tiers() {
        assert_eq!(
            normalize(vec![tier(0, None, 5), tier(1000, None, 10)]),
            Err(DiscountRuleError::OpenTierNotLast { lower_bound: Decimal::ZERO })
        );
        assert_eq!(
            normalize(vec![tier(0, Some(1000), 5)]),
            Err(DiscountRuleError::LastTierBounded { upper_bound: Decimal::from(1000) })
        );
    }

    #[test]
    fn rejects_non_monotonic_discount() {
        let error = normalize(vec![tier(0, Some(1000), 10), tier(1000, None, 10)])
            .expect_err("equal percentages");
        assert!(matches!(error, DiscountRuleError::NonMonotonicDiscount { .. }));
    }

    #[test]
    fn rejects_out_of_range_percentage() {
        assert!(matches!(
            normalize(vec![tier(0, Some(1000), -1), tier(1000, None, 10)]),
            Err(DiscountRuleError::PercentageOutOfRange { .. })
        ));
        assert!(matches!(
            normalize(vec![tier(0, None, 101)]),
            Err(DiscountRuleError::PercentageOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_empty_and_duplicate_sets() {
        assert_eq!(normalize(Vec::new()), Err(DiscountRuleError::Empty));
        assert!(matches!(
            normalize(vec![tier(0, Some(10), 1), tier(0, None, 2)]),
            Err(DiscountRuleError::DuplicateLowerBound { .. })
        ));
    }

    #[test]
    fn merge_replaces_by_lower_bound_and_renormalizes() {
        let existing = normalize(vec![tier(0, Some(1000), 5), tier(1000, None, 10)])
            .expect("valid rules");

        let merged = merge(&existing, vec![tier(1000, Some(2000), 8), tier(2000, None, 15)])
            .expect("merged rules are contiguous");

        assert_eq!(
            merged.tiers(),
            &[tier(0, Some(1000), 5), tier(1000, Some(2000), 8), tier(2000, None, 15)]
        );
    }

    #[test]
    fn merge_that_breaks_contiguity_fails() {
        let existing = normalize(vec![tier(0, Some(1000), 5), tier(1000, None, 10)])
            .expect("valid rules");

        assert!(merge(&existing, vec![tier(0, Some(800), 5)]).is_err());
    }

    #[test]
    fn deserializing_a_rule_set_validates_it() {
        let parsed: Result<DiscountRuleSet, _> = serde_json::from_str(
            r#"[{"lower_bound":"0","upper_bound":"1000","max_discount_pct":"5"},
                {"lower_bound":"1000","upper_bound":null,"max_discount_pct":"10"}]"#,
        );
        let rules = parsed.expect("valid rule set");
        assert_eq!(rules.tier_for(Decimal::from(1500)), Some(&tier(1000, None, 10)));

        let invalid: Result<DiscountRuleSet, _> = serde_json::from_str(
            r#"[{"lower_bound":"5","upper_bound":null,"max_discount_pct":"10"}]"#,
        );
        assert!(invalid.is_err());
    }
}
