use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::cpq::discount_rules::DiscountRuleError;
use crate::cpq::tiers::{chain_tail, plan_relink, OrderingError};
use crate::domain::discount_rule::{
    DiscountRule, DiscountRuleId, DiscountRulePatch, NewDiscountRule,
};
use crate::domain::tier::TierStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RuleChainError {
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error(transparent)]
    Validation(#[from] DiscountRuleError),
}

/// Writes needed to append a rule to a scope's chain: `rule` first, then
/// `relink` (the previous open rule closed at the new lower bound).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleInsertPlan {
    pub rule: DiscountRule,
    pub relink: Option<DiscountRule>,
}

/// Appends a rule to the chain. Bounds follow the tier cascade and the
/// maximum discount must exceed the current tail's.
pub fn plan_rule_insert(
    chain: &[DiscountRule],
    new: NewDiscountRule,
    id: DiscountRuleId,
    now: DateTime<Utc>,
) -> Result<RuleInsertPlan, RuleChainError> {
    check_percentage(new.lower_bound, new.max_discount_pct)?;
    let relink = plan_relink(chain, new.lower_bound, now)?;
    if let Some(tail) = chain_tail(chain) {
        if new.max_discount_pct <= tail.max_discount_pct {
            return Err(DiscountRuleError::NonMonotonicDiscount {
                lower_bound: new.lower_bound,
                max_discount_pct: new.max_discount_pct,
                previous_pct: tail.max_discount_pct,
            }
            .into());
        }
    }

    let rule = DiscountRule {
        id,
        scope: new.scope,
        lower_bound: new.lower_bound,
        upper_bound: None,
        max_discount_pct: new.max_discount_pct,
        status: new.status,
        created_at: now,
        updated_at: now,
    };

    Ok(RuleInsertPlan { rule, relink })
}

/// Applies a patch, keeping the maximum discount strictly between the
/// neighbouring rules of `chain`.
pub fn apply_rule_patch(
    chain: &[DiscountRule],
    mut rule: DiscountRule,
    patch: DiscountRulePatch,
    now: DateTime<Utc>,
) -> Result<DiscountRule, DiscountRuleError> {
    if let Some(pct) = patch.max_discount_pct {
        check_percentage(rule.lower_bound, pct)?;
        let previous = chain
            .iter()
            .filter(|other| other.lower_bound < rule.lower_bound)
            .max_by_key(|other| other.lower_bound);
        let next = chain
            .iter()
            .filter(|other| other.lower_bound > rule.lower_bound)
            .min_by_key(|other| other.lower_bound);

        if let Some(previous) = previous.filter(|previous| pct <= previous.max_discount_pct) {
            return Err(DiscountRuleError::NonMonotonicDiscount {
                lower_bound: rule.lower_bound,
                max_discount_pct: pct,
                previous_pct: previous.max_discount_pct,
            });
        }
        if let Some(next) = next.filter(|next| next.max_discount_pct <= pct) {
            return Err(DiscountRuleError::NonMonotonicDiscount {
                lower_bound: next.lower_bound,
                max_discount_pct: next.max_discount_pct,
                previous_pct: pct,
            });
        }
        rule.max_discount_pct = pct;
    }
    if let Some(status) = patch.status {
        rule.status = status;
    }
    rule.updated_at = now;
    Ok(rule)
}

/// Picks the active rule covering `subtotal`; overlapping leftovers of an
/// interrupted relink resolve to the greatest lower bound.
pub fn select_matching_rule(
    candidates: Vec<DiscountRule>,
    subtotal: Decimal,
) -> Option<DiscountRule> {
    candidates
        .into_iter()
        .filter(|rule| rule.status == TierStatus::Active && rule.contains(subtotal))
        .max_by(|left, right| {
            left.lower_bound.cmp(&right.lower_bound).then_with(|| right.id.cmp(&left.id))
        })
}

fn check_percentage(lower_bound: Decimal, pct: Decimal) -> Result<(), DiscountRuleError> {
    if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
        return Err(DiscountRuleError::PercentageOutOfRange { lower_bound, max_discount_pct: pct });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{apply_rule_patch, plan_rule_insert, select_matching_rule, RuleChainError};
    use crate::cpq::discount_rules::DiscountRuleError;
    use crate::cpq::tiers::{repair_chain, OrderingError};
    use crate::domain::discount_rule::{
        DiscountRule, DiscountRuleId, DiscountRulePatch, NewDiscountRule,
    };
    use crate::domain::tier::{TierScope, TierStatus};

    fn new_rule(lower: i64, pct: i64) -> NewDiscountRule {
        NewDiscountRule {
            scope: TierScope::new("item-bolt", "off-bolt-acme", "seg-retail"),
            lower_bound: Decimal::from(lower),
            max_discount_pct: Decimal::from(pct),
            status: TierStatus::Active,
        }
    }

    fn insert(
        chain: &mut Vec<DiscountRule>,
        id: &str,
        lower: i64,
        pct: i64,
    ) -> Result<(), RuleChainError> {
        let plan = plan_rule_insert(
            chain,
            new_rule(lower, pct),
            DiscountRuleId(id.to_string()),
            Utc::now(),
        )?;
        if let Some(relinked) = plan.relink {
            for rule in chain.iter_mut() {
                if rule.id == relinked.id {
                    *rule = relinked.clone();
                }
            }
        }
        chain.push(plan.rule);
        Ok(())
    }

    #[test]
    fn appending_rules_closes_the_previous_open_rule() {
        let mut chain = Vec::new();
        insert(&mut chain, "R0", 0, 2).expect("first rule");
        insert(&mut chain, "R1", 1000, 5).expect("second rule");
        insert(&mut chain, "R2", 5000, 10).expect("third rule");

        let bounds: Vec<(Decimal, Option<Decimal>)> =
            chain.iter().map(|rule| (rule.lower_bound, rule.upper_bound)).collect();
        assert_eq!(
            bounds,
            vec![
                (Decimal::ZERO, Some(Decimal::from(1000))),
                (Decimal::from(1000), Some(Decimal::from(5000))),
                (Decimal::from(5000), None),
            ]
        );
        let (_, repaired) = repair_chain(chain, Utc::now());
        assert!(repaired.is_empty());
    }

    #[test]
    fn bounds_follow_the_tier_cascade() {
        let mut chain = Vec::new();
        assert_eq!(
            insert(&mut chain, "R0", 100, 2),
            Err(RuleChainError::Ordering(OrderingError::FirstTierMustStartAtZero {
                lower_bound: Decimal::from(100),
            }))
        );
        insert(&mut chain, "R0", 0, 2).expect("first rule");
        assert!(matches!(
            insert(&mut chain, "R1", 0, 5),
            Err(RuleChainError::Ordering(OrderingError::NotIncreasing { .. }))
        ));
    }

    #[test]
    fn percentages_must_rise_along_the_chain() {
        let mut chain = Vec::new();
        insert(&mut chain, "R0", 0, 5).expect("first rule");
        assert_eq!(
            insert(&mut chain, "R1", 1000, 5),
            Err(RuleChainError::Validation(DiscountRuleError::NonMonotonicDiscount {
                lower_bound: Decimal::from(1000),
                max_discount_pct: Decimal::from(5),
                previous_pct: Decimal::from(5),
            }))
        );
        assert!(matches!(
            insert(&mut chain, "R1", 1000, 101),
            Err(RuleChainError::Validation(DiscountRuleError::PercentageOutOfRange { .. }))
        ));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn patches_stay_between_neighbours() {
        let mut chain = Vec::new();
        insert(&mut chain, "R0", 0, 2).expect("first rule");
        insert(&mut chain, "R1", 1000, 5).expect("second rule");
        insert(&mut chain, "R2", 5000, 10).expect("third rule");
        let middle = chain[1].clone();
        let patch = |pct: i64| DiscountRulePatch {
            max_discount_pct: Some(Decimal::from(pct)),
            ..DiscountRulePatch::default()
        };

        let raised = apply_rule_patch(&chain, middle.clone(), patch(8), Utc::now())
            .expect("8 sits between 2 and 10");
        assert_eq!(raised.max_discount_pct, Decimal::from(8));
        assert_eq!(raised.upper_bound, Some(Decimal::from(5000)));

        assert!(matches!(
            apply_rule_patch(&chain, middle.clone(), patch(2), Utc::now()),
            Err(DiscountRuleError::NonMonotonicDiscount { .. })
        ));
        assert_eq!(
            apply_rule_patch(&chain, middle, patch(12), Utc::now()),
            Err(DiscountRuleError::NonMonotonicDiscount {
                lower_bound: Decimal::from(5000),
                max_discount_pct: Decimal::from(10),
                previous_pct: Decimal::from(12),
            })
        );
    }

    #[test]
    fn only_active_rules_match() {
        let mut chain = Vec::new();
        insert(&mut chain, "R0", 0, 2).expect("first rule");
        insert(&mut chain, "R1", 1000, 5).expect("second rule");

        let matched =
            select_matching_rule(chain.clone(), Decimal::from(1500)).expect("a rule matches");
        assert_eq!(matched.id, DiscountRuleId("R1".to_string()));

        let paused = apply_rule_patch(
            &chain,
            chain[1].clone(),
            DiscountRulePatch {
                status: Some(TierStatus::Inactive),
                ..DiscountRulePatch::default()
            },
            Utc::now(),
        )
        .expect("status change");
        let remaining = vec![chain[0].clone(), paused];
        assert!(select_matching_rule(remaining, Decimal::from(1500)).is_none());
    }
}
