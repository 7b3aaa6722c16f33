use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::tier::{NewPriceTier, PriceTier, PriceTierId, PriceTierPatch, TierStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("the first tier of a scope must start at 0, got {lower_bound}")]
    FirstTierMustStartAtZero { lower_bound: Decimal },
    #[error("tier lower bound must be >= 0, got {lower_bound}")]
    NegativeLowerBound { lower_bound: Decimal },
    #[error(
        "tier lower bound {lower_bound} must be greater than the open tier's lower bound \
         {open_lower_bound}"
    )]
    NotIncreasing { lower_bound: Decimal, open_lower_bound: Decimal },
}

/// One band of a lower-bound ordered chain whose open tail is closed when a
/// new band is appended. Price tiers and scoped discount rules both cascade
/// this way.
pub trait ChainLink: Clone {
    fn lower_bound(&self) -> Decimal;
    fn upper_bound(&self) -> Option<Decimal>;
    /// Tie-breaker for links sharing a lower bound.
    fn link_id(&self) -> &str;
    fn close_at(&mut self, upper_bound: Decimal, now: DateTime<Utc>);

    fn is_open_link(&self) -> bool {
        self.upper_bound().is_none()
    }
}

impl ChainLink for PriceTier {
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

/// Writes needed to append a tier to a scope's chain, in order: persist
/// `tier` first, then `relink` (the previous tail with its upper bound closed).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierInsertPlan {
    pub tier: PriceTier,
    pub relink: Option<PriceTier>,
}

/// The tail of a chain: the open link with the greatest lower bound, or the
/// highest link when none is open.
pub fn chain_tail<L: ChainLink>(chain: &[L]) -> Option<&L> {
    chain
        .iter()
        .filter(|link| link.is_open_link())
        .max_by_key(|link| link.lower_bound())
        .or_else(|| chain.iter().max_by_key(|link| link.lower_bound()))
}

/// Checks that a link starting at `lower_bound` may be appended and returns
/// the previous tail closed at that bound, if it was open.
pub fn plan_relink<L: ChainLink>(
    chain: &[L],
    lower_bound: Decimal,
    now: DateTime<Utc>,
) -> Result<Option<L>, OrderingError> {
    if lower_bound < Decimal::ZERO {
        return Err(OrderingError::NegativeLowerBound { lower_bound });
    }

    match chain_tail(chain) {
        None if !lower_bound.is_zero() => {
            Err(OrderingError::FirstTierMustStartAtZero { lower_bound })
        }
        None => Ok(None),
        Some(tail) if lower_bound <= tail.lower_bound() => Err(OrderingError::NotIncreasing {
            lower_bound,
            open_lower_bound: tail.lower_bound(),
        }),
        Some(tail) if tail.is_open_link() => {
            let mut closed = tail.clone();
            closed.close_at(lower_bound, now);
            Ok(Some(closed))
        }
        Some(_) => Ok(None),
    }
}

pub fn plan_insert(
    chain: &[PriceTier],
    new: NewPriceTier,
    id: PriceTierId,
    now: DateTime<Utc>,
) -> Result<TierInsertPlan, OrderingError> {
    let relink = plan_relink(chain, new.lower_bound, now)?;

    let tier = PriceTier {
        id,
        scope: new.scope,
        lower_bound: new.lower_bound,
        upper_bound: None,
        pricing: new.pricing,
        status: new.status,
        created_at: now,
        updated_at: now,
    };

    Ok(TierInsertPlan { tier, relink })
}

/// Sorts a chain and closes every open link that is not the last one at the
/// next link's lower bound. Returns the repaired chain and the links that
/// changed and need to be written back.
pub fn repair_chain<L: ChainLink>(mut chain: Vec<L>, now: DateTime<Utc>) -> (Vec<L>, Vec<L>) {
    chain.sort_by(|left, right| {
        left.lower_bound()
            .cmp(&right.lower_bound())
            .then_with(|| left.link_id().cmp(right.link_id()))
    });

    let mut repaired = Vec::new();
    for index in 0..chain.len().saturating_sub(1) {
        let next_lower = chain[index + 1].lower_bound();
        let link = &mut chain[index];
        if link.is_open_link() && next_lower > link.lower_bound() {
            link.close_at(next_lower, now);
            repaired.push(link.clone());
        }
    }

    (chain, repaired)
}

/// Picks the tier pricing `quantity`. A consistent chain yields at most one
/// candidate; with overlapping leftovers the greatest lower bound wins.
pub fn select_matching_tier(candidates: Vec<PriceTier>, quantity: Decimal) -> Option<PriceTier> {
    candidates
        .into_iter()
        .filter(|tier| tier.status == TierStatus::Active && tier.contains(quantity))
        .max_by(|left, right| {
            left.lower_bound.cmp(&right.lower_bound).then_with(|| right.id.cmp(&left.id))
        })
}

pub fn apply_patch(mut tier: PriceTier, patch: PriceTierPatch, now: DateTime<Utc>) -> PriceTier {
    if let Some(pricing) = patch.pricing {
        tier.pricing = pricing;
    }
    if let Some(status) = patch.status {
        tier.status = status;
    }
    tier.updated_at = now;
    tier
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{apply_patch, plan_insert, repair_chain, select_matching_tier, OrderingError};
    use crate::domain::tier::{
        NewPriceTier, PriceTier, PriceTierId, PriceTierPatch, TierPricing, TierScope, TierStatus,
    };

    fn scope() -> TierScope {
        TierScope::new("item-bolt", "off-bolt-acme", "seg-retail")
    }

    fn new_tier(lower: i64) -> NewPriceTier {
        NewPriceTier {
            scope: scope(),
            lower_bound: Decimal::from(lower),
            pricing: TierPricing::FixedPrice(Decimal::from(10)),
            status: TierStatus::Active,
        }
    }

    fn insert(chain: &mut Vec<PriceTier>, id: &str, lower: i64) -> Result<(), OrderingError> {
        let plan =
            plan_insert(chain, new_tier(lower), PriceTierId(id.to_string()), Utc::now())?;
        if let Some(relinked) = plan.relink {
            for tier in chain.iter_mut() {
                if tier.id == relinked.id {
                    *tier = relinked.clone();
                }
            }
        }
        chain.push(plan.tier);
        Ok(())
    }

    fn assert_partition(chain: &[PriceTier]) {
        let (sorted, repaired) = repair_chain(chain.to_vec(), Utc::now());
        assert!(repaired.is_empty(), "chain should already be consistent");
        assert_eq!(sorted[0].lower_bound, Decimal::ZERO);
        assert_eq!(sorted.iter().filter(|tier| tier.is_open()).count(), 1);
        for pair in sorted.windows(2) {
            assert_eq!(pair[0].upper_bound, Some(pair[1].lower_bound));
        }
        assert!(sorted.last().is_some_and(PriceTier::is_open));
    }

    #[test]
    fn appending_tiers_closes_the_previous_open_tier() {
        let mut chain = Vec::new();
        insert(&mut chain, "A", 0).expect("first tier");
        insert(&mut chain, "B", 100).expect("second tier");

        assert_eq!(chain[0].upper_bound, Some(Decimal::from(100)));
        assert!(chain[1].is_open());

        let error = insert(&mut chain, "C", 50).expect_err("C is below the open tier");
        assert_eq!(
            error,
            OrderingError::NotIncreasing {
                lower_bound: Decimal::from(50),
                open_lower_bound: Decimal::from(100),
            }
        );
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn equal_lower_bound_is_rejected() {
        let mut chain = Vec::new();
        insert(&mut chain, "A", 0).expect("first tier");
        assert!(matches!(
            insert(&mut chain, "B", 0),
            Err(OrderingError::NotIncreasing { .. })
        ));
    }

    #[test]
    fn empty_scope_requires_a_zero_start() {
        let mut chain = Vec::new();
        assert_eq!(
            insert(&mut chain, "A", 5),
            Err(OrderingError::FirstTierMustStartAtZero { lower_bound: Decimal::from(5) })
        );
        assert_eq!(
            insert(&mut chain, "A", -1),
            Err(OrderingError::NegativeLowerBound { lower_bound: Decimal::from(-1) })
        );
    }

    #[test]
    fn successive_inserts_partition_the_quantity_axis() {
        let mut chain = Vec::new();
        for (index, lower) in [0, 10, 25, 100, 1_000].into_iter().enumerate() {
            insert(&mut chain, &format!("T{index}"), lower).expect("increasing insert");
            assert_partition(&chain);
        }

        for quantity in [0, 9, 10, 24, 99, 100, 999, 1_000, 50_000] {
            let matches = chain
                .iter()
                .filter(|tier| tier.contains(Decimal::from(quantity)))
                .count();
            assert_eq!(matches, 1, "quantity {quantity} should hit exactly one tier");
        }
    }

    #[test]
    fn repair_relinks_an_open_tier_left_by_a_failed_relink() {
        let mut chain = Vec::new();
        insert(&mut chain, "A", 0).expect("first tier");
        let plan = plan_insert(&chain, new_tier(100), PriceTierId("B".to_string()), Utc::now())
            .expect("plan");
        // Relink write lost: both A and B are open.
        chain.push(plan.tier);

        let (repaired_chain, repaired) = repair_chain(chain, Utc::now());

        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].id, PriceTierId("A".to_string()));
        assert_eq!(repaired[0].upper_bound, Some(Decimal::from(100)));
        assert_partition(&repaired_chain);
    }

    #[test]
    fn overlapping_candidates_resolve_to_the_greatest_lower_bound() {
        let mut chain = Vec::new();
        insert(&mut chain, "A", 0).expect("first tier");
        let plan = plan_insert(&chain, new_tier(100), PriceTierId("B".to_string()), Utc::now())
            .expect("plan");
        chain.push(plan.tier);

        let selected =
            select_matching_tier(chain.clone(), Decimal::from(150)).expect("a tier matches");
        assert_eq!(selected.id, PriceTierId("B".to_string()));

        let selected = select_matching_tier(chain, Decimal::from(50)).expect("a tier matches");
        assert_eq!(selected.id, PriceTierId("A".to_string()));
    }

    #[test]
    fn inactive_tiers_never_match() {
        let mut chain = Vec::new();
        insert(&mut chain, "A", 0).expect("first tier");
        let inactive = apply_patch(
            chain.remove(0),
            PriceTierPatch { status: Some(TierStatus::Inactive), ..PriceTierPatch::default() },
            Utc::now(),
        );

        assert_eq!(inactive.lower_bound, Decimal::ZERO);
        assert!(select_matching_tier(vec![inactive], Decimal::from(3)).is_none());
    }
}
