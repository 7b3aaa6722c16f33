use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::CollaboratorError;
use crate::domain::catalog::{ItemId, OfferingId, SegmentId};
use crate::domain::discount::{
    DiscountPrompt, DiscountPromptId, DiscountScope, DiscountTier, PromptStatus,
};

/// Facts about the request a prompt's conditions are evaluated against.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionContext(BTreeMap<String, String>);

impl ConditionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        prompt: &DiscountPrompt,
        context: &ConditionContext,
    ) -> Result<bool, CollaboratorError>;
}

/// Evaluates `key=value`, `key!=value` and bare `key` conditions against the
/// context. Every condition must hold; unparseable conditions fail.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContextMatchEvaluator;

impl ContextMatchEvaluator {
    fn holds(condition: &str, context: &ConditionContext) -> bool {
        let condition = condition.trim();
        if let Some((key, value)) = condition.split_once("!=") {
            return context.get(key.trim()).is_some_and(|actual| actual != value.trim());
        }
        if let Some((key, value)) = condition.split_once('=') {
            return context.get(key.trim()).is_some_and(|actual| actual == value.trim());
        }
        !condition.is_empty() && context.get(condition).is_some()
    }
}

#[async_trait]
impl ConditionEvaluator for ContextMatchEvaluator {
    async fn evaluate(
        &self,
        prompt: &DiscountPrompt,
        context: &ConditionContext,
    ) -> Result<bool, CollaboratorError> {
        Ok(prompt.conditions.iter().all(|condition| Self::holds(condition, context)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountRequest {
    pub item_id: ItemId,
    pub offering_id: OfferingId,
    pub segment_id: SegmentId,
    pub subtotal: Decimal,
    #[serde(default)]
    pub context: ConditionContext,
}

impl DiscountRequest {
    /// Global, segment, item and offering scopes, broadest first.
    pub fn candidate_scopes(&self) -> [DiscountScope; 4] {
        [
            DiscountScope::Global,
            DiscountScope::Segment(self.segment_id.clone()),
            DiscountScope::Item(self.item_id.clone()),
            DiscountScope::Offering(self.offering_id.clone()),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountMatch {
    pub prompt_id: DiscountPromptId,
    pub scope: DiscountScope,
    pub priority: i32,
    pub tier: DiscountTier,
    pub max_discount_pct: Decimal,
}

/// Drops inactive prompts and duplicate ids, then orders by priority
/// descending with ascending prompt id breaking ties.
pub fn rank_candidates(candidates: Vec<DiscountPrompt>) -> Vec<DiscountPrompt> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<DiscountPrompt> = candidates
        .into_iter()
        .filter(|prompt| prompt.status == PromptStatus::Active)
        .filter(|prompt| seen.insert(prompt.id.clone()))
        .collect();
    ranked.sort_by(|left, right| {
        right.priority.cmp(&left.priority).then_with(|| left.id.cmp(&right.id))
    });
    ranked
}

pub fn match_tier(prompt: &DiscountPrompt, subtotal: Decimal) -> Option<DiscountMatch> {
    prompt.rules.tier_for(subtotal).map(|tier| DiscountMatch {
        prompt_id: prompt.id.clone(),
        scope: prompt.scope.clone(),
        priority: prompt.priority,
        tier: *tier,
        max_discount_pct: tier.max_discount_pct,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{
        match_tier, rank_candidates, ConditionContext, ConditionEvaluator, ContextMatchEvaluator,
    };
    use crate::cpq::discount_rules::normalize;
    use crate::domain::catalog::SegmentId;
    use crate::domain::discount::{
        DiscountPrompt, DiscountPromptId, DiscountScope, DiscountTier, PromptStatus,
    };

    fn prompt(id: &str, priority: i32, status: PromptStatus) -> DiscountPrompt {
        DiscountPrompt {
            id: DiscountPromptId(id.to_string()),
            scope: DiscountScope::Segment(SegmentId("seg-wholesale".to_string())),
            prompt: "volume discount".to_string(),
            conditions: Vec::new(),
            rules: normalize(vec![
                DiscountTier::new(Decimal::ZERO, Some(Decimal::from(1000)), Decimal::from(5)),
                DiscountTier::new(Decimal::from(1000), None, Decimal::from(10)),
            ])
            .expect("valid rules"),
            priority,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ids(prompts: &[DiscountPrompt]) -> Vec<&str> {
        prompts.iter().map(|prompt| prompt.id.0.as_str()).collect()
    }

    #[test]
    fn ranks_by_priority_then_id_and_drops_duplicates() {
        let ranked = rank_candidates(vec![
            prompt("p-b", 5, PromptStatus::Active),
            prompt("p-c", 9, PromptStatus::Active),
            prompt("p-a", 5, PromptStatus::Active),
            prompt("p-c", 9, PromptStatus::Active),
            prompt("p-d", 50, PromptStatus::Inactive),
        ]);

        assert_eq!(ids(&ranked), vec!["p-c", "p-a", "p-b"]);
    }

    #[test]
    fn matches_the_tier_containing_the_subtotal() {
        let matched =
            match_tier(&prompt("p-a", 1, PromptStatus::Active), Decimal::from(1500)).expect("tier");

        assert_eq!(matched.max_discount_pct, Decimal::from(10));
        assert_eq!(matched.tier.lower_bound, Decimal::from(1000));

        let boundary =
            match_tier(&prompt("p-a", 1, PromptStatus::Active), Decimal::from(1000)).expect("tier");
        assert_eq!(boundary.max_discount_pct, Decimal::from(10));

        let below =
            match_tier(&prompt("p-a", 1, PromptStatus::Active), Decimal::from(999)).expect("tier");
        assert_eq!(below.max_discount_pct, Decimal::from(5));
    }

    #[tokio::test]
    async fn context_match_evaluator_checks_every_condition() {
        let mut gated = prompt("p-a", 1, PromptStatus::Active);
        gated.conditions = vec!["region=emea".to_string(), "channel!=retail".to_string()];
        let evaluator = ContextMatchEvaluator;

        let passing = ConditionContext::new().with("region", "emea").with("channel", "direct");
        let wrong_region = ConditionContext::new().with("region", "apac").with("channel", "direct");
        let missing = ConditionContext::new().with("region", "emea");

        assert_eq!(evaluator.evaluate(&gated, &passing).await, Ok(true));
        assert_eq!(evaluator.evaluate(&gated, &wrong_region).await, Ok(false));
        assert_eq!(evaluator.evaluate(&gated, &missing).await, Ok(false));
    }

    #[tokio::test]
    async fn bare_conditions_require_the_key() {
        let mut gated = prompt("p-a", 1, PromptStatus::Active);
        gated.conditions = vec!["strategic_account".to_string()];

        let present = ConditionContext::new().with("strategic_account", "yes");
        assert_eq!(ContextMatchEvaluator.evaluate(&gated, &present).await, Ok(true));
        let empty = ConditionContext::new();
        assert_eq!(ContextMatchEvaluator.evaluate(&gated, &empty).await, Ok(false));
    }
}
