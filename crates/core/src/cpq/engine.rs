use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::config::EngineConfig;
use crate::cpq::batch_cost::{merge_batch_input, BatchInput};
use crate::cpq::discount_prompts::{
    match_tier, rank_candidates, ConditionContext, ConditionEvaluator, ContextMatchEvaluator,
    DiscountMatch, DiscountRequest,
};
use crate::cpq::discount_rules::{merge, normalize};
use crate::cpq::negotiation::{
    enforce_bound, AppliedDiscount, DiscountAdvisor, NegotiationRequest, ProposalSource,
};
use crate::cpq::rule_chain::{apply_rule_patch, plan_rule_insert, select_matching_rule};
use crate::cpq::tiers::{apply_patch, plan_insert, repair_chain, select_matching_tier};
use crate::cpq::totals::{compute_line, compute_order_totals};
use crate::cpq::unit_price::{
    price_from_tier, select_batch, PricingNotFound, UnitPrice, UnitPriceRequest,
};
use crate::domain::batch::{Batch, BatchId};
use crate::domain::catalog::{Item, ItemId, OfferingId, ProviderOffering, SegmentId};
use crate::domain::discount::{
    DiscountPrompt, DiscountPromptId, DiscountPromptInput, DiscountRuleSet, DiscountScope,
    DiscountTier, PromptStatus,
};
use crate::domain::discount_rule::{
    DiscountRule, DiscountRuleId, DiscountRulePatch, NewDiscountRule,
};
use crate::domain::quote::{Quote, QuoteId, QuoteLine, QuoteLineId, QuoteTotals};
use crate::domain::tier::{
    NewPriceTier, PriceTier, PriceTierId, PriceTierPatch, TierPricing, TierScope,
};
use crate::errors::EngineError;
use crate::retry::{retry_stale_reads, RetryPolicy};
use crate::store::Stores;

const ACTOR: &str = "pricing-engine";

/// Request to add a priced line to a quote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLineRequest {
    pub quote_id: QuoteId,
    pub line_id: Option<QuoteLineId>,
    pub item_id: ItemId,
    pub offering_id: OfferingId,
    pub segment_id: SegmentId,
    pub batch_id: Option<BatchId>,
    pub quantity: Decimal,
    /// Percentage asked for by the operator; the advisor is consulted when absent.
    pub requested_discount_pct: Option<Decimal>,
    #[serde(default)]
    pub context: ConditionContext,
}

/// Async locks keyed by string, created on first use.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: String) -> OwnedMutexGuard<()> {
        let lock = match self.locks.lock() {
            Ok(mut locks) => locks.entry(key).or_default().clone(),
            Err(poisoned) => poisoned.into_inner().entry(key).or_default().clone(),
        };
        lock.lock_owned().await
    }
}

pub struct PricingEngine {
    stores: Stores,
    conditions: Arc<dyn ConditionEvaluator>,
    advisor: Option<Arc<dyn DiscountAdvisor>>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
    retry: RetryPolicy,
    scope_locks: KeyedLocks,
    rule_locks: KeyedLocks,
    quote_locks: KeyedLocks,
}

impl PricingEngine {
    pub fn new(stores: Stores, config: EngineConfig) -> Self {
        Self {
            stores,
            conditions: Arc::new(ContextMatchEvaluator),
            advisor: None,
            audit: Arc::new(TracingAuditSink),
            retry: config.retry_policy(),
            config,
            scope_locks: KeyedLocks::default(),
            rule_locks: KeyedLocks::default(),
            quote_locks: KeyedLocks::default(),
        }
    }

    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.conditions = evaluator;
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn DiscountAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Catalog

    pub async fn save_item(&self, item: Item) -> Result<Item, EngineError> {
        if item.id.0.trim().is_empty() {
            return Err(EngineError::InvalidInput("item id must not be empty".to_string()));
        }
        let existing = self.stores.catalog.find_item(&item.id).await?;
        if existing.is_some_and(|existing| existing != item)
            && self.stores.catalog.count_offerings_for_item(&item.id).await? > 0
        {
            return Err(self.reject_change("item", &item.id.0, "provider offerings"));
        }

        self.stores.catalog.save_item(item.clone()).await?;
        self.emit(
            audit_event("catalog.item_saved", AuditCategory::Catalog, AuditOutcome::Success)
                .with_metadata("item_id", item.id.0.clone()),
        );
        Ok(item)
    }

    pub async fn save_offering(
        &self,
        offering: ProviderOffering,
    ) -> Result<ProviderOffering, EngineError> {
        if offering.base_price < Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "base_price must be >= 0, got {}",
                offering.base_price
            )));
        }
        retry_stale_reads(&self.retry, "catalog.find_item", || {
            self.find_item_once(&offering.item_id)
        })
        .await?;

        let existing = self.stores.catalog.find_offering(&offering.id).await?;
        if existing.is_some_and(|existing| existing.item_id != offering.item_id) {
            if let Some(referenced_by) = self.offering_references(&offering.id).await? {
                return Err(self.reject_change("offering", &offering.id.0, referenced_by));
            }
        }

        self.stores.catalog.save_offering(offering.clone()).await?;
        self.emit(
            audit_event("catalog.offering_saved", AuditCategory::Catalog, AuditOutcome::Success)
                .with_metadata("offering_id", offering.id.0.clone())
                .with_metadata("item_id", offering.item_id.0.clone()),
        );
        Ok(offering)
    }

    pub async fn delete_item(&self, item_id: &ItemId) -> Result<(), EngineError> {
        self.find_item_once(item_id).await?;
        if let Some(referenced_by) = self.item_references(item_id).await? {
            return Err(self.reject_delete("item", &item_id.0, referenced_by));
        }

        self.stores.catalog.delete_item(item_id).await?;
        self.emit(
            audit_event("catalog.item_deleted", AuditCategory::Catalog, AuditOutcome::Success)
                .with_metadata("item_id", item_id.0.clone()),
        );
        Ok(())
    }

    pub async fn delete_offering(&self, offering_id: &OfferingId) -> Result<(), EngineError> {
        self.find_offering_once(offering_id).await?;
        if let Some(referenced_by) = self.offering_references(offering_id).await? {
            return Err(self.reject_delete("offering", &offering_id.0, referenced_by));
        }

        self.stores.catalog.delete_offering(offering_id).await?;
        self.emit(
            audit_event("catalog.offering_deleted", AuditCategory::Catalog, AuditOutcome::Success)
                .with_metadata("offering_id", offering_id.0.clone()),
        );
        Ok(())
    }

    /// The first kind of record still pointing at the item, if any.
    async fn item_references(
        &self,
        item_id: &ItemId,
    ) -> Result<Option<&'static str>, EngineError> {
        let scope = DiscountScope::Item(item_id.clone());
        let referenced_by = if self.stores.catalog.count_offerings_for_item(item_id).await? > 0 {
            Some("provider offerings")
        } else if self.stores.prompts.count_prompts(&scope).await? > 0 {
            Some("discount prompts")
        } else if self.stores.tiers.count_tiers_for_item(item_id).await? > 0 {
            Some("price tiers")
        } else if self.stores.rules.count_rules_for_item(item_id).await? > 0 {
            Some("discount rules")
        } else if self.stores.quotes.count_lines_for_item(item_id).await? > 0 {
            Some("quote lines")
        } else {
            None
        };
        Ok(referenced_by)
    }

    /// The first kind of record still pointing at the offering, if any.
    async fn offering_references(
        &self,
        offering_id: &OfferingId,
    ) -> Result<Option<&'static str>, EngineError> {
        let scope = DiscountScope::Offering(offering_id.clone());
        let referenced_by = if self.stores.prompts.count_prompts(&scope).await? > 0 {
            Some("discount prompts")
        } else if self.stores.tiers.count_tiers_for_offering(offering_id).await? > 0 {
            Some("price tiers")
        } else if self.stores.rules.count_rules_for_offering(offering_id).await? > 0 {
            Some("discount rules")
        } else if self.stores.quotes.count_lines_for_offering(offering_id).await? > 0 {
            Some("quote lines")
        } else if !self.stores.catalog.list_batches(offering_id).await?.is_empty() {
            Some("batches")
        } else {
            None
        };
        Ok(referenced_by)
    }

    // Batches

    pub async fn save_batch(&self, input: BatchInput) -> Result<Batch, EngineError> {
        let offering_id = input.offering_id.clone().ok_or_else(|| {
            EngineError::InvalidInput("offering_id is required to save a batch".to_string())
        })?;
        let offering = retry_stale_reads(&self.retry, "catalog.find_offering", || {
            self.find_offering_once(&offering_id)
        })
        .await?;

        let batch_id = input.id.clone().unwrap_or_else(|| BatchId(new_id("batch")));
        let existing = self.stores.catalog.find_batch(&offering_id, &batch_id).await?;
        let created = existing.is_none();
        let now = Utc::now();
        let batch =
            merge_batch_input(existing, input, batch_id, offering_id, offering.item_id, now)?;

        self.stores.catalog.save_batch(batch.clone()).await?;
        info!(
            event_name = "engine.batch.saved",
            batch_id = %batch.id.0,
            offering_id = %batch.offering_id.0,
            total_cost = %batch.total_cost,
            guardrail_price = %batch.guardrail_price,
            created,
            "batch costs recomputed and saved"
        );
        self.emit(
            audit_event("batch.saved", AuditCategory::Batch, AuditOutcome::Success)
                .with_metadata("batch_id", batch.id.0.clone())
                .with_metadata("total_cost", batch.total_cost.to_string())
                .with_metadata("guardrail_price", batch.guardrail_price.to_string()),
        );
        Ok(batch)
    }

    pub async fn delete_batch(
        &self,
        offering_id: &OfferingId,
        batch_id: &BatchId,
    ) -> Result<(), EngineError> {
        if self.stores.catalog.find_batch(offering_id, batch_id).await?.is_none() {
            return Err(PricingNotFound::BatchNotFound {
                offering_id: offering_id.0.clone(),
                batch_id: batch_id.0.clone(),
            }
            .into());
        }
        if self.stores.quotes.count_lines_for_batch(offering_id, batch_id).await? > 0 {
            return Err(self.reject_delete("batch", &batch_id.0, "quote lines"));
        }

        self.stores.catalog.delete_batch(offering_id, batch_id).await?;
        self.emit(
            audit_event("batch.deleted", AuditCategory::Batch, AuditOutcome::Success)
                .with_metadata("batch_id", batch_id.0.clone()),
        );
        Ok(())
    }

    // Tier cascade

    pub async fn insert_price_tier(&self, new: NewPriceTier) -> Result<PriceTier, EngineError> {
        validate_pricing(&new.pricing)?;
        let scope = new.scope.clone();
        self.validate_scope(&scope).await?;
        let _guard = self.scope_locks.acquire(scope.lock_key()).await;

        let chain = self.repaired_chain(&scope).await?;
        let plan = match plan_insert(&chain, new, PriceTierId(new_id("tier")), Utc::now()) {
            Ok(plan) => plan,
            Err(error) => {
                self.emit(
                    audit_event("tier.insert_rejected", AuditCategory::Tier, AuditOutcome::Rejected)
                        .with_metadata("scope", scope.lock_key())
                        .with_metadata("reason", error.to_string()),
                );
                return Err(error.into());
            }
        };

        self.stores.tiers.save_tier(plan.tier.clone()).await?;
        if let Some(relinked) = plan.relink {
            let previous_id = relinked.id.0.clone();
            if let Err(error) = self.stores.tiers.save_tier(relinked).await {
                warn!(
                    event_name = "engine.tier.relink_deferred",
                    scope = %scope.lock_key(),
                    previous_tier_id = %previous_id,
                    error = %error,
                    "previous open tier could not be closed; the next read repairs the chain"
                );
            }
        }

        info!(
            event_name = "engine.tier.inserted",
            scope = %scope.lock_key(),
            tier_id = %plan.tier.id.0,
            lower_bound = %plan.tier.lower_bound,
            "price tier appended to chain"
        );
        self.emit(
            audit_event("tier.inserted", AuditCategory::Tier, AuditOutcome::Success)
                .with_metadata("scope", scope.lock_key())
                .with_metadata("tier_id", plan.tier.id.0.clone())
                .with_metadata("lower_bound", plan.tier.lower_bound.to_string()),
        );
        Ok(plan.tier)
    }

    pub async fn update_price_tier(
        &self,
        tier_id: &PriceTierId,
        patch: PriceTierPatch,
    ) -> Result<PriceTier, EngineError> {
        if let Some(pricing) = &patch.pricing {
            validate_pricing(pricing)?;
        }
        let tier =
            retry_stale_reads(&self.retry, "tiers.find", || self.find_tier_once(tier_id)).await?;
        let _guard = self.scope_locks.acquire(tier.scope.lock_key()).await;

        let updated = apply_patch(tier, patch, Utc::now());
        self.stores.tiers.save_tier(updated.clone()).await?;
        self.emit(
            audit_event("tier.updated", AuditCategory::Tier, AuditOutcome::Success)
                .with_metadata("tier_id", updated.id.0.clone())
                .with_metadata("status", updated.status.as_str()),
        );
        Ok(updated)
    }

    /// The scope's tier chain ordered by lower bound, repairing duplicate open
    /// tiers left behind by an interrupted insert.
    pub async fn price_tiers(&self, scope: &TierScope) -> Result<Vec<PriceTier>, EngineError> {
        let _guard = self.scope_locks.acquire(scope.lock_key()).await;
        self.repaired_chain(scope).await
    }

    async fn repaired_chain(&self, scope: &TierScope) -> Result<Vec<PriceTier>, EngineError> {
        let listed = self.stores.tiers.list_tiers(scope).await?;
        let (chain, repaired) = repair_chain(listed, Utc::now());

        for tier in repaired {
            warn!(
                event_name = "engine.tier.repaired",
                scope = %scope.lock_key(),
                tier_id = %tier.id.0,
                upper_bound = ?tier.upper_bound,
                "closing open tier that is not the tail of its chain"
            );
            self.emit(
                audit_event("tier.repaired", AuditCategory::Tier, AuditOutcome::Repaired)
                    .with_metadata("scope", scope.lock_key())
                    .with_metadata("tier_id", tier.id.0.clone()),
            );
            self.stores.tiers.save_tier(tier).await?;
        }

        Ok(chain)
    }

    // Scoped discount rules

    /// Appends a rule to its scope's chain, closing the previous open rule at
    /// the new lower bound.
    pub async fn insert_discount_rule(
        &self,
        new: NewDiscountRule,
    ) -> Result<DiscountRule, EngineError> {
        let scope = new.scope.clone();
        self.validate_scope(&scope).await?;
        let _guard = self.rule_locks.acquire(scope.lock_key()).await;

        let chain = self.repaired_rule_chain(&scope).await?;
        let plan = match plan_rule_insert(&chain, new, DiscountRuleId(new_id("rule")), Utc::now())
        {
            Ok(plan) => plan,
            Err(error) => {
                self.emit(
                    audit_event(
                        "discount.rule_insert_rejected",
                        AuditCategory::Discount,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("scope", scope.lock_key())
                    .with_metadata("reason", error.to_string()),
                );
                return Err(error.into());
            }
        };

        self.stores.rules.save_rule(plan.rule.clone()).await?;
        if let Some(relinked) = plan.relink {
            let previous_id = relinked.id.0.clone();
            if let Err(error) = self.stores.rules.save_rule(relinked).await {
                warn!(
                    event_name = "engine.discount_rule.relink_deferred",
                    scope = %scope.lock_key(),
                    previous_rule_id = %previous_id,
                    error = %error,
                    "previous open rule could not be closed; the next read repairs the chain"
                );
            }
        }

        info!(
            event_name = "engine.discount_rule.inserted",
            scope = %scope.lock_key(),
            rule_id = %plan.rule.id.0,
            lower_bound = %plan.rule.lower_bound,
            max_discount_pct = %plan.rule.max_discount_pct,
            "discount rule appended to chain"
        );
        self.emit(
            audit_event("discount.rule_inserted", AuditCategory::Discount, AuditOutcome::Success)
                .with_metadata("scope", scope.lock_key())
                .with_metadata("rule_id", plan.rule.id.0.clone())
                .with_metadata("lower_bound", plan.rule.lower_bound.to_string()),
        );
        Ok(plan.rule)
    }

    pub async fn update_discount_rule(
        &self,
        rule_id: &DiscountRuleId,
        patch: DiscountRulePatch,
    ) -> Result<DiscountRule, EngineError> {
        let rule =
            retry_stale_reads(&self.retry, "rules.find", || self.find_rule_once(rule_id)).await?;
        let _guard = self.rule_locks.acquire(rule.scope.lock_key()).await;

        let chain = self.repaired_rule_chain(&rule.scope).await?;
        let current = chain.iter().find(|link| link.id == rule.id).cloned().unwrap_or(rule);
        let updated = apply_rule_patch(&chain, current, patch, Utc::now())?;

        self.stores.rules.save_rule(updated.clone()).await?;
        self.emit(
            audit_event("discount.rule_updated", AuditCategory::Discount, AuditOutcome::Success)
                .with_metadata("rule_id", updated.id.0.clone())
                .with_metadata("max_discount_pct", updated.max_discount_pct.to_string())
                .with_metadata("status", updated.status.as_str()),
        );
        Ok(updated)
    }

    /// The scope's rule chain ordered by lower bound, repaired like tier chains.
    pub async fn discount_rules(
        &self,
        scope: &TierScope,
    ) -> Result<Vec<DiscountRule>, EngineError> {
        let _guard = self.rule_locks.acquire(scope.lock_key()).await;
        self.repaired_rule_chain(scope).await
    }

    /// The active rule of the scope whose subtotal band covers `subtotal`.
    pub async fn resolve_discount_rule(
        &self,
        scope: &TierScope,
        subtotal: Decimal,
    ) -> Result<Option<DiscountRule>, EngineError> {
        if subtotal < Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!("subtotal must be >= 0, got {subtotal}")));
        }

        let candidates = self.stores.rules.active_rules_for_subtotal(scope, subtotal).await?;
        let matched = select_matching_rule(candidates, subtotal);
        if let Some(rule) = &matched {
            info!(
                event_name = "engine.discount_rule.resolved",
                scope = %scope.lock_key(),
                rule_id = %rule.id.0,
                subtotal = %subtotal,
                max_discount_pct = %rule.max_discount_pct,
                "scoped discount rule matched"
            );
        }
        Ok(matched)
    }

    async fn repaired_rule_chain(
        &self,
        scope: &TierScope,
    ) -> Result<Vec<DiscountRule>, EngineError> {
        let listed = self.stores.rules.list_rules(scope).await?;
        let (chain, repaired) = repair_chain(listed, Utc::now());

        for rule in repaired {
            warn!(
                event_name = "engine.discount_rule.repaired",
                scope = %scope.lock_key(),
                rule_id = %rule.id.0,
                upper_bound = ?rule.upper_bound,
                "closing open discount rule that is not the tail of its chain"
            );
            self.emit(
                audit_event(
                    "discount.rule_repaired",
                    AuditCategory::Discount,
                    AuditOutcome::Repaired,
                )
                .with_metadata("scope", scope.lock_key())
                .with_metadata("rule_id", rule.id.0.clone()),
            );
            self.stores.rules.save_rule(rule).await?;
        }

        Ok(chain)
    }

    // Unit price

    pub async fn resolve_unit_price(
        &self,
        request: &UnitPriceRequest,
    ) -> Result<UnitPrice, EngineError> {
        if request.quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "quantity must be > 0, got {}",
                request.quantity
            )));
        }

        let price = retry_stale_reads(&self.retry, "unit_price.resolve", || {
            self.resolve_unit_price_once(request)
        })
        .await?;

        info!(
            event_name = "engine.unit_price.resolved",
            scope = %request.scope().lock_key(),
            quantity = %request.quantity,
            tier_id = %price.tier_id.0,
            batch_id = price.batch_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            unit_price = %price.unit_price,
            "unit price resolved"
        );
        Ok(price)
    }

    async fn resolve_unit_price_once(
        &self,
        request: &UnitPriceRequest,
    ) -> Result<UnitPrice, EngineError> {
        let scope = request.scope();
        let candidates =
            self.stores.tiers.active_tiers_for_quantity(&scope, request.quantity).await?;
        let tier = select_matching_tier(candidates, request.quantity).ok_or_else(|| {
            PricingNotFound::NoMatchingTier { scope: scope.lock_key(), quantity: request.quantity }
        })?;
        let offering = self.find_offering_once(&request.offering_id).await?;

        // Fixed prices ignore batch data; a named batch only supplies the guardrail.
        let batch = match (&request.batch_id, tier.pricing) {
            (Some(batch_id), TierPricing::MarginOverCost(_)) => Some(
                self.stores.catalog.find_batch(&request.offering_id, batch_id).await?.ok_or_else(
                    || PricingNotFound::BatchNotFound {
                        offering_id: request.offering_id.0.clone(),
                        batch_id: batch_id.0.clone(),
                    },
                )?,
            ),
            (Some(batch_id), TierPricing::FixedPrice(_)) => {
                self.stores.catalog.find_batch(&request.offering_id, batch_id).await?
            }
            (None, TierPricing::MarginOverCost(_)) => {
                let batches = self.stores.catalog.list_batches(&request.offering_id).await?;
                select_batch(&batches, None).cloned()
            }
            (None, TierPricing::FixedPrice(_)) => None,
        };

        Ok(price_from_tier(&tier, &offering, batch.as_ref())?)
    }

    // Discount rules and prompts

    pub fn validate_discount_rules(
        &self,
        rules: Vec<DiscountTier>,
    ) -> Result<DiscountRuleSet, EngineError> {
        Ok(normalize(rules)?)
    }

    /// Creates a prompt, normalizing its rules, or updates one, merging the
    /// supplied rules into the stored set.
    pub async fn save_discount_prompt(
        &self,
        input: DiscountPromptInput,
    ) -> Result<DiscountPrompt, EngineError> {
        let existing = match &input.id {
            Some(id) => self.stores.prompts.find_prompt(id).await?,
            None => None,
        };
        let now = Utc::now();

        let prompt = match existing {
            Some(existing) => {
                let rules = if input.rules.is_empty() {
                    existing.rules
                } else {
                    merge(&existing.rules, input.rules)?
                };
                DiscountPrompt {
                    id: existing.id,
                    scope: input.scope.unwrap_or(existing.scope),
                    prompt: input.prompt.unwrap_or(existing.prompt),
                    conditions: input.conditions.unwrap_or(existing.conditions),
                    rules,
                    priority: input.priority.unwrap_or(existing.priority),
                    status: input.status.unwrap_or(existing.status),
                    created_at: existing.created_at,
                    updated_at: now,
                }
            }
            None => {
                let scope = input.scope.ok_or_else(|| {
                    EngineError::InvalidInput(
                        "scope is required when creating a discount prompt".to_string(),
                    )
                })?;
                DiscountPrompt {
                    id: input.id.unwrap_or_else(|| DiscountPromptId(new_id("prompt"))),
                    scope,
                    prompt: input.prompt.unwrap_or_default(),
                    conditions: input.conditions.unwrap_or_default(),
                    rules: normalize(input.rules)?,
                    priority: input.priority.unwrap_or(0),
                    status: input.status.unwrap_or(PromptStatus::InReview),
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        self.stores.prompts.save_prompt(prompt.clone()).await?;
        info!(
            event_name = "engine.discount_prompt.saved",
            prompt_id = %prompt.id.0,
            scope = prompt.scope.kind(),
            tiers = prompt.rules.tiers().len(),
            status = prompt.status.as_str(),
            "discount prompt saved"
        );
        self.emit(
            audit_event("discount.prompt_saved", AuditCategory::Discount, AuditOutcome::Success)
                .with_metadata("prompt_id", prompt.id.0.clone())
                .with_metadata("scope", prompt.scope.kind()),
        );
        Ok(prompt)
    }

    /// The highest-priority active prompt across the four scopes whose
    /// conditions hold and whose rules cover the subtotal.
    pub async fn resolve_discount(
        &self,
        request: &DiscountRequest,
    ) -> Result<Option<DiscountMatch>, EngineError> {
        if request.subtotal < Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "subtotal must be >= 0, got {}",
                request.subtotal
            )));
        }

        let mut candidates = Vec::new();
        for scope in request.candidate_scopes() {
            candidates.extend(self.stores.prompts.active_prompts(&scope).await?);
        }

        for prompt in rank_candidates(candidates) {
            let Some(discount_match) = match_tier(&prompt, request.subtotal) else {
                continue;
            };
            if !self.conditions_hold(&prompt, &request.context).await {
                continue;
            }

            info!(
                event_name = "engine.discount.resolved",
                prompt_id = %discount_match.prompt_id.0,
                scope = discount_match.scope.kind(),
                subtotal = %request.subtotal,
                max_discount_pct = %discount_match.max_discount_pct,
                "discount prompt matched"
            );
            self.emit(
                audit_event("discount.resolved", AuditCategory::Discount, AuditOutcome::Success)
                    .with_metadata("prompt_id", discount_match.prompt_id.0.clone())
                    .with_metadata("max_discount_pct", discount_match.max_discount_pct.to_string()),
            );
            return Ok(Some(discount_match));
        }

        Ok(None)
    }

    async fn conditions_hold(&self, prompt: &DiscountPrompt, context: &ConditionContext) -> bool {
        if prompt.conditions.is_empty() {
            return true;
        }

        let timeout = self.config.collaborator_timeout();
        match tokio::time::timeout(timeout, self.conditions.evaluate(prompt, context)).await {
            Ok(Ok(holds)) => holds,
            Ok(Err(error)) => {
                warn!(
                    event_name = "engine.discount.condition_failed",
                    prompt_id = %prompt.id.0,
                    error = %error,
                    "condition evaluator failed; treating conditions as unmet"
                );
                false
            }
            Err(_) => {
                warn!(
                    event_name = "engine.discount.condition_timeout",
                    prompt_id = %prompt.id.0,
                    timeout_ms = timeout.as_millis() as u64,
                    "condition evaluator timed out; treating conditions as unmet"
                );
                false
            }
        }
    }

    /// Clamps the requested percentage, or the advisor's proposal when none is
    /// requested, to the matched tier's maximum.
    pub async fn negotiate_discount(
        &self,
        discount_match: &DiscountMatch,
        subtotal: Decimal,
        requested_pct: Option<Decimal>,
        context: &ConditionContext,
    ) -> Result<AppliedDiscount, EngineError> {
        if subtotal < Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!("subtotal must be >= 0, got {subtotal}")));
        }

        let (proposed_pct, source) = match (requested_pct, &self.advisor) {
            (Some(requested), _) => (requested, ProposalSource::Requested),
            (None, Some(advisor)) => {
                let request = NegotiationRequest {
                    prompt_id: discount_match.prompt_id.clone(),
                    subtotal,
                    max_discount_pct: discount_match.max_discount_pct,
                    context: context.clone(),
                };
                let timeout = self.config.collaborator_timeout();
                match tokio::time::timeout(timeout, advisor.propose_discount_pct(&request)).await {
                    Ok(Ok(proposed)) => (proposed, ProposalSource::Advisor),
                    Ok(Err(error)) => {
                        warn!(
                            event_name = "engine.negotiation.advisor_failed",
                            prompt_id = %discount_match.prompt_id.0,
                            error = %error,
                            "discount advisor failed; falling back to no discount"
                        );
                        (Decimal::ZERO, ProposalSource::Fallback)
                    }
                    Err(_) => {
                        warn!(
                            event_name = "engine.negotiation.advisor_timeout",
                            prompt_id = %discount_match.prompt_id.0,
                            timeout_ms = timeout.as_millis() as u64,
                            "discount advisor timed out; falling back to no discount"
                        );
                        (Decimal::ZERO, ProposalSource::Fallback)
                    }
                }
            }
            (None, None) => (Decimal::ZERO, ProposalSource::Fallback),
        };

        let applied = enforce_bound(discount_match, subtotal, proposed_pct, source);
        if applied.clamped {
            info!(
                event_name = "engine.negotiation.clamped",
                prompt_id = %applied.prompt_id.0,
                proposed_pct = %applied.proposed_pct,
                applied_pct = %applied.applied_pct,
                "proposed discount clamped to tier bound"
            );
        }
        Ok(applied)
    }

    // Quotes

    pub async fn create_quote(
        &self,
        quote_id: Option<QuoteId>,
        shipping_amount: Decimal,
    ) -> Result<Quote, EngineError> {
        validate_shipping(shipping_amount)?;
        let quote_id = quote_id.unwrap_or_else(|| QuoteId(new_id("quote")));
        let mut quote = Quote::new(quote_id, shipping_amount);
        quote.totals = compute_order_totals(&[], shipping_amount);

        self.stores.quotes.create_quote(quote.clone()).await?;
        self.emit(
            audit_event("quote.created", AuditCategory::Quote, AuditOutcome::Success)
                .for_quote(quote.id.clone()),
        );
        Ok(quote)
    }

    /// Prices a line, applies the best available discount within its bound and
    /// refreshes the quote totals.
    pub async fn price_line(&self, request: PriceLineRequest) -> Result<QuoteLine, EngineError> {
        retry_stale_reads(&self.retry, "quote.find", || self.find_quote_once(&request.quote_id))
            .await?;

        let unit = self
            .resolve_unit_price(&UnitPriceRequest {
                item_id: request.item_id.clone(),
                offering_id: request.offering_id.clone(),
                segment_id: request.segment_id.clone(),
                quantity: request.quantity,
                batch_id: request.batch_id.clone(),
            })
            .await?;
        let undiscounted = compute_line(unit.unit_price, request.quantity, Decimal::ZERO)?;

        let discount_request = DiscountRequest {
            item_id: request.item_id.clone(),
            offering_id: request.offering_id.clone(),
            segment_id: request.segment_id.clone(),
            subtotal: undiscounted.subtotal,
            context: request.context.clone(),
        };
        let applied = match self.resolve_discount(&discount_request).await? {
            Some(discount_match) => Some(
                self.negotiate_discount(
                    &discount_match,
                    undiscounted.subtotal,
                    request.requested_discount_pct,
                    &request.context,
                )
                .await?,
            ),
            None => None,
        };
        let discount_amount =
            applied.as_ref().map_or(Decimal::ZERO, |applied| applied.discount_amount);
        let amounts = compute_line(unit.unit_price, request.quantity, discount_amount)?;

        let line = QuoteLine {
            id: request.line_id.unwrap_or_else(|| QuoteLineId(new_id("line"))),
            quote_id: request.quote_id,
            item_id: request.item_id,
            offering_id: request.offering_id,
            segment_id: request.segment_id,
            batch_id: unit.batch_id,
            quantity: request.quantity,
            unit_price: unit.unit_price,
            subtotal: amounts.subtotal,
            discount_amount: amounts.discount_amount,
            final_subtotal: amounts.final_subtotal,
            discount_pct: applied.as_ref().map(|applied| applied.applied_pct),
            discount_prompt_id: applied.map(|applied| applied.prompt_id),
            guardrail_price: Some(unit.guardrail_price),
            slow_move_item: unit.slow_move_item,
            updated_at: Utc::now(),
        };

        let _guard = self.quote_locks.acquire(line.quote_id.0.clone()).await;
        self.stores.quotes.save_line(line.clone()).await?;
        if line.below_guardrail() {
            warn!(
                event_name = "engine.line.below_guardrail",
                quote_id = %line.quote_id.0,
                line_id = %line.id.0,
                final_subtotal = %line.final_subtotal,
                "discounted line falls under the guardrail price"
            );
        }
        self.emit(
            audit_event("quote.line_priced", AuditCategory::Quote, AuditOutcome::Success)
                .for_quote(line.quote_id.clone())
                .with_metadata("line_id", line.id.0.clone())
                .with_metadata("unit_price", line.unit_price.to_string())
                .with_metadata("discount_amount", line.discount_amount.to_string()),
        );
        self.recompute_locked(&line.quote_id, None).await?;
        Ok(line)
    }

    /// Replaces a line's discount amount. Other line fields are immutable.
    pub async fn update_line_discount(
        &self,
        quote_id: &QuoteId,
        line_id: &QuoteLineId,
        discount_amount: Decimal,
    ) -> Result<QuoteLine, EngineError> {
        let _guard = self.quote_locks.acquire(quote_id.0.clone()).await;
        let mut line = self.find_line_once(quote_id, line_id).await?;

        let amounts = compute_line(line.unit_price, line.quantity, discount_amount)?;
        line.subtotal = amounts.subtotal;
        line.discount_amount = amounts.discount_amount;
        line.final_subtotal = amounts.final_subtotal;
        line.discount_pct = (!amounts.subtotal.is_zero())
            .then(|| amounts.discount_amount * Decimal::ONE_HUNDRED / amounts.subtotal);
        line.updated_at = Utc::now();

        self.stores.quotes.save_line(line.clone()).await?;
        self.emit(
            audit_event("quote.line_discounted", AuditCategory::Quote, AuditOutcome::Success)
                .for_quote(quote_id.clone())
                .with_metadata("line_id", line_id.0.clone())
                .with_metadata("discount_amount", discount_amount.to_string()),
        );
        self.recompute_locked(quote_id, None).await?;
        Ok(line)
    }

    pub async fn remove_line(
        &self,
        quote_id: &QuoteId,
        line_id: &QuoteLineId,
    ) -> Result<QuoteTotals, EngineError> {
        let _guard = self.quote_locks.acquire(quote_id.0.clone()).await;
        self.find_line_once(quote_id, line_id).await?;

        self.stores.quotes.delete_line(quote_id, line_id).await?;
        self.emit(
            audit_event("quote.line_removed", AuditCategory::Quote, AuditOutcome::Success)
                .for_quote(quote_id.clone())
                .with_metadata("line_id", line_id.0.clone()),
        );
        self.recompute_locked(quote_id, None).await
    }

    pub async fn set_shipping_amount(
        &self,
        quote_id: &QuoteId,
        shipping_amount: Decimal,
    ) -> Result<QuoteTotals, EngineError> {
        validate_shipping(shipping_amount)?;
        let _guard = self.quote_locks.acquire(quote_id.0.clone()).await;
        self.recompute_locked(quote_id, Some(shipping_amount)).await
    }

    pub async fn recompute_order_totals(
        &self,
        quote_id: &QuoteId,
    ) -> Result<QuoteTotals, EngineError> {
        let _guard = self.quote_locks.acquire(quote_id.0.clone()).await;
        self.recompute_locked(quote_id, None).await
    }

    pub async fn quote(&self, quote_id: &QuoteId) -> Result<Quote, EngineError> {
        retry_stale_reads(&self.retry, "quote.find", || self.find_quote_once(quote_id)).await
    }

    pub async fn quote_lines(&self, quote_id: &QuoteId) -> Result<Vec<QuoteLine>, EngineError> {
        retry_stale_reads(&self.retry, "quote.find", || self.find_quote_once(quote_id)).await?;
        Ok(self.stores.quotes.list_lines(quote_id).await?)
    }

    /// Caller holds the quote lock. Version misses come from writers outside
    /// this process and are retried up to the configured limit.
    async fn recompute_locked(
        &self,
        quote_id: &QuoteId,
        shipping_amount: Option<Decimal>,
    ) -> Result<QuoteTotals, EngineError> {
        let attempts = self.config.totals_max_retries;
        for attempt in 1..=attempts {
            let quote =
                retry_stale_reads(&self.retry, "quote.find", || self.find_quote_once(quote_id))
                    .await?;
            let shipping = shipping_amount.unwrap_or(quote.shipping_amount);
            let lines = self.stores.quotes.list_lines(quote_id).await?;
            let totals = compute_order_totals(&lines, shipping);

            if self.stores.quotes.save_totals(quote_id, quote.version, shipping, totals).await? {
                info!(
                    event_name = "engine.quote.totals_recomputed",
                    quote_id = %quote_id.0,
                    lines = lines.len(),
                    total_amount = %totals.total_amount,
                    total_discount = %totals.total_discount,
                    final_total = %totals.final_total,
                    version = quote.version + 1,
                    "quote totals recomputed"
                );
                self.emit(
                    audit_event(
                        "quote.totals_recomputed",
                        AuditCategory::Quote,
                        AuditOutcome::Success,
                    )
                    .for_quote(quote_id.clone())
                    .with_metadata("final_total", totals.final_total.to_string()),
                );
                return Ok(totals);
            }

            warn!(
                event_name = "engine.quote.totals_conflict",
                quote_id = %quote_id.0,
                attempt,
                expected_version = quote.version,
                "quote changed while totals were recomputed; retrying"
            );
        }

        Err(EngineError::TotalsConflict { quote_id: quote_id.0.clone(), attempts })
    }

    // Point lookups

    async fn find_item_once(&self, item_id: &ItemId) -> Result<Item, EngineError> {
        self.stores
            .catalog
            .find_item(item_id)
            .await?
            .ok_or_else(|| PricingNotFound::ItemNotFound { item_id: item_id.0.clone() }.into())
    }

    async fn find_offering_once(
        &self,
        offering_id: &OfferingId,
    ) -> Result<ProviderOffering, EngineError> {
        self.stores.catalog.find_offering(offering_id).await?.ok_or_else(|| {
            PricingNotFound::OfferingNotFound { offering_id: offering_id.0.clone() }.into()
        })
    }

    async fn find_tier_once(&self, tier_id: &PriceTierId) -> Result<PriceTier, EngineError> {
        self.stores
            .tiers
            .find_tier(tier_id)
            .await?
            .ok_or_else(|| PricingNotFound::TierNotFound { tier_id: tier_id.0.clone() }.into())
    }

    async fn find_rule_once(&self, rule_id: &DiscountRuleId) -> Result<DiscountRule, EngineError> {
        self.stores
            .rules
            .find_rule(rule_id)
            .await?
            .ok_or_else(|| PricingNotFound::RuleNotFound { rule_id: rule_id.0.clone() }.into())
    }

    async fn find_quote_once(&self, quote_id: &QuoteId) -> Result<Quote, EngineError> {
        self.stores
            .quotes
            .find_quote(quote_id)
            .await?
            .ok_or_else(|| PricingNotFound::QuoteNotFound { quote_id: quote_id.0.clone() }.into())
    }

    async fn find_line_once(
        &self,
        quote_id: &QuoteId,
        line_id: &QuoteLineId,
    ) -> Result<QuoteLine, EngineError> {
        self.stores.quotes.find_line(quote_id, line_id).await?.ok_or_else(|| {
            PricingNotFound::LineNotFound {
                quote_id: quote_id.0.clone(),
                line_id: line_id.0.clone(),
            }
            .into()
        })
    }

    /// Checks that a tier or rule scope names an existing offering of its item.
    async fn validate_scope(&self, scope: &TierScope) -> Result<(), EngineError> {
        if scope.segment_id.0.trim().is_empty() {
            return Err(EngineError::InvalidInput("segment id must not be empty".to_string()));
        }
        let offering = retry_stale_reads(&self.retry, "catalog.find_offering", || {
            self.find_offering_once(&scope.offering_id)
        })
        .await?;
        if offering.item_id != scope.item_id {
            return Err(EngineError::InvalidInput(format!(
                "offering `{}` lists item `{}`, not `{}`",
                offering.id.0, offering.item_id.0, scope.item_id.0
            )));
        }
        Ok(())
    }

    fn reject_change(
        &self,
        entity: &'static str,
        id: &str,
        referenced_by: &'static str,
    ) -> EngineError {
        warn!(
            event_name = "engine.catalog.change_blocked",
            entity,
            id,
            referenced_by,
            "update rejected; record is referenced and immutable"
        );
        self.emit(
            audit_event("catalog.change_blocked", AuditCategory::Catalog, AuditOutcome::Rejected)
                .with_metadata("entity", entity)
                .with_metadata("id", id)
                .with_metadata("referenced_by", referenced_by),
        );
        EngineError::ReferentialIntegrity { entity, id: id.to_string(), referenced_by }
    }

    fn reject_delete(
        &self,
        entity: &'static str,
        id: &str,
        referenced_by: &'static str,
    ) -> EngineError {
        warn!(
            event_name = "engine.catalog.delete_blocked",
            entity,
            id,
            referenced_by,
            "delete rejected; record is still referenced"
        );
        self.emit(
            audit_event("catalog.delete_blocked", AuditCategory::Catalog, AuditOutcome::Rejected)
                .with_metadata("entity", entity)
                .with_metadata("id", id)
                .with_metadata("referenced_by", referenced_by),
        );
        EngineError::ReferentialIntegrity { entity, id: id.to_string(), referenced_by }
    }

    fn emit(&self, event: AuditEvent) {
        self.audit.emit(event);
    }
}

fn audit_event(event_type: &str, category: AuditCategory, outcome: AuditOutcome) -> AuditEvent {
    AuditEvent::new(Uuid::new_v4().to_string(), event_type, category, ACTOR, outcome)
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

fn validate_pricing(pricing: &TierPricing) -> Result<(), EngineError> {
    match pricing {
        TierPricing::FixedPrice(price) if *price < Decimal::ZERO => Err(EngineError::InvalidInput(
            format!("fixed price must be >= 0, got {price}"),
        )),
        TierPricing::MarginOverCost(margin) if *margin < Decimal::ZERO => Err(
            EngineError::InvalidInput(format!("margin must be >= 0, got {margin}")),
        ),
        _ => Ok(()),
    }
}

fn validate_shipping(shipping_amount: Decimal) -> Result<(), EngineError> {
    if shipping_amount < Decimal::ZERO {
        return Err(EngineError::InvalidInput(format!(
            "shipping amount must be >= 0, got {shipping_amount}"
        )));
    }
    Ok(())
}
