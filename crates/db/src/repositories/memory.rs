use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use rfq_core::domain::batch::{Batch, BatchId};
use rfq_core::domain::catalog::{Item, ItemId, OfferingId, ProviderOffering};
use rfq_core::domain::discount::{DiscountPrompt, DiscountPromptId, DiscountScope, PromptStatus};
use rfq_core::domain::discount_rule::{DiscountRule, DiscountRuleId};
use rfq_core::domain::quote::{Quote, QuoteId, QuoteLine, QuoteLineId, QuoteTotals};
use rfq_core::domain::tier::{PriceTier, PriceTierId, TierScope, TierStatus};
use rfq_core::store::{
    CatalogStore, DiscountPromptStore, DiscountRuleStore, PriceTierStore, QuoteStore, StoreError,
};

/// One value backing every store; reads are always consistent with writes.
#[derive(Default)]
pub struct InMemoryPricingStore {
    items: RwLock<HashMap<ItemId, Item>>,
    offerings: RwLock<HashMap<OfferingId, ProviderOffering>>,
    batches: RwLock<HashMap<(OfferingId, BatchId), Batch>>,
    tiers: RwLock<HashMap<PriceTierId, PriceTier>>,
    rules: RwLock<HashMap<DiscountRuleId, DiscountRule>>,
    prompts: RwLock<HashMap<DiscountPromptId, DiscountPrompt>>,
    quotes: RwLock<HashMap<QuoteId, Quote>>,
    lines: RwLock<HashMap<(QuoteId, QuoteLineId), QuoteLine>>,
}

impl InMemoryPricingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryPricingStore {
    async fn find_item(&self, id: &ItemId) -> Result<Option<Item>, StoreError> {
        let items = self.items.read().await;
        Ok(items.get(id).cloned())
    }

    async fn save_item(&self, item: Item) -> Result<(), StoreError> {
        let mut items = self.items.write().await;
        items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn delete_item(&self, id: &ItemId) -> Result<(), StoreError> {
        self.items.write().await.remove(id);
        Ok(())
    }

    async fn find_offering(
        &self,
        id: &OfferingId,
    ) -> Result<Option<ProviderOffering>, StoreError> {
        let offerings = self.offerings.read().await;
        Ok(offerings.get(id).cloned())
    }

    async fn save_offering(&self, offering: ProviderOffering) -> Result<(), StoreError> {
        let mut offerings = self.offerings.write().await;
        offerings.insert(offering.id.clone(), offering);
        Ok(())
    }

    async fn delete_offering(&self, id: &OfferingId) -> Result<(), StoreError> {
        self.offerings.write().await.remove(id);
        Ok(())
    }

    async fn count_offerings_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError> {
        let offerings = self.offerings.read().await;
        Ok(offerings.values().filter(|offering| &offering.item_id == item_id).count() as u64)
    }

    async fn find_batch(
        &self,
        offering_id: &OfferingId,
        batch_id: &BatchId,
    ) -> Result<Option<Batch>, StoreError> {
        let batches = self.batches.read().await;
        Ok(batches.get(&(offering_id.clone(), batch_id.clone())).cloned())
    }

    async fn list_batches(&self, offering_id: &OfferingId) -> Result<Vec<Batch>, StoreError> {
        let batches = self.batches.read().await;
        let mut listed: Vec<Batch> =
            batches.values().filter(|batch| &batch.offering_id == offering_id).cloned().collect();
        listed.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(listed)
    }

    async fn save_batch(&self, batch: Batch) -> Result<(), StoreError> {
        let mut batches = self.batches.write().await;
        batches.insert((batch.offering_id.clone(), batch.id.clone()), batch);
        Ok(())
    }

    async fn delete_batch(
        &self,
        offering_id: &OfferingId,
        batch_id: &BatchId,
    ) -> Result<(), StoreError> {
        self.batches.write().await.remove(&(offering_id.clone(), batch_id.clone()));
        Ok(())
    }
}

#[async_trait]
impl PriceTierStore for InMemoryPricingStore {
    async fn list_tiers(&self, scope: &TierScope) -> Result<Vec<PriceTier>, StoreError> {
        let tiers = self.tiers.read().await;
        let mut listed: Vec<PriceTier> =
            tiers.values().filter(|tier| &tier.scope == scope).cloned().collect();
        listed.sort_by(|left, right| {
            left.lower_bound.cmp(&right.lower_bound).then_with(|| left.id.cmp(&right.id))
        });
        Ok(listed)
    }

    async fn find_tier(&self, id: &PriceTierId) -> Result<Option<PriceTier>, StoreError> {
        let tiers = self.tiers.read().await;
        Ok(tiers.get(id).cloned())
    }

    async fn save_tier(&self, tier: PriceTier) -> Result<(), StoreError> {
        let mut tiers = self.tiers.write().await;
        tiers.insert(tier.id.clone(), tier);
        Ok(())
    }

    async fn active_tiers_for_quantity(
        &self,
        scope: &TierScope,
        quantity: Decimal,
    ) -> Result<Vec<PriceTier>, StoreError> {
        let listed = self.list_tiers(scope).await?;
        Ok(listed
            .into_iter()
            .filter(|tier| tier.status == TierStatus::Active && tier.contains(quantity))
            .collect())
    }

    async fn count_tiers_for_offering(
        &self,
        offering_id: &OfferingId,
    ) -> Result<u64, StoreError> {
        let tiers = self.tiers.read().await;
        Ok(tiers.values().filter(|tier| &tier.scope.offering_id == offering_id).count() as u64)
    }

    async fn count_tiers_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError> {
        let tiers = self.tiers.read().await;
        Ok(tiers.values().filter(|tier| &tier.scope.item_id == item_id).count() as u64)
    }
}

#[async_trait]
impl DiscountRuleStore for InMemoryPricingStore {
    async fn list_rules(&self, scope: &TierScope) -> Result<Vec<DiscountRule>, StoreError> {
        let rules = self.rules.read().await;
        let mut listed: Vec<DiscountRule> =
            rules.values().filter(|rule| &rule.scope == scope).cloned().collect();
        listed.sort_by(|left, right| {
            left.lower_bound.cmp(&right.lower_bound).then_with(|| left.id.cmp(&right.id))
        });
        Ok(listed)
    }

    async fn find_rule(&self, id: &DiscountRuleId) -> Result<Option<DiscountRule>, StoreError> {
        let rules = self.rules.read().await;
        Ok(rules.get(id).cloned())
    }

    async fn save_rule(&self, rule: DiscountRule) -> Result<(), StoreError> {
        let mut rules = self.rules.write().await;
        rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    async fn active_rules_for_subtotal(
        &self,
        scope: &TierScope,
        subtotal: Decimal,
    ) -> Result<Vec<DiscountRule>, StoreError> {
        let listed = self.list_rules(scope).await?;
        Ok(listed
            .into_iter()
            .filter(|rule| rule.status == TierStatus::Active && rule.contains(subtotal))
            .collect())
    }

    async fn count_rules_for_offering(
        &self,
        offering_id: &OfferingId,
    ) -> Result<u64, StoreError> {
        let rules = self.rules.read().await;
        Ok(rules.values().filter(|rule| &rule.scope.offering_id == offering_id).count() as u64)
    }

    async fn count_rules_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError> {
        let rules = self.rules.read().await;
        Ok(rules.values().filter(|rule| &rule.scope.item_id == item_id).count() as u64)
    }
}

#[async_trait]
impl DiscountPromptStore for InMemoryPricingStore {
    async fn find_prompt(
        &self,
        id: &DiscountPromptId,
    ) -> Result<Option<DiscountPrompt>, StoreError> {
        let prompts = self.prompts.read().await;
        Ok(prompts.get(id).cloned())
    }

    async fn save_prompt(&self, prompt: DiscountPrompt) -> Result<(), StoreError> {
        let mut prompts = self.prompts.write().await;
        prompts.insert(prompt.id.clone(), prompt);
        Ok(())
    }

    async fn active_prompts(
        &self,
        scope: &DiscountScope,
    ) -> Result<Vec<DiscountPrompt>, StoreError> {
        let prompts = self.prompts.read().await;
        let mut listed: Vec<DiscountPrompt> = prompts
            .values()
            .filter(|prompt| &prompt.scope == scope && prompt.status == PromptStatus::Active)
            .cloned()
            .collect();
        listed.sort_by(|left, right| {
            right.priority.cmp(&left.priority).then_with(|| left.id.cmp(&right.id))
        });
        Ok(listed)
    }

    async fn count_prompts(&self, scope: &DiscountScope) -> Result<u64, StoreError> {
        let prompts = self.prompts.read().await;
        Ok(prompts.values().filter(|prompt| &prompt.scope == scope).count() as u64)
    }
}

#[async_trait]
impl QuoteStore for InMemoryPricingStore {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        let quotes = self.quotes.read().await;
        Ok(quotes.get(id).cloned())
    }

    async fn create_quote(&self, quote: Quote) -> Result<(), StoreError> {
        let mut quotes = self.quotes.write().await;
        if quotes.contains_key(&quote.id) {
            return Err(StoreError::Conflict(format!("quote `{}` already exists", quote.id.0)));
        }
        quotes.insert(quote.id.clone(), quote);
        Ok(())
    }

    async fn list_lines(&self, quote_id: &QuoteId) -> Result<Vec<QuoteLine>, StoreError> {
        let lines = self.lines.read().await;
        let mut listed: Vec<QuoteLine> =
            lines.values().filter(|line| &line.quote_id == quote_id).cloned().collect();
        listed.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(listed)
    }

    async fn find_line(
        &self,
        quote_id: &QuoteId,
        line_id: &QuoteLineId,
    ) -> Result<Option<QuoteLine>, StoreError> {
        let lines = self.lines.read().await;
        Ok(lines.get(&(quote_id.clone(), line_id.clone())).cloned())
    }

    async fn save_line(&self, line: QuoteLine) -> Result<(), StoreError> {
        let mut lines = self.lines.write().await;
        lines.insert((line.quote_id.clone(), line.id.clone()), line);
        Ok(())
    }

    async fn delete_line(
        &self,
        quote_id: &QuoteId,
        line_id: &QuoteLineId,
    ) -> Result<(), StoreError> {
        self.lines.write().await.remove(&(quote_id.clone(), line_id.clone()));
        Ok(())
    }

    async fn count_lines_for_offering(
        &self,
        offering_id: &OfferingId,
    ) -> Result<u64, StoreError> {
        let lines = self.lines.read().await;
        Ok(lines.values().filter(|line| &line.offering_id == offering_id).count() as u64)
    }

    async fn count_lines_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError> {
        let lines = self.lines.read().await;
        Ok(lines.values().filter(|line| &line.item_id == item_id).count() as u64)
    }

    async fn count_lines_for_batch(
        &self,
        offering_id: &OfferingId,
        batch_id: &BatchId,
    ) -> Result<u64, StoreError> {
        let lines = self.lines.read().await;
        Ok(lines
            .values()
            .filter(|line| {
                &line.offering_id == offering_id && line.batch_id.as_ref() == Some(batch_id)
            })
            .count() as u64)
    }

    async fn save_totals(
        &self,
        quote_id: &QuoteId,
        expected_version: i64,
        shipping_amount: Decimal,
        totals: QuoteTotals,
    ) -> Result<bool, StoreError> {
        let mut quotes = self.quotes.write().await;
        let Some(quote) = quotes.get_mut(quote_id) else {
            return Ok(false);
        };
        if quote.version != expected_version {
            return Ok(false);
        }
        quote.shipping_amount = shipping_amount;
        quote.totals = totals;
        quote.version += 1;
        quote.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use rfq_core::domain::quote::{Quote, QuoteId, QuoteTotals};
    use rfq_core::store::{QuoteStore, StoreError};

    use super::InMemoryPricingStore;

    #[tokio::test]
    async fn create_quote_rejects_taken_id() {
        let store = InMemoryPricingStore::new();
        let id = QuoteId("Q-1".to_string());
        store.create_quote(Quote::new(id.clone(), Decimal::ZERO)).await.expect("create");

        let second = store.create_quote(Quote::new(id, Decimal::ONE)).await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn save_totals_is_guarded_by_version() {
        let store = InMemoryPricingStore::new();
        let id = QuoteId("Q-2".to_string());
        store.create_quote(Quote::new(id.clone(), Decimal::ZERO)).await.expect("create");
        let totals = QuoteTotals {
            total_amount: Decimal::from(300),
            total_discount: Decimal::from(10),
            final_total: Decimal::from(300),
        };

        assert!(store.save_totals(&id, 0, Decimal::from(10), totals).await.expect("first"));
        assert!(!store.save_totals(&id, 0, Decimal::from(10), totals).await.expect("stale"));

        let quote = store.find_quote(&id).await.expect("find").expect("quote");
        assert_eq!(quote.version, 1);
        assert_eq!(quote.totals.final_total, Decimal::from(300));
    }
}
