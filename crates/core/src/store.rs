//! Persistence seams consumed by the engine.
//!
//! Indexed reads (`list_*`, `active_*`, `count_*`) may be served from
//! eventually consistent secondary indexes; point lookups by id are expected
//! to be read-your-writes. The engine retries `NotFound` outcomes accordingly.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::batch::{Batch, BatchId};
use crate::domain::catalog::{Item, ItemId, OfferingId, ProviderOffering};
use crate::domain::discount::{DiscountPrompt, DiscountPromptId, DiscountScope};
use crate::domain::discount_rule::{DiscountRule, DiscountRuleId};
use crate::domain::quote::{Quote, QuoteId, QuoteLine, QuoteLineId, QuoteTotals};
use crate::domain::tier::{PriceTier, PriceTierId, TierScope};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("store decode failure: {0}")]
    Decode(String),
    #[error("store conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_item(&self, id: &ItemId) -> Result<Option<Item>, StoreError>;
    async fn save_item(&self, item: Item) -> Result<(), StoreError>;
    async fn delete_item(&self, id: &ItemId) -> Result<(), StoreError>;

    async fn find_offering(&self, id: &OfferingId)
        -> Result<Option<ProviderOffering>, StoreError>;
    async fn save_offering(&self, offering: ProviderOffering) -> Result<(), StoreError>;
    async fn delete_offering(&self, id: &OfferingId) -> Result<(), StoreError>;
    async fn count_offerings_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError>;

    async fn find_batch(
        &self,
        offering_id: &OfferingId,
        batch_id: &BatchId,
    ) -> Result<Option<Batch>, StoreError>;
    /// Batches of an offering ordered by batch id ascending.
    async fn list_batches(&self, offering_id: &OfferingId) -> Result<Vec<Batch>, StoreError>;
    async fn save_batch(&self, batch: Batch) -> Result<(), StoreError>;
    async fn delete_batch(
        &self,
        offering_id: &OfferingId,
        batch_id: &BatchId,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PriceTierStore: Send + Sync {
    /// Every tier of a scope regardless of status, ordered by lower bound.
    async fn list_tiers(&self, scope: &TierScope) -> Result<Vec<PriceTier>, StoreError>;
    async fn find_tier(&self, id: &PriceTierId) -> Result<Option<PriceTier>, StoreError>;
    async fn save_tier(&self, tier: PriceTier) -> Result<(), StoreError>;
    /// Active tiers whose range contains `quantity`.
    async fn active_tiers_for_quantity(
        &self,
        scope: &TierScope,
        quantity: Decimal,
    ) -> Result<Vec<PriceTier>, StoreError>;
    async fn count_tiers_for_offering(&self, offering_id: &OfferingId)
        -> Result<u64, StoreError>;
    async fn count_tiers_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait DiscountRuleStore: Send + Sync {
    /// Every rule of a scope regardless of status, ordered by lower bound.
    async fn list_rules(&self, scope: &TierScope) -> Result<Vec<DiscountRule>, StoreError>;
    async fn find_rule(&self, id: &DiscountRuleId) -> Result<Option<DiscountRule>, StoreError>;
    async fn save_rule(&self, rule: DiscountRule) -> Result<(), StoreError>;
    /// Active rules whose range contains `subtotal`.
    async fn active_rules_for_subtotal(
        &self,
        scope: &TierScope,
        subtotal: Decimal,
    ) -> Result<Vec<DiscountRule>, StoreError>;
    async fn count_rules_for_offering(&self, offering_id: &OfferingId)
        -> Result<u64, StoreError>;
    async fn count_rules_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait DiscountPromptStore: Send + Sync {
    async fn find_prompt(&self, id: &DiscountPromptId)
        -> Result<Option<DiscountPrompt>, StoreError>;
    async fn save_prompt(&self, prompt: DiscountPrompt) -> Result<(), StoreError>;
    /// Active prompts bound to exactly this scope and target.
    async fn active_prompts(&self, scope: &DiscountScope)
        -> Result<Vec<DiscountPrompt>, StoreError>;
    /// Prompts of any status bound to this scope and target.
    async fn count_prompts(&self, scope: &DiscountScope) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError>;
    /// Fails with [`StoreError::Conflict`] when the id is taken.
    async fn create_quote(&self, quote: Quote) -> Result<(), StoreError>;
    async fn list_lines(&self, quote_id: &QuoteId) -> Result<Vec<QuoteLine>, StoreError>;
    async fn find_line(
        &self,
        quote_id: &QuoteId,
        line_id: &QuoteLineId,
    ) -> Result<Option<QuoteLine>, StoreError>;
    async fn save_line(&self, line: QuoteLine) -> Result<(), StoreError>;
    async fn delete_line(&self, quote_id: &QuoteId, line_id: &QuoteLineId)
        -> Result<(), StoreError>;
    async fn count_lines_for_offering(&self, offering_id: &OfferingId)
        -> Result<u64, StoreError>;
    async fn count_lines_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError>;
    async fn count_lines_for_batch(
        &self,
        offering_id: &OfferingId,
        batch_id: &BatchId,
    ) -> Result<u64, StoreError>;
    /// Writes shipping and totals only if the stored version still equals
    /// `expected_version`, bumping it by one. Returns `false` on a version miss.
    async fn save_totals(
        &self,
        quote_id: &QuoteId,
        expected_version: i64,
        shipping_amount: Decimal,
        totals: QuoteTotals,
    ) -> Result<bool, StoreError>;
}

/// The stores the engine reads and writes, usually backed by one value.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn CatalogStore>,
    pub tiers: Arc<dyn PriceTierStore>,
    pub rules: Arc<dyn DiscountRuleStore>,
    pub prompts: Arc<dyn DiscountPromptStore>,
    pub quotes: Arc<dyn QuoteStore>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CatalogStore
            + PriceTierStore
            + DiscountRuleStore
            + DiscountPromptStore
            + QuoteStore
            + 'static,
    {
        Self {
            catalog: store.clone(),
            tiers: store.clone(),
            rules: store.clone(),
            prompts: store.clone(),
            quotes: store,
        }
    }
}
