use rfq_core::cpq::batch_cost::BatchInput;
use rfq_core::domain::batch::BatchId;
use rfq_core::domain::catalog::{Item, ItemId, OfferingId, ProviderOffering, SegmentId};
use rfq_core::domain::discount::{
    DiscountPromptId, DiscountPromptInput, DiscountScope, DiscountTier, PromptStatus,
};
use rfq_core::domain::quote::{QuoteId, QuoteLineId};
use rfq_core::domain::tier::{NewPriceTier, TierPricing, TierScope, TierStatus};
use rfq_core::errors::EngineError;
use rfq_core::store::StoreError;
use rfq_core::{ConditionContext, PriceLineRequest, PricingEngine};
use rust_decimal::Decimal;
use tracing::info;

use crate::connection::DbPool;
use crate::repositories::{parse_decimal, RepositoryError};

const SEGMENT: &str = "seg-retail";

const SEED_ITEMS: &[SeedItem] = &[
    SeedItem { id: "item-bolt", name: "Hex bolt M8", unit_of_measure: "box" },
    SeedItem { id: "item-cable", name: "Copper cable 2.5mm", unit_of_measure: "m" },
];

const SEED_OFFERINGS: &[SeedOffering] = &[
    SeedOffering {
        id: "off-bolt-acme",
        item_id: "item-bolt",
        provider_id: "acme-fasteners",
        base_price: (900, 2),
        batch_id: "batch-bolt-001",
        base_cost: (600, 2),
        freight_cost: (50, 2),
        additional_cost: (25, 2),
        guardrail_margin_pct: (20, 0),
        slow_move_item: false,
        tiers: &[(0, TierKind::Fixed, (1000, 2)), (100, TierKind::Fixed, (900, 2))],
    },
    SeedOffering {
        id: "off-cable-volt",
        item_id: "item-cable",
        provider_id: "voltline",
        base_price: (110, 2),
        batch_id: "batch-cable-001",
        base_cost: (80, 2),
        freight_cost: (10, 2),
        additional_cost: (0, 0),
        guardrail_margin_pct: (15, 0),
        slow_move_item: true,
        tiers: &[(0, TierKind::Margin, (25, 0)), (1000, TierKind::Margin, (20, 0))],
    },
];

const SEED_PROMPT_IDS: &[&str] = &["prompt-global-volume", "prompt-bolt-contractor"];

/// Demo quote: 30 boxes at 10.00 with a requested 5% discount and 10.00 shipping.
const SEED_QUOTE_ID: &str = "quote-demo-001";
const SEED_LINE_ID: &str = "line-demo-001";
const SEED_QUOTE_FINAL_TOTAL: (i64, u32) = (295, 0);

/// Deterministic catalog, tier chains, discount prompts and one priced quote.
///
/// Everything is written through the engine so derived values (batch costs,
/// tier upper bounds, line amounts, totals) come out of the same code paths
/// the CLI uses. Loading twice is a no-op.
pub struct DemoCatalogDataset;

impl DemoCatalogDataset {
    pub async fn load(engine: &PricingEngine) -> Result<SeedResult, EngineError> {
        let mut result = SeedResult::default();

        for item in SEED_ITEMS {
            engine
                .save_item(Item {
                    id: ItemId(item.id.to_string()),
                    name: item.name.to_string(),
                    unit_of_measure: item.unit_of_measure.to_string(),
                })
                .await?;
            result.items += 1;
        }

        for offering in SEED_OFFERINGS {
            engine
                .save_offering(ProviderOffering {
                    id: OfferingId(offering.id.to_string()),
                    item_id: ItemId(offering.item_id.to_string()),
                    provider_id: offering.provider_id.to_string(),
                    base_price: decimal(offering.base_price),
                })
                .await?;
            result.offerings += 1;

            engine
                .save_batch(BatchInput {
                    id: Some(BatchId(offering.batch_id.to_string())),
                    offering_id: Some(OfferingId(offering.id.to_string())),
                    base_cost: Some(decimal(offering.base_cost)),
                    freight_cost: Some(decimal(offering.freight_cost)),
                    additional_cost: Some(decimal(offering.additional_cost)),
                    guardrail_margin_pct: Some(decimal(offering.guardrail_margin_pct)),
                    in_stock: Some(true),
                    slow_move_item: Some(offering.slow_move_item),
                    ..BatchInput::default()
                })
                .await?;
            result.batches += 1;

            let scope = offering.scope();
            if engine.price_tiers(&scope).await?.is_empty() {
                for (lower_bound, kind, value) in offering.tiers {
                    engine
                        .insert_price_tier(NewPriceTier {
                            scope: scope.clone(),
                            lower_bound: Decimal::from(*lower_bound),
                            pricing: kind.pricing(decimal(*value)),
                            status: TierStatus::Active,
                        })
                        .await?;
                    result.tiers += 1;
                }
            }
        }

        engine
            .save_discount_prompt(DiscountPromptInput {
                id: Some(DiscountPromptId(SEED_PROMPT_IDS[0].to_string())),
                scope: Some(DiscountScope::Global),
                prompt: Some("Volume discount on any line".to_string()),
                conditions: Some(Vec::new()),
                rules: vec![
                    DiscountTier::new(Decimal::ZERO, Some(Decimal::from(1000)), Decimal::from(5)),
                    DiscountTier::new(Decimal::from(1000), None, Decimal::from(10)),
                ],
                priority: Some(0),
                status: Some(PromptStatus::Active),
            })
            .await?;
        engine
            .save_discount_prompt(DiscountPromptInput {
                id: Some(DiscountPromptId(SEED_PROMPT_IDS[1].to_string())),
                scope: Some(DiscountScope::Item(ItemId("item-bolt".to_string()))),
                prompt: Some("Contractor pricing on bolts".to_string()),
                conditions: Some(vec!["customer_tier=contractor".to_string()]),
                rules: vec![DiscountTier::new(Decimal::ZERO, None, Decimal::from(12))],
                priority: Some(10),
                status: Some(PromptStatus::Active),
            })
            .await?;
        result.prompts = SEED_PROMPT_IDS.len();

        let quote_id = QuoteId(SEED_QUOTE_ID.to_string());
        match engine.create_quote(Some(quote_id.clone()), Decimal::from(10)).await {
            Ok(_) => {
                engine
                    .price_line(PriceLineRequest {
                        quote_id: quote_id.clone(),
                        line_id: Some(QuoteLineId(SEED_LINE_ID.to_string())),
                        item_id: ItemId("item-bolt".to_string()),
                        offering_id: OfferingId("off-bolt-acme".to_string()),
                        segment_id: SegmentId(SEGMENT.to_string()),
                        batch_id: None,
                        quantity: Decimal::from(30),
                        requested_discount_pct: Some(Decimal::from(5)),
                        context: ConditionContext::new(),
                    })
                    .await?;
                result.quotes += 1;
            }
            Err(EngineError::Store(StoreError::Conflict(_))) => {}
            Err(error) => return Err(error),
        }

        info!(
            event_name = "db.seed.loaded",
            items = result.items,
            tiers = result.tiers,
            prompts = result.prompts,
            quotes = result.quotes,
            "demo catalog seeded"
        );
        Ok(result)
    }

    /// Verify that seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for item in SEED_ITEMS {
            let exists: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM item WHERE id = ?1)")
                    .bind(item.id)
                    .fetch_one(pool)
                    .await?;
            checks.push((item.id, exists == 1));
        }

        for offering in SEED_OFFERINGS {
            let batch_exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM batch WHERE offering_id = ?1 AND id = ?2)",
            )
            .bind(offering.id)
            .bind(offering.batch_id)
            .fetch_one(pool)
            .await?;
            checks.push((offering.batch_id, batch_exists == 1));

            let tier_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM price_tier WHERE offering_id = ?1 AND segment_id = ?2",
            )
            .bind(offering.id)
            .bind(SEGMENT)
            .fetch_one(pool)
            .await?;
            checks.push((offering.tier_label(), tier_count == offering.tiers.len() as i64));

            let open_tails: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM price_tier WHERE offering_id = ?1 AND upper_bound IS NULL",
            )
            .bind(offering.id)
            .fetch_one(pool)
            .await?;
            checks.push((offering.open_tail_label(), open_tails == 1));
        }

        for prompt_id in SEED_PROMPT_IDS {
            let active: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM discount_prompt WHERE id = ?1 AND status = 'active')",
            )
            .bind(*prompt_id)
            .fetch_one(pool)
            .await?;
            checks.push((*prompt_id, active == 1));
        }

        let final_total: Option<String> =
            sqlx::query_scalar("SELECT final_total FROM quote WHERE id = ?1")
                .bind(SEED_QUOTE_ID)
                .fetch_optional(pool)
                .await?;
        let totals_ok = match final_total {
            Some(raw) => parse_decimal("quote.final_total", &raw)
                .map(|total| total == decimal(SEED_QUOTE_FINAL_TOTAL))
                .map_err(|error| RepositoryError::Decode(error.to_string()))?,
            None => false,
        };
        checks.push((SEED_QUOTE_ID, totals_ok));

        let line_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM quote_line WHERE quote_id = ?1")
                .bind(SEED_QUOTE_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("quote-demo-line-count", line_count == 1));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove seeded rows, children first.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM quote WHERE id = ?1")
            .bind(SEED_QUOTE_ID)
            .execute(&mut *tx)
            .await?;
        for prompt_id in SEED_PROMPT_IDS {
            sqlx::query("DELETE FROM discount_prompt WHERE id = ?1")
                .bind(*prompt_id)
                .execute(&mut *tx)
                .await?;
        }
        for offering in SEED_OFFERINGS {
            sqlx::query("DELETE FROM price_tier WHERE offering_id = ?1")
                .bind(offering.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM batch WHERE offering_id = ?1")
                .bind(offering.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM provider_offering WHERE id = ?1")
                .bind(offering.id)
                .execute(&mut *tx)
                .await?;
        }
        for item in SEED_ITEMS {
            sqlx::query("DELETE FROM item WHERE id = ?1").bind(item.id).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedItem {
    id: &'static str,
    name: &'static str,
    unit_of_measure: &'static str,
}

#[derive(Debug, Clone, Copy)]
enum TierKind {
    Fixed,
    Margin,
}

impl TierKind {
    fn pricing(self, value: Decimal) -> TierPricing {
        match self {
            Self::Fixed => TierPricing::FixedPrice(value),
            Self::Margin => TierPricing::MarginOverCost(value),
        }
    }
}

/// Decimals as `(mantissa, scale)` so the table stays const.
#[derive(Debug, Clone, Copy)]
struct SeedOffering {
    id: &'static str,
    item_id: &'static str,
    provider_id: &'static str,
    base_price: (i64, u32),
    batch_id: &'static str,
    base_cost: (i64, u32),
    freight_cost: (i64, u32),
    additional_cost: (i64, u32),
    guardrail_margin_pct: (i64, u32),
    slow_move_item: bool,
    tiers: &'static [(i64, TierKind, (i64, u32))],
}

impl SeedOffering {
    fn scope(&self) -> TierScope {
        TierScope::new(self.item_id, self.id, SEGMENT)
    }

    fn tier_label(&self) -> &'static str {
        match self.id {
            "off-bolt-acme" => "tiers-bolt-count",
            _ => "tiers-cable-count",
        }
    }

    fn open_tail_label(&self) -> &'static str {
        match self.id {
            "off-bolt-acme" => "tiers-bolt-open-tail",
            _ => "tiers-cable-open-tail",
        }
    }
}

fn decimal((mantissa, scale): (i64, u32)) -> Decimal {
    Decimal::new(mantissa, scale)
}

#[derive(Debug, Default)]
pub struct SeedResult {
    pub items: usize,
    pub offerings: usize,
    pub batches: usize,
    pub tiers: usize,
    pub prompts: usize,
    pub quotes: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rfq_core::config::EngineConfig;
    use rfq_core::domain::quote::QuoteId;
    use rfq_core::PricingEngine;
    use rust_decimal::Decimal;

    use super::{DemoCatalogDataset, SEED_QUOTE_ID};
    use crate::repositories::{sql_stores, InMemoryPricingStore};
    use crate::{connect_with_settings, migrations};
    use rfq_core::store::Stores;

    #[tokio::test]
    async fn seed_prices_demo_quote_through_engine() {
        let engine = PricingEngine::new(
            Stores::shared(Arc::new(InMemoryPricingStore::new())),
            EngineConfig::default(),
        );

        let seeded = DemoCatalogDataset::load(&engine).await.expect("seed");
        assert_eq!(seeded.items, 2);
        assert_eq!(seeded.tiers, 4);
        assert_eq!(seeded.quotes, 1);

        let quote = engine.quote(&QuoteId(SEED_QUOTE_ID.to_string())).await.expect("quote");
        assert_eq!(quote.totals.total_amount, Decimal::from(300));
        assert_eq!(quote.totals.total_discount, Decimal::from(15));
        assert_eq!(quote.totals.final_total, Decimal::from(295));
    }

    #[tokio::test]
    async fn seed_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let engine = PricingEngine::new(sql_stores(pool.clone()), EngineConfig::default());

        DemoCatalogDataset::load(&engine).await.expect("first load");
        let second = DemoCatalogDataset::load(&engine).await.expect("second load");
        assert_eq!(second.tiers, 0);
        assert_eq!(second.quotes, 0);

        let verified = DemoCatalogDataset::verify(&pool).await.expect("verify");
        assert!(verified.all_present, "failed checks: {:?}", verified.checks);

        DemoCatalogDataset::clean(&pool).await.expect("clean");
        let verified = DemoCatalogDataset::verify(&pool).await.expect("verify after clean");
        assert!(!verified.all_present);
    }

    #[tokio::test]
    async fn seeded_file_database_survives_reconnect() {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("seed.db").display());

        let pool = connect_with_settings(&url, 2, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let engine = PricingEngine::new(sql_stores(pool.clone()), EngineConfig::default());
        DemoCatalogDataset::load(&engine).await.expect("load");
        pool.close().await;

        let reopened = connect_with_settings(&url, 2, 30).await.expect("reconnect");
        migrations::run_pending(&reopened).await.expect("migrations are already applied");
        let verified = DemoCatalogDataset::verify(&reopened).await.expect("verify");
        assert!(verified.all_present, "failed checks: {:?}", verified.checks);
    }
}
