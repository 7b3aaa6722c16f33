use async_trait::async_trait;
use rfq_core::domain::catalog::{ItemId, OfferingId};
use rfq_core::domain::tier::{PriceTier, PriceTierId, TierPricing, TierScope, TierStatus};
use rfq_core::store::{PriceTierStore, StoreError};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use super::{db_error, decode_error, parse_decimal, parse_optional_decimal, parse_timestamp};
use crate::DbPool;

/// Bounds are stored as decimal text, so range checks and ordering happen
/// after decoding rather than in SQL.
pub struct SqlPriceTierRepository {
    pool: DbPool,
}

impl SqlPriceTierRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn scope_rows(
        &self,
        scope: &TierScope,
        status: Option<TierStatus>,
    ) -> Result<Vec<PriceTier>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, item_id, offering_id, segment_id, lower_bound, upper_bound,
                pricing_kind, pricing_value, status, created_at, updated_at
            FROM price_tier
            WHERE item_id = ? AND offering_id = ? AND segment_id = ?
              AND (? IS NULL OR status = ?)
            "#,
        )
        .bind(&scope.item_id.0)
        .bind(&scope.offering_id.0)
        .bind(&scope.segment_id.0)
        .bind(status.map(|value| value.as_str()))
        .bind(status.map(|value| value.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut tiers = rows.iter().map(tier_from_row).collect::<Result<Vec<_>, _>>()?;
        tiers.sort_by(|left, right| {
            left.lower_bound.cmp(&right.lower_bound).then_with(|| left.id.cmp(&right.id))
        });
        Ok(tiers)
    }
}

#[async_trait]
impl PriceTierStore for SqlPriceTierRepository {
    async fn list_tiers(&self, scope: &TierScope) -> Result<Vec<PriceTier>, StoreError> {
        self.scope_rows(scope, None).await
    }

    async fn find_tier(&self, id: &PriceTierId) -> Result<Option<PriceTier>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, item_id, offering_id, segment_id, lower_bound, upper_bound,
                pricing_kind, pricing_value, status, created_at, updated_at
            FROM price_tier
            WHERE id = ?
            "#,
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|value| tier_from_row(&value)).transpose()
    }

    async fn save_tier(&self, tier: PriceTier) -> Result<(), StoreError> {
        let (pricing_kind, pricing_value) = pricing_parts(tier.pricing);
        sqlx::query(
            r#"
            INSERT INTO price_tier (
                id, item_id, offering_id, segment_id, lower_bound, upper_bound,
                pricing_kind, pricing_value, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                item_id = excluded.item_id,
                offering_id = excluded.offering_id,
                segment_id = excluded.segment_id,
                lower_bound = excluded.lower_bound,
                upper_bound = excluded.upper_bound,
                pricing_kind = excluded.pricing_kind,
                pricing_value = excluded.pricing_value,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&tier.id.0)
        .bind(&tier.scope.item_id.0)
        .bind(&tier.scope.offering_id.0)
        .bind(&tier.scope.segment_id.0)
        .bind(tier.lower_bound.to_string())
        .bind(tier.upper_bound.map(|upper| upper.to_string()))
        .bind(pricing_kind)
        .bind(pricing_value.to_string())
        .bind(tier.status.as_str())
        .bind(tier.created_at.to_rfc3339())
        .bind(tier.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn active_tiers_for_quantity(
        &self,
        scope: &TierScope,
        quantity: Decimal,
    ) -> Result<Vec<PriceTier>, StoreError> {
        let tiers = self.scope_rows(scope, Some(TierStatus::Active)).await?;
        Ok(tiers.into_iter().filter(|tier| tier.contains(quantity)).collect())
    }

    async fn count_tiers_for_offering(
        &self,
        offering_id: &OfferingId,
    ) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM price_tier WHERE offering_id = ?")
                .bind(&offering_id.0)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }

    async fn count_tiers_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_tier WHERE item_id = ?")
            .bind(&item_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }
}

fn pricing_parts(pricing: TierPricing) -> (&'static str, Decimal) {
    match pricing {
        TierPricing::FixedPrice(value) => ("fixed_price", value),
        TierPricing::MarginOverCost(value) => ("margin_over_cost", value),
    }
}

fn tier_from_row(row: &SqliteRow) -> Result<PriceTier, StoreError> {
    let lower_bound: String = row.try_get("lower_bound").map_err(db_error)?;
    let pricing_kind: String = row.try_get("pricing_kind").map_err(db_error)?;
    let pricing_value: String = row.try_get("pricing_value").map_err(db_error)?;
    let pricing_value = parse_decimal("price_tier.pricing_value", &pricing_value)?;
    let pricing = match pricing_kind.as_str() {
        "fixed_price" => TierPricing::FixedPrice(pricing_value),
        "margin_over_cost" => TierPricing::MarginOverCost(pricing_value),
        other => return Err(decode_error(format!("unknown pricing kind `{other}`"))),
    };
    let status: String = row.try_get("status").map_err(db_error)?;
    let created_at: String = row.try_get("created_at").map_err(db_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(db_error)?;

    Ok(PriceTier {
        id: PriceTierId(row.try_get("id").map_err(db_error)?),
        scope: TierScope::new(
            row.try_get::<String, _>("item_id").map_err(db_error)?,
            row.try_get::<String, _>("offering_id").map_err(db_error)?,
            row.try_get::<String, _>("segment_id").map_err(db_error)?,
        ),
        lower_bound: parse_decimal("price_tier.lower_bound", &lower_bound)?,
        upper_bound: parse_optional_decimal(
            "price_tier.upper_bound",
            row.try_get("upper_bound").map_err(db_error)?,
        )?,
        pricing,
        status: TierStatus::parse(&status)
            .ok_or_else(|| decode_error(format!("unknown tier status `{status}`")))?,
        created_at: parse_timestamp("price_tier.created_at", &created_at)?,
        updated_at: parse_timestamp("price_tier.updated_at", &updated_at)?,
    })
}
