use async_trait::async_trait;
use rfq_core::domain::catalog::{ItemId, OfferingId};
use rfq_core::domain::discount_rule::{DiscountRule, DiscountRuleId};
use rfq_core::domain::tier::{TierScope, TierStatus};
use rfq_core::store::{DiscountRuleStore, StoreError};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use super::{db_error, decode_error, parse_decimal, parse_optional_decimal, parse_timestamp};
use crate::DbPool;

const RULE_COLUMNS: &str = r#"
    SELECT
        id, item_id, offering_id, segment_id, lower_bound, upper_bound,
        max_discount_pct, status, created_at, updated_at
    FROM discount_rule
"#;

/// Subtotal bounds are decimal text like tier bounds; filtering and ordering
/// happen after decoding.
pub struct SqlDiscountRuleRepository {
    pool: DbPool,
}

impl SqlDiscountRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn count_where(&self, column: &str, value: &str) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM discount_rule WHERE {column} = ?"))
                .bind(value)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl DiscountRuleStore for SqlDiscountRuleRepository {
    async fn list_rules(&self, scope: &TierScope) -> Result<Vec<DiscountRule>, StoreError> {
        let rows = sqlx::query(&format!(
            "{RULE_COLUMNS} WHERE item_id = ? AND offering_id = ? AND segment_id = ?"
        ))
        .bind(&scope.item_id.0)
        .bind(&scope.offering_id.0)
        .bind(&scope.segment_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut rules = rows.iter().map(rule_from_row).collect::<Result<Vec<_>, _>>()?;
        rules.sort_by(|left, right| {
            left.lower_bound.cmp(&right.lower_bound).then_with(|| left.id.cmp(&right.id))
        });
        Ok(rules)
    }

    async fn find_rule(&self, id: &DiscountRuleId) -> Result<Option<DiscountRule>, StoreError> {
        let row = sqlx::query(&format!("{RULE_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|value| rule_from_row(&value)).transpose()
    }

    async fn save_rule(&self, rule: DiscountRule) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO discount_rule (
                id, item_id, offering_id, segment_id, lower_bound, upper_bound,
                max_discount_pct, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                lower_bound = excluded.lower_bound,
                upper_bound = excluded.upper_bound,
                max_discount_pct = excluded.max_discount_pct,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&rule.id.0)
        .bind(&rule.scope.item_id.0)
        .bind(&rule.scope.offering_id.0)
        .bind(&rule.scope.segment_id.0)
        .bind(rule.lower_bound.to_string())
        .bind(rule.upper_bound.map(|upper| upper.to_string()))
        .bind(rule.max_discount_pct.to_string())
        .bind(rule.status.as_str())
        .bind(rule.created_at.to_rfc3339())
        .bind(rule.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn active_rules_for_subtotal(
        &self,
        scope: &TierScope,
        subtotal: Decimal,
    ) -> Result<Vec<DiscountRule>, StoreError> {
        let rules = self.list_rules(scope).await?;
        Ok(rules
            .into_iter()
            .filter(|rule| rule.status == TierStatus::Active && rule.contains(subtotal))
            .collect())
    }

    async fn count_rules_for_offering(
        &self,
        offering_id: &OfferingId,
    ) -> Result<u64, StoreError> {
        self.count_where("offering_id", &offering_id.0).await
    }

    async fn count_rules_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError> {
        self.count_where("item_id", &item_id.0).await
    }
}

fn rule_from_row(row: &SqliteRow) -> Result<DiscountRule, StoreError> {
    let lower_bound: String = row.try_get("lower_bound").map_err(db_error)?;
    let max_discount_pct: String = row.try_get("max_discount_pct").map_err(db_error)?;
    let status: String = row.try_get("status").map_err(db_error)?;
    let created_at: String = row.try_get("created_at").map_err(db_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(db_error)?;

    Ok(DiscountRule {
        id: DiscountRuleId(row.try_get("id").map_err(db_error)?),
        scope: TierScope::new(
            row.try_get::<String, _>("item_id").map_err(db_error)?,
            row.try_get::<String, _>("offering_id").map_err(db_error)?,
            row.try_get::<String, _>("segment_id").map_err(db_error)?,
        ),
        lower_bound: parse_decimal("discount_rule.lower_bound", &lower_bound)?,
        upper_bound: parse_optional_decimal(
            "discount_rule.upper_bound",
            row.try_get("upper_bound").map_err(db_error)?,
        )?,
        max_discount_pct: parse_decimal("discount_rule.max_discount_pct", &max_discount_pct)?,
        status: TierStatus::parse(&status)
            .ok_or_else(|| decode_error(format!("unknown discount rule status `{status}`")))?,
        created_at: parse_timestamp("discount_rule.created_at", &created_at)?,
        updated_at: parse_timestamp("discount_rule.updated_at", &updated_at)?,
    })
}
