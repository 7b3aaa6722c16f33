use async_trait::async_trait;
use rfq_core::domain::batch::{Batch, BatchCosts, BatchId};
use rfq_core::domain::catalog::{Item, ItemId, OfferingId, ProviderOffering};
use rfq_core::store::{CatalogStore, StoreError};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use super::{db_error, parse_decimal, parse_optional_timestamp, parse_timestamp};
use crate::DbPool;

pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for SqlCatalogRepository {
    async fn find_item(&self, id: &ItemId) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query("SELECT id, name, unit_of_measure FROM item WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|value| item_from_row(&value)).transpose()
    }

    async fn save_item(&self, item: Item) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO item (id, name, unit_of_measure) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                unit_of_measure = excluded.unit_of_measure
            "#,
        )
        .bind(&item.id.0)
        .bind(&item.name)
        .bind(&item.unit_of_measure)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete_item(&self, id: &ItemId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM item WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn find_offering(
        &self,
        id: &OfferingId,
    ) -> Result<Option<ProviderOffering>, StoreError> {
        let row = sqlx::query(
            "SELECT id, item_id, provider_id, base_price FROM provider_offering WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|value| offering_from_row(&value)).transpose()
    }

    async fn save_offering(&self, offering: ProviderOffering) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO provider_offering (id, item_id, provider_id, base_price)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                item_id = excluded.item_id,
                provider_id = excluded.provider_id,
                base_price = excluded.base_price
            "#,
        )
        .bind(&offering.id.0)
        .bind(&offering.item_id.0)
        .bind(&offering.provider_id)
        .bind(offering.base_price.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete_offering(&self, id: &OfferingId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM provider_offering WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn count_offerings_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM provider_offering WHERE item_id = ?")
                .bind(&item_id.0)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }

    async fn find_batch(
        &self,
        offering_id: &OfferingId,
        batch_id: &BatchId,
    ) -> Result<Option<Batch>, StoreError> {
        let row = sqlx::query(&format!("{BATCH_COLUMNS} WHERE offering_id = ? AND id = ?"))
            .bind(&offering_id.0)
            .bind(&batch_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|value| batch_from_row(&value)).transpose()
    }

    async fn list_batches(&self, offering_id: &OfferingId) -> Result<Vec<Batch>, StoreError> {
        let rows = sqlx::query(&format!("{BATCH_COLUMNS} WHERE offering_id = ? ORDER BY id ASC"))
            .bind(&offering_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(batch_from_row).collect()
    }

    async fn save_batch(&self, batch: Batch) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO batch (
                offering_id, id, item_id, base_cost, freight_cost, additional_cost,
                guardrail_margin_pct, total_cost, guardrail_price, in_stock, slow_move_item,
                produced_at, expires_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(offering_id, id) DO UPDATE SET
                item_id = excluded.item_id,
                base_cost = excluded.base_cost,
                freight_cost = excluded.freight_cost,
                additional_cost = excluded.additional_cost,
                guardrail_margin_pct = excluded.guardrail_margin_pct,
                total_cost = excluded.total_cost,
                guardrail_price = excluded.guardrail_price,
                in_stock = excluded.in_stock,
                slow_move_item = excluded.slow_move_item,
                produced_at = excluded.produced_at,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&batch.offering_id.0)
        .bind(&batch.id.0)
        .bind(&batch.item_id.0)
        .bind(batch.costs.base_cost.to_string())
        .bind(batch.costs.freight_cost.to_string())
        .bind(batch.costs.additional_cost.to_string())
        .bind(batch.costs.guardrail_margin_pct.to_string())
        .bind(batch.total_cost.to_string())
        .bind(batch.guardrail_price.to_string())
        .bind(batch.in_stock)
        .bind(batch.slow_move_item)
        .bind(batch.produced_at.map(|at| at.to_rfc3339()))
        .bind(batch.expires_at.map(|at| at.to_rfc3339()))
        .bind(batch.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete_batch(
        &self,
        offering_id: &OfferingId,
        batch_id: &BatchId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM batch WHERE offering_id = ? AND id = ?")
            .bind(&offering_id.0)
            .bind(&batch_id.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

const BATCH_COLUMNS: &str = r#"
    SELECT
        offering_id, id, item_id, base_cost, freight_cost, additional_cost,
        guardrail_margin_pct, total_cost, guardrail_price, in_stock, slow_move_item,
        produced_at, expires_at, updated_at
    FROM batch
"#;

fn item_from_row(row: &SqliteRow) -> Result<Item, StoreError> {
    Ok(Item {
        id: ItemId(row.try_get("id").map_err(db_error)?),
        name: row.try_get("name").map_err(db_error)?,
        unit_of_measure: row.try_get("unit_of_measure").map_err(db_error)?,
    })
}

fn offering_from_row(row: &SqliteRow) -> Result<ProviderOffering, StoreError> {
    let base_price: String = row.try_get("base_price").map_err(db_error)?;
    Ok(ProviderOffering {
        id: OfferingId(row.try_get("id").map_err(db_error)?),
        item_id: ItemId(row.try_get("item_id").map_err(db_error)?),
        provider_id: row.try_get("provider_id").map_err(db_error)?,
        base_price: parse_decimal("provider_offering.base_price", &base_price)?,
    })
}

fn batch_from_row(row: &SqliteRow) -> Result<Batch, StoreError> {
    let decimal = |column: &str| -> Result<Decimal, StoreError> {
        let raw: String = row.try_get(column).map_err(db_error)?;
        parse_decimal(&format!("batch.{column}"), &raw)
    };
    let updated_at: String = row.try_get("updated_at").map_err(db_error)?;

    Ok(Batch {
        id: BatchId(row.try_get("id").map_err(db_error)?),
        offering_id: OfferingId(row.try_get("offering_id").map_err(db_error)?),
        item_id: ItemId(row.try_get("item_id").map_err(db_error)?),
        costs: BatchCosts {
            base_cost: decimal("base_cost")?,
            freight_cost: decimal("freight_cost")?,
            additional_cost: decimal("additional_cost")?,
            guardrail_margin_pct: decimal("guardrail_margin_pct")?,
        },
        total_cost: decimal("total_cost")?,
        guardrail_price: decimal("guardrail_price")?,
        in_stock: row.try_get("in_stock").map_err(db_error)?,
        slow_move_item: row.try_get("slow_move_item").map_err(db_error)?,
        produced_at: parse_optional_timestamp(
            "batch.produced_at",
            row.try_get("produced_at").map_err(db_error)?,
        )?,
        expires_at: parse_optional_timestamp(
            "batch.expires_at",
            row.try_get("expires_at").map_err(db_error)?,
        )?,
        updated_at: parse_timestamp("batch.updated_at", &updated_at)?,
    })
}
