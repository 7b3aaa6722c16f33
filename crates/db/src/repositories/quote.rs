use async_trait::async_trait;
use chrono::Utc;
use rfq_core::domain::batch::BatchId;
use rfq_core::domain::catalog::{ItemId, OfferingId, SegmentId};
use rfq_core::domain::discount::DiscountPromptId;
use rfq_core::domain::quote::{Quote, QuoteId, QuoteLine, QuoteLineId, QuoteTotals};
use rfq_core::store::{QuoteStore, StoreError};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use super::{db_error, parse_decimal, parse_optional_decimal, parse_timestamp};
use crate::DbPool;

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const LINE_COLUMNS: &str = r#"
    SELECT
        quote_id, id, item_id, offering_id, segment_id, batch_id, quantity, unit_price,
        subtotal, discount_amount, final_subtotal, discount_pct, discount_prompt_id,
        guardrail_price, slow_move_item, updated_at
    FROM quote_line
"#;

#[async_trait]
impl QuoteStore for SqlQuoteRepository {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, shipping_amount, total_amount, total_discount, final_total,
                version, created_at, updated_at
            FROM quote
            WHERE id = ?
            "#,
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|value| quote_from_row(&value)).transpose()
    }

    async fn create_quote(&self, quote: Quote) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO quote (
                id, shipping_amount, total_amount, total_discount, final_total,
                version, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&quote.id.0)
        .bind(quote.shipping_amount.to_string())
        .bind(quote.totals.total_amount.to_string())
        .bind(quote.totals.total_discount.to_string())
        .bind(quote.totals.final_total.to_string())
        .bind(quote.version)
        .bind(quote.created_at.to_rfc3339())
        .bind(quote.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("quote `{}` already exists", quote.id.0)));
        }
        Ok(())
    }

    async fn list_lines(&self, quote_id: &QuoteId) -> Result<Vec<QuoteLine>, StoreError> {
        let rows = sqlx::query(&format!("{LINE_COLUMNS} WHERE quote_id = ? ORDER BY id ASC"))
            .bind(&quote_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(line_from_row).collect()
    }

    async fn find_line(
        &self,
        quote_id: &QuoteId,
        line_id: &QuoteLineId,
    ) -> Result<Option<QuoteLine>, StoreError> {
        let row = sqlx::query(&format!("{LINE_COLUMNS} WHERE quote_id = ? AND id = ?"))
            .bind(&quote_id.0)
            .bind(&line_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|value| line_from_row(&value)).transpose()
    }

    async fn save_line(&self, line: QuoteLine) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO quote_line (
                quote_id, id, item_id, offering_id, segment_id, batch_id, quantity,
                unit_price, subtotal, discount_amount, final_subtotal, discount_pct,
                discount_prompt_id, guardrail_price, slow_move_item, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(quote_id, id) DO UPDATE SET
                item_id = excluded.item_id,
                offering_id = excluded.offering_id,
                segment_id = excluded.segment_id,
                batch_id = excluded.batch_id,
                quantity = excluded.quantity,
                unit_price = excluded.unit_price,
                subtotal = excluded.subtotal,
                discount_amount = excluded.discount_amount,
                final_subtotal = excluded.final_subtotal,
                discount_pct = excluded.discount_pct,
                discount_prompt_id = excluded.discount_prompt_id,
                guardrail_price = excluded.guardrail_price,
                slow_move_item = excluded.slow_move_item,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&line.quote_id.0)
        .bind(&line.id.0)
        .bind(&line.item_id.0)
        .bind(&line.offering_id.0)
        .bind(&line.segment_id.0)
        .bind(line.batch_id.as_ref().map(|id| id.0.as_str()))
        .bind(line.quantity.to_string())
        .bind(line.unit_price.to_string())
        .bind(line.subtotal.to_string())
        .bind(line.discount_amount.to_string())
        .bind(line.final_subtotal.to_string())
        .bind(line.discount_pct.map(|pct| pct.to_string()))
        .bind(line.discount_prompt_id.as_ref().map(|id| id.0.as_str()))
        .bind(line.guardrail_price.map(|price| price.to_string()))
        .bind(line.slow_move_item)
        .bind(line.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete_line(
        &self,
        quote_id: &QuoteId,
        line_id: &QuoteLineId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM quote_line WHERE quote_id = ? AND id = ?")
            .bind(&quote_id.0)
            .bind(&line_id.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn count_lines_for_offering(
        &self,
        offering_id: &OfferingId,
    ) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM quote_line WHERE offering_id = ?")
                .bind(&offering_id.0)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }

    async fn count_lines_for_item(&self, item_id: &ItemId) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quote_line WHERE item_id = ?")
            .bind(&item_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }

    async fn count_lines_for_batch(
        &self,
        offering_id: &OfferingId,
        batch_id: &BatchId,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM quote_line WHERE offering_id = ? AND batch_id = ?",
        )
        .bind(&offering_id.0)
        .bind(&batch_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }

    async fn save_totals(
        &self,
        quote_id: &QuoteId,
        expected_version: i64,
        shipping_amount: Decimal,
        totals: QuoteTotals,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE quote SET
                shipping_amount = ?,
                total_amount = ?,
                total_discount = ?,
                final_total = ?,
                version = version + 1,
                updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(shipping_amount.to_string())
        .bind(totals.total_amount.to_string())
        .bind(totals.total_discount.to_string())
        .bind(totals.final_total.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(&quote_id.0)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }
}

fn quote_from_row(row: &SqliteRow) -> Result<Quote, StoreError> {
    let decimal = |column: &str| -> Result<Decimal, StoreError> {
        let raw: String = row.try_get(column).map_err(db_error)?;
        parse_decimal(&format!("quote.{column}"), &raw)
    };
    let created_at: String = row.try_get("created_at").map_err(db_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(db_error)?;

    Ok(Quote {
        id: QuoteId(row.try_get("id").map_err(db_error)?),
        shipping_amount: decimal("shipping_amount")?,
        totals: QuoteTotals {
            total_amount: decimal("total_amount")?,
            total_discount: decimal("total_discount")?,
            final_total: decimal("final_total")?,
        },
        version: row.try_get("version").map_err(db_error)?,
        created_at: parse_timestamp("quote.created_at", &created_at)?,
        updated_at: parse_timestamp("quote.updated_at", &updated_at)?,
    })
}

fn line_from_row(row: &SqliteRow) -> Result<QuoteLine, StoreError> {
    let decimal = |column: &str| -> Result<Decimal, StoreError> {
        let raw: String = row.try_get(column).map_err(db_error)?;
        parse_decimal(&format!("quote_line.{column}"), &raw)
    };
    let optional_decimal = |column: &str| -> Result<Option<Decimal>, StoreError> {
        let raw: Option<String> = row.try_get(column).map_err(db_error)?;
        parse_optional_decimal(&format!("quote_line.{column}"), raw)
    };
    let batch_id: Option<String> = row.try_get("batch_id").map_err(db_error)?;
    let discount_prompt_id: Option<String> =
        row.try_get("discount_prompt_id").map_err(db_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(db_error)?;

    Ok(QuoteLine {
        id: QuoteLineId(row.try_get("id").map_err(db_error)?),
        quote_id: QuoteId(row.try_get("quote_id").map_err(db_error)?),
        item_id: ItemId(row.try_get("item_id").map_err(db_error)?),
        offering_id: OfferingId(row.try_get("offering_id").map_err(db_error)?),
        segment_id: SegmentId(row.try_get("segment_id").map_err(db_error)?),
        batch_id: batch_id.map(BatchId),
        quantity: decimal("quantity")?,
        unit_price: decimal("unit_price")?,
        subtotal: decimal("subtotal")?,
        discount_amount: decimal("discount_amount")?,
        final_subtotal: decimal("final_subtotal")?,
        discount_pct: optional_decimal("discount_pct")?,
        discount_prompt_id: discount_prompt_id.map(DiscountPromptId),
        guardrail_price: optional_decimal("guardrail_price")?,
        slow_move_item: row.try_get("slow_move_item").map_err(db_error)?,
        updated_at: parse_timestamp("quote_line.updated_at", &updated_at)?,
    })
}
