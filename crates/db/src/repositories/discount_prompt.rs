use async_trait::async_trait;
use rfq_core::domain::discount::{
    DiscountPrompt, DiscountPromptId, DiscountRuleSet, DiscountScope, PromptStatus,
};
use rfq_core::store::{DiscountPromptStore, StoreError};
use sqlx::{sqlite::SqliteRow, Row};

use super::{db_error, decode_error, parse_timestamp};
use crate::DbPool;

pub struct SqlDiscountPromptRepository {
    pool: DbPool,
}

impl SqlDiscountPromptRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DiscountPromptStore for SqlDiscountPromptRepository {
    async fn find_prompt(
        &self,
        id: &DiscountPromptId,
    ) -> Result<Option<DiscountPrompt>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, scope_kind, scope_target, prompt, conditions_json, rules_json,
                priority, status, created_at, updated_at
            FROM discount_prompt
            WHERE id = ?
            "#,
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|value| prompt_from_row(&value)).transpose()
    }

    async fn save_prompt(&self, prompt: DiscountPrompt) -> Result<(), StoreError> {
        let conditions_json = serde_json::to_string(&prompt.conditions)
            .map_err(|error| decode_error(format!("conditions encode failed: {error}")))?;
        let rules_json = serde_json::to_string(&prompt.rules)
            .map_err(|error| decode_error(format!("rules encode failed: {error}")))?;

        sqlx::query(
            r#"
            INSERT INTO discount_prompt (
                id, scope_kind, scope_target, prompt, conditions_json, rules_json,
                priority, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                scope_kind = excluded.scope_kind,
                scope_target = excluded.scope_target,
                prompt = excluded.prompt,
                conditions_json = excluded.conditions_json,
                rules_json = excluded.rules_json,
                priority = excluded.priority,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&prompt.id.0)
        .bind(prompt.scope.kind())
        .bind(prompt.scope.target())
        .bind(&prompt.prompt)
        .bind(conditions_json)
        .bind(rules_json)
        .bind(prompt.priority)
        .bind(prompt.status.as_str())
        .bind(prompt.created_at.to_rfc3339())
        .bind(prompt.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn active_prompts(
        &self,
        scope: &DiscountScope,
    ) -> Result<Vec<DiscountPrompt>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, scope_kind, scope_target, prompt, conditions_json, rules_json,
                priority, status, created_at, updated_at
            FROM discount_prompt
            WHERE scope_kind = ? AND scope_target IS ? AND status = 'active'
            ORDER BY priority DESC, id ASC
            "#,
        )
        .bind(scope.kind())
        .bind(scope.target())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(prompt_from_row).collect()
    }

    async fn count_prompts(&self, scope: &DiscountScope) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM discount_prompt WHERE scope_kind = ? AND scope_target IS ?",
        )
        .bind(scope.kind())
        .bind(scope.target())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }
}

fn prompt_from_row(row: &SqliteRow) -> Result<DiscountPrompt, StoreError> {
    let scope_kind: String = row.try_get("scope_kind").map_err(db_error)?;
    let scope_target: Option<String> = row.try_get("scope_target").map_err(db_error)?;
    let scope = DiscountScope::from_parts(&scope_kind, scope_target)
        .ok_or_else(|| decode_error(format!("invalid discount scope `{scope_kind}`")))?;

    let conditions_json: String = row.try_get("conditions_json").map_err(db_error)?;
    let conditions: Vec<String> = serde_json::from_str(&conditions_json)
        .map_err(|error| decode_error(format!("invalid conditions_json: {error}")))?;
    // Decoding re-runs normalization, so a hand-edited row cannot smuggle in gaps.
    let rules_json: String = row.try_get("rules_json").map_err(db_error)?;
    let rules: DiscountRuleSet = serde_json::from_str(&rules_json)
        .map_err(|error| decode_error(format!("invalid rules_json: {error}")))?;

    let status: String = row.try_get("status").map_err(db_error)?;
    let created_at: String = row.try_get("created_at").map_err(db_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(db_error)?;

    Ok(DiscountPrompt {
        id: DiscountPromptId(row.try_get("id").map_err(db_error)?),
        scope,
        prompt: row.try_get("prompt").map_err(db_error)?,
        conditions,
        rules,
        priority: row.try_get("priority").map_err(db_error)?,
        status: PromptStatus::parse(&status)
            .ok_or_else(|| decode_error(format!("unknown prompt status `{status}`")))?,
        created_at: parse_timestamp("discount_prompt.created_at", &created_at)?,
        updated_at: parse_timestamp("discount_prompt.updated_at", &updated_at)?,
    })
}
