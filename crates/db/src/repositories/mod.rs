use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rfq_core::store::{StoreError, Stores};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::DbPool;

pub mod catalog;
pub mod discount_prompt;
pub mod discount_rule;
pub mod memory;
pub mod price_tier;
pub mod quote;

pub use catalog::SqlCatalogRepository;
pub use discount_prompt::SqlDiscountPromptRepository;
pub use discount_rule::SqlDiscountRuleRepository;
pub use memory::InMemoryPricingStore;
pub use price_tier::SqlPriceTierRepository;
pub use quote::SqlQuoteRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(sqlx::Error::Database(error))
                if error.is_unique_violation() =>
            {
                StoreError::Conflict(error.message().to_string())
            }
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

/// SQLite-backed stores sharing one pool.
pub fn sql_stores(pool: DbPool) -> Stores {
    Stores {
        catalog: Arc::new(SqlCatalogRepository::new(pool.clone())),
        tiers: Arc::new(SqlPriceTierRepository::new(pool.clone())),
        rules: Arc::new(SqlDiscountRuleRepository::new(pool.clone())),
        prompts: Arc::new(SqlDiscountPromptRepository::new(pool.clone())),
        quotes: Arc::new(SqlQuoteRepository::new(pool)),
    }
}

pub(crate) fn db_error(error: sqlx::Error) -> StoreError {
    RepositoryError::Database(error).into()
}

pub(crate) fn decode_error(message: impl Into<String>) -> StoreError {
    RepositoryError::Decode(message.into()).into()
}

pub(crate) fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw)
        .map_err(|error| decode_error(format!("invalid decimal `{raw}` in {field}: {error}")))
}

pub(crate) fn parse_optional_decimal(
    field: &str,
    raw: Option<String>,
) -> Result<Option<Decimal>, StoreError> {
    raw.as_deref().map(|raw| parse_decimal(field, raw)).transpose()
}

pub(crate) fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| decode_error(format!("invalid timestamp `{raw}` in {field}: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    field: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(|raw| parse_timestamp(field, raw)).transpose()
}

#[cfg(test)]
mod tests {
    use rfq_core::store::StoreError;
    use rust_decimal::Decimal;

    use super::{parse_decimal, parse_optional_timestamp, parse_timestamp, RepositoryError};

    #[test]
    fn decimals_keep_their_scale() {
        assert_eq!(parse_decimal("price", "12.50").expect("decimal"), Decimal::new(1250, 2));
        assert_eq!(parse_decimal("price", "12.50").expect("decimal").to_string(), "12.50");
        assert!(matches!(parse_decimal("price", "twelve"), Err(StoreError::Decode(_))));
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let parsed = parse_timestamp("updated_at", "2026-03-01T10:00:00Z").expect("timestamp");
        assert_eq!(parsed.to_rfc3339(), "2026-03-01T10:00:00+00:00");
        assert_eq!(parse_optional_timestamp("expires_at", None).expect("none"), None);
        assert!(parse_timestamp("updated_at", "yesterday").is_err());
    }

    #[test]
    fn decode_failures_map_to_store_decode() {
        let error = StoreError::from(RepositoryError::Decode("bad row".to_string()));
        assert_eq!(error, StoreError::Decode("bad row".to_string()));
    }
}
