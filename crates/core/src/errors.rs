use thiserror::Error;

use crate::cpq::discount_rules::DiscountRuleError;
use crate::cpq::rule_chain::RuleChainError;
use crate::cpq::tiers::OrderingError;
use crate::cpq::unit_price::PricingNotFound;
use crate::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error(transparent)]
    Validation(#[from] DiscountRuleError),
    #[error(transparent)]
    NotFound(#[from] PricingNotFound),
    #[error("{entity} `{id}` is still referenced by {referenced_by}")]
    ReferentialIntegrity { entity: &'static str, id: String, referenced_by: &'static str },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("totals for quote `{quote_id}` changed concurrently {attempts} times; giving up")]
    TotalsConflict { quote_id: String, attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RuleChainError> for EngineError {
    fn from(value: RuleChainError) -> Self {
        match value {
            RuleChainError::Ordering(error) => Self::Ordering(error),
            RuleChainError::Validation(error) => Self::Validation(error),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => {
                "No matching price or discount was found. Recently changed data may need a moment."
            }
            Self::Conflict { .. } => "The record is in use or was changed concurrently.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::ServiceUnavailable { .. } => "service_unavailable",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}

impl EngineError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<EngineError> for InterfaceError {
    fn from(value: EngineError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            EngineError::Ordering(_)
            | EngineError::Validation(_)
            | EngineError::InvalidInput(_) => Self::BadRequest { message, correlation_id },
            EngineError::NotFound(_) => Self::NotFound { message, correlation_id },
            EngineError::ReferentialIntegrity { .. }
            | EngineError::TotalsConflict { .. }
            | EngineError::Store(StoreError::Conflict(_)) => {
                Self::Conflict { message, correlation_id }
            }
            EngineError::Store(_) => Self::ServiceUnavailable { message, correlation_id },
        }
    }
}
