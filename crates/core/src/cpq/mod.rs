//! Pricing and discount resolution.
//!
//! Pure calculators live in their own modules; [`engine::PricingEngine`] wires
//! them to the stores and external collaborators.

pub mod batch_cost;
pub mod discount_prompts;
pub mod discount_rules;
pub mod engine;
pub mod negotiation;
pub mod rule_chain;
pub mod tiers;
pub mod totals;
pub mod unit_price;

use thiserror::Error;

pub use self::engine::{PriceLineRequest, PricingEngine};

/// Failure reported by an injected collaborator such as a condition
/// evaluator or discount advisor.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator rejected the request: {0}")]
    Rejected(String),
}
