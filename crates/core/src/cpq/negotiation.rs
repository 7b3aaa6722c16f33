use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::discount_prompts::{ConditionContext, DiscountMatch};
use crate::cpq::CollaboratorError;
use crate::domain::discount::DiscountPromptId;

/// `min(max(proposed, 0), max_discount_pct)`.
pub fn clamp_discount_pct(proposed_pct: Decimal, max_discount_pct: Decimal) -> Decimal {
    proposed_pct.max(Decimal::ZERO).min(max_discount_pct)
}

pub fn discount_amount(subtotal: Decimal, discount_pct: Decimal) -> Decimal {
    subtotal * discount_pct / Decimal::ONE_HUNDRED
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationRequest {
    pub prompt_id: DiscountPromptId,
    pub subtotal: Decimal,
    pub max_discount_pct: Decimal,
    pub context: ConditionContext,
}

/// Proposes a discount percentage. The engine clamps whatever comes back.
#[async_trait]
pub trait DiscountAdvisor: Send + Sync {
    async fn propose_discount_pct(
        &self,
        request: &NegotiationRequest,
    ) -> Result<Decimal, CollaboratorError>;
}

/// Always proposes the same percentage.
#[derive(Clone, Copy, Debug)]
pub struct FixedRateAdvisor(pub Decimal);

#[async_trait]
impl DiscountAdvisor for FixedRateAdvisor {
    async fn propose_discount_pct(
        &self,
        _request: &NegotiationRequest,
    ) -> Result<Decimal, CollaboratorError> {
        Ok(self.0)
    }
}

/// Proposes the tier maximum.
#[derive(Clone, Copy, Debug, Default)]
pub struct CeilingAdvisor;

#[async_trait]
impl DiscountAdvisor for CeilingAdvisor {
    async fn propose_discount_pct(
        &self,
        request: &NegotiationRequest,
    ) -> Result<Decimal, CollaboratorError> {
        Ok(request.max_discount_pct)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalSource {
    Requested,
    Advisor,
    /// No advisor, or it failed or timed out.
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub prompt_id: DiscountPromptId,
    pub source: ProposalSource,
    pub proposed_pct: Decimal,
    pub applied_pct: Decimal,
    pub max_discount_pct: Decimal,
    pub discount_amount: Decimal,
    pub clamped: bool,
}

pub fn enforce_bound(
    discount_match: &DiscountMatch,
    subtotal: Decimal,
    proposed_pct: Decimal,
    source: ProposalSource,
) -> AppliedDiscount {
    let applied_pct = clamp_discount_pct(proposed_pct, discount_match.max_discount_pct);
    AppliedDiscount {
        prompt_id: discount_match.prompt_id.clone(),
        source,
        proposed_pct,
        applied_pct,
        max_discount_pct: discount_match.max_discount_pct,
        discount_amount: discount_amount(subtotal, applied_pct),
        clamped: applied_pct != proposed_pct,
    }
}
