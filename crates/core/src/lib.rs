pub mod audit;
pub mod config;
pub mod cpq;
pub mod domain;
pub mod errors;
pub mod retry;
pub mod store;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use cpq::discount_prompts::{ConditionContext, ConditionEvaluator, DiscountMatch};
pub use cpq::negotiation::{AppliedDiscount, DiscountAdvisor};
pub use cpq::unit_price::{PricingNotFound, UnitPrice, UnitPriceRequest};
pub use cpq::{CollaboratorError, PriceLineRequest, PricingEngine};
pub use domain::discount::{DiscountPrompt, DiscountRuleSet, DiscountScope, DiscountTier};
pub use domain::discount_rule::{DiscountRule, DiscountRulePatch, NewDiscountRule};
pub use domain::quote::{Quote, QuoteId, QuoteLine, QuoteTotals};
pub use domain::tier::{PriceTier, TierPricing, TierScope};
pub use errors::{EngineError, InterfaceError};
pub use store::{Stores, StoreError};
