use clap::Args;
use rfq_core::config::LoadOptions;
use rfq_core::cpq::discount_prompts::DiscountRequest;
use rfq_core::domain::catalog::{ItemId, OfferingId, SegmentId};
use rfq_core::{ConditionContext, PricingEngine};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::commands::{run_with_engine, CommandResult, Failure};

#[derive(Debug, Clone, Args)]
pub struct DiscountArgs {
    #[arg(long)]
    pub item: String,
    #[arg(long)]
    pub offering: String,
    #[arg(long)]
    pub segment: String,
    #[arg(long, help = "Line subtotal the discount rules are matched against")]
    pub subtotal: Decimal,
    #[arg(long, help = "Requested discount percentage; clamped to the matched tier")]
    pub requested_pct: Option<Decimal>,
    #[arg(
        long = "context",
        value_name = "KEY=VALUE",
        value_parser = parse_context_pair,
        help = "Condition context entry; repeatable"
    )]
    pub context: Vec<(String, String)>,
}

impl DiscountArgs {
    fn condition_context(&self) -> ConditionContext {
        self.context
            .iter()
            .fold(ConditionContext::new(), |context, (key, value)| context.with(key, value))
    }
}

pub fn run(options: LoadOptions, args: DiscountArgs) -> CommandResult {
    run_with_engine("discount", options, |engine| negotiate(engine, args))
}

async fn negotiate(
    engine: PricingEngine,
    args: DiscountArgs,
) -> Result<(String, Option<Value>), Failure> {
    let context = args.condition_context();
    let request = DiscountRequest {
        item_id: ItemId(args.item.clone()),
        offering_id: OfferingId(args.offering.clone()),
        segment_id: SegmentId(args.segment.clone()),
        subtotal: args.subtotal,
        context: context.clone(),
    };

    let matched = engine
        .resolve_discount(&request)
        .await
        .map_err(|error| Failure::engine("discount", error))?;
    let Some(matched) = matched else {
        let data = json!({ "applied": null });
        return Ok(("no active discount prompt covers this subtotal".to_string(), Some(data)));
    };

    let applied = engine
        .negotiate_discount(&matched, args.subtotal, args.requested_pct, &context)
        .await
        .map_err(|error| Failure::engine("discount", error))?;

    let message = format!(
        "prompt {} allows up to {}%; applied {}% ({})",
        matched.prompt_id.0, matched.max_discount_pct, applied.applied_pct, applied.discount_amount
    );
    let data = json!({ "matched_tier": matched.tier, "applied": applied });
    Ok((message, Some(data)))
}

fn parse_context_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) =
        raw.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("context key must not be empty in `{raw}`"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::parse_context_pair;

    #[test]
    fn context_pairs_split_on_the_first_equals_sign() {
        assert_eq!(
            parse_context_pair("customer_tier=contractor"),
            Ok(("customer_tier".to_string(), "contractor".to_string()))
        );
        assert_eq!(
            parse_context_pair("note=a=b"),
            Ok(("note".to_string(), "a=b".to_string()))
        );
        assert!(parse_context_pair("customer_tier").is_err());
        assert!(parse_context_pair("=contractor").is_err());
    }
}
