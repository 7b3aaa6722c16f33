use clap::Args;
use rfq_core::config::LoadOptions;
use rfq_core::{PricingEngine, QuoteId};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::commands::{run_with_engine, CommandResult, Failure};

#[derive(Debug, Clone, Args)]
pub struct TotalsArgs {
    #[arg(long)]
    pub quote: String,
    #[arg(long, help = "Replace the quote's shipping amount before recomputing")]
    pub shipping: Option<Decimal>,
}

pub fn run(options: LoadOptions, args: TotalsArgs) -> CommandResult {
    run_with_engine("totals", options, |engine| recompute(engine, args))
}

async fn recompute(
    engine: PricingEngine,
    args: TotalsArgs,
) -> Result<(String, Option<Value>), Failure> {
    let quote_id = QuoteId(args.quote);
    let totals = match args.shipping {
        Some(shipping) => engine.set_shipping_amount(&quote_id, shipping).await,
        None => engine.recompute_order_totals(&quote_id).await,
    }
    .map_err(|error| Failure::engine("totals", error))?;
    let lines = engine
        .quote_lines(&quote_id)
        .await
        .map_err(|error| Failure::engine("totals", error))?;

    let message = format!(
        "quote {} totals: {} - {} discount = {} with shipping",
        quote_id.0, totals.total_amount, totals.total_discount, totals.final_total
    );
    let data = json!({
        "quote_id": quote_id.0,
        "totals": totals,
        "lines": lines.len(),
        "lines_below_guardrail": lines
            .iter()
            .filter(|line| line.below_guardrail())
            .map(|line| line.id.0.as_str())
            .collect::<Vec<_>>(),
    });
    Ok((message, Some(data)))
}
