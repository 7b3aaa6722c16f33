use clap::Args;
use rfq_core::config::LoadOptions;
use rfq_core::domain::batch::BatchId;
use rfq_core::domain::catalog::{ItemId, OfferingId, SegmentId};
use rfq_core::{PricingEngine, UnitPriceRequest};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::commands::{run_with_engine, to_data, CommandResult, Failure};

#[derive(Debug, Clone, Args)]
pub struct PriceArgs {
    #[arg(long)]
    pub item: String,
    #[arg(long)]
    pub offering: String,
    #[arg(long)]
    pub segment: String,
    #[arg(long, help = "Quantity to price; must be greater than zero")]
    pub quantity: Decimal,
    #[arg(long, help = "Price against this batch instead of the first in-stock one")]
    pub batch: Option<String>,
}

impl PriceArgs {
    fn request(&self) -> UnitPriceRequest {
        UnitPriceRequest {
            item_id: ItemId(self.item.clone()),
            offering_id: OfferingId(self.offering.clone()),
            segment_id: SegmentId(self.segment.clone()),
            quantity: self.quantity,
            batch_id: self.batch.clone().map(BatchId),
        }
    }
}

pub fn run(options: LoadOptions, args: PriceArgs) -> CommandResult {
    run_with_engine("price", options, |engine| resolve(engine, args))
}

async fn resolve(
    engine: PricingEngine,
    args: PriceArgs,
) -> Result<(String, Option<Value>), Failure> {
    let price = engine
        .resolve_unit_price(&args.request())
        .await
        .map_err(|error| Failure::engine("price", error))?;

    let message = format!(
        "{} x {} priced at {} per unit by tier {}",
        args.quantity, args.item, price.unit_price, price.tier_id.0
    );
    Ok((message, to_data(&price)?))
}
