use rfq_core::config::LoadOptions;
use rfq_core::PricingEngine;
use rfq_db::{DbPool, DemoCatalogDataset};
use serde_json::{json, Value};

use crate::commands::{run_with_pool, CommandResult, Failure};

pub fn run(options: LoadOptions) -> CommandResult {
    run_with_pool("seed", options, load_and_verify)
}

async fn load_and_verify(
    pool: DbPool,
    engine: PricingEngine,
) -> Result<(String, Option<Value>), Failure> {
    let seeded = DemoCatalogDataset::load(&engine)
        .await
        .map_err(|error| Failure::new("seed_execution", error.to_string(), 5))?;

    let verification = DemoCatalogDataset::verify(&pool)
        .await
        .map_err(|error| Failure::new("seed_verification", error.to_string(), 6))?;
    if !verification.all_present {
        let failed_checks = verification
            .checks
            .iter()
            .filter_map(|(check, passed)| (!passed).then_some(*check))
            .collect::<Vec<_>>();
        let message = verification_message(&failed_checks);
        return Err(Failure::new("seed_verification", message, 6));
    }

    let data = json!({
        "written": {
            "items": seeded.items,
            "offerings": seeded.offerings,
            "batches": seeded.batches,
            "tiers": seeded.tiers,
            "prompts": seeded.prompts,
            "quotes": seeded.quotes,
        },
        "checks": verification.checks.iter().map(|(check, _)| *check).collect::<Vec<_>>(),
    });
    Ok(("demo catalog loaded and verified".to_string(), Some(data)))
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
