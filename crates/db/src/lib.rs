pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_database, connect_with_settings, DbPool};
pub use fixtures::{DemoCatalogDataset, SeedResult, VerificationResult};
pub use repositories::{sql_stores, InMemoryPricingStore, RepositoryError};
