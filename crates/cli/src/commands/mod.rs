pub mod config;
pub mod discount;
pub mod migrate;
pub mod price;
pub mod seed;
pub mod totals;
pub mod validate_rules;

use std::future::Future;

use rfq_core::config::{AppConfig, LoadOptions};
use rfq_core::{EngineError, PricingEngine};
use rfq_db::{connect_database, migrations, sql_stores, DbPool};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: None,
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::from_failure(command, Failure::new(error_class, message, exit_code))
    }

    fn from_failure(command: &str, failure: Failure) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(failure.error_class),
            message: failure.message,
            correlation_id: failure.correlation_id,
            data: None,
        };
        Self { exit_code: failure.exit_code, output: serialize_payload(payload) }
    }
}

/// A failed command step with the exit code it maps to.
#[derive(Debug, Clone)]
pub struct Failure {
    pub error_class: String,
    pub message: String,
    pub exit_code: u8,
    pub correlation_id: Option<String>,
}

impl Failure {
    pub fn new(error_class: &str, message: impl Into<String>, exit_code: u8) -> Self {
        Self {
            error_class: error_class.to_string(),
            message: message.into(),
            exit_code,
            correlation_id: None,
        }
    }

    /// Engine errors surface through the interface mapping so the class and
    /// message match what any other caller of the engine would see.
    pub fn engine(command: &str, error: EngineError) -> Self {
        let detail = error.to_string();
        let interface = error.into_interface(format!("cli-{command}"));
        Self {
            error_class: interface.error_class().to_string(),
            message: format!("{} ({detail})", interface.user_message()),
            exit_code: 7,
            correlation_id: Some(interface.correlation_id().to_string()),
        }
    }
}

/// Runs `body` against an engine over the migrated database.
pub fn run_with_engine<F, Fut>(command: &str, options: LoadOptions, body: F) -> CommandResult
where
    F: FnOnce(PricingEngine) -> Fut,
    Fut: Future<Output = Result<(String, Option<Value>), Failure>>,
{
    run_with_pool(command, options, |_pool, engine| body(engine))
}

/// Loads config, builds a current-thread runtime and runs `body` against a
/// migrated pool and an engine over it.
pub fn run_with_pool<F, Fut>(command: &str, options: LoadOptions, body: F) -> CommandResult
where
    F: FnOnce(DbPool, PricingEngine) -> Fut,
    Fut: Future<Output = Result<(String, Option<Value>), Failure>>,
{
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let engine = PricingEngine::new(sql_stores(pool.clone()), config.engine.clone());
        let outcome = body(pool.clone(), engine).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok((message, data)) => CommandResult::success_with(command, message, data),
        Err(failure) => CommandResult::from_failure(command, failure),
    }
}

pub async fn open_pool(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_database(&config.database)
        .await
        .map_err(|error| Failure::new("db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| Failure::new("migration", error.to_string(), 5))?;
    Ok(pool)
}

pub fn to_data<T: Serialize>(value: &T) -> Result<Option<Value>, Failure> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|error| Failure::new("serialization", error.to_string(), 8))
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\
             \"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
