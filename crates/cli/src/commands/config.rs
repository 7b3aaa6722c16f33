use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rfq_core::config::{AppConfig, LoadOptions};
use serde_json::{json, Value};
use toml::Value as TomlValue;

use crate::commands::CommandResult;

/// Effective configuration with the source each value came from.
pub fn run(options: LoadOptions) -> CommandResult {
    let explicit_path = options.config_path.clone();
    let overrides = options.overrides.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = detect_config_path(explicit_path);
    let doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str], overridden: bool| {
        field_source(key_path, env_keys, overridden, doc.as_ref(), config_file_path.as_deref())
    };

    let entries = [
        (
            "database.url",
            json!(config.database.url),
            source("database.url", &["RFQ_DATABASE_URL"], overrides.database_url.is_some()),
        ),
        (
            "database.max_connections",
            json!(config.database.max_connections),
            source("database.max_connections", &["RFQ_DATABASE_MAX_CONNECTIONS"], false),
        ),
        (
            "database.timeout_secs",
            json!(config.database.timeout_secs),
            source("database.timeout_secs", &["RFQ_DATABASE_TIMEOUT_SECS"], false),
        ),
        (
            "engine.lookup_retries",
            json!(config.engine.lookup_retries),
            source("engine.lookup_retries", &["RFQ_ENGINE_LOOKUP_RETRIES"], false),
        ),
        (
            "engine.retry_initial_backoff_ms",
            json!(config.engine.retry_initial_backoff_ms),
            source(
                "engine.retry_initial_backoff_ms",
                &["RFQ_ENGINE_RETRY_INITIAL_BACKOFF_MS"],
                false,
            ),
        ),
        (
            "engine.retry_max_backoff_ms",
            json!(config.engine.retry_max_backoff_ms),
            source("engine.retry_max_backoff_ms", &["RFQ_ENGINE_RETRY_MAX_BACKOFF_MS"], false),
        ),
        (
            "engine.collaborator_timeout_ms",
            json!(config.engine.collaborator_timeout_ms),
            source(
                "engine.collaborator_timeout_ms",
                &["RFQ_ENGINE_COLLABORATOR_TIMEOUT_MS"],
                overrides.collaborator_timeout_ms.is_some(),
            ),
        ),
        (
            "engine.totals_max_retries",
            json!(config.engine.totals_max_retries),
            source("engine.totals_max_retries", &["RFQ_ENGINE_TOTALS_MAX_RETRIES"], false),
        ),
        (
            "logging.level",
            json!(config.logging.level),
            source(
                "logging.level",
                &["RFQ_LOGGING_LEVEL", "RFQ_LOG_LEVEL"],
                overrides.log_level.is_some(),
            ),
        ),
        (
            "logging.format",
            json!(config.logging.format),
            source(
                "logging.format",
                &["RFQ_LOGGING_FORMAT", "RFQ_LOG_FORMAT"],
                overrides.log_format.is_some(),
            ),
        ),
    ];

    let data: Vec<Value> = entries
        .into_iter()
        .map(|(key, value, source)| json!({ "key": key, "value": value, "source": source }))
        .collect();

    CommandResult::success_with(
        "config",
        "effective config (source precedence: override > env > file > default)",
        Some(Value::Array(data)),
    )
}

fn detect_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then_some(path);
    }

    let root = PathBuf::from("rfq.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/rfq.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<TomlValue> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<TomlValue>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    overridden: bool,
    config_file_doc: Option<&TomlValue>,
    config_file_path: Option<&Path>,
) -> String {
    if overridden {
        return "override (command line)".to_string();
    }

    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &TomlValue, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
