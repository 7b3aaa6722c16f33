use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Tuning for the pricing engine's retry and collaborator behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Retries of a not-found lookup before it is surfaced.
    pub lookup_retries: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    /// Upper bound on condition evaluator and discount advisor calls.
    pub collaborator_timeout_ms: u64,
    /// Attempts at writing quote totals after a version conflict.
    pub totals_max_retries: u32,
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.lookup_retries,
            base_delay_ms: self.retry_initial_backoff_ms,
            max_delay_ms: self.retry_max_backoff_ms,
        }
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookup_retries: 3,
            retry_initial_backoff_ms: 25,
            retry_max_backoff_ms: 400,
            collaborator_timeout_ms: 2_000,
            totals_max_retries: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub collaborator_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://rfq.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            engine: EngineConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("rfq.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(lookup_retries) = engine.lookup_retries {
                self.engine.lookup_retries = lookup_retries;
            }
            if let Some(initial) = engine.retry_initial_backoff_ms {
                self.engine.retry_initial_backoff_ms = initial;
            }
            if let Some(max) = engine.retry_max_backoff_ms {
                self.engine.retry_max_backoff_ms = max;
            }
            if let Some(timeout_ms) = engine.collaborator_timeout_ms {
                self.engine.collaborator_timeout_ms = timeout_ms;
            }
            if let Some(totals_max_retries) = engine.totals_max_retries {
                self.engine.totals_max_retries = totals_max_retries;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RFQ_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RFQ_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("RFQ_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("RFQ_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("RFQ_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RFQ_ENGINE_LOOKUP_RETRIES") {
            self.engine.lookup_retries = parse_u32("RFQ_ENGINE_LOOKUP_RETRIES", &value)?;
        }
        if let Some(value) = read_env("RFQ_ENGINE_RETRY_INITIAL_BACKOFF_MS") {
            self.engine.retry_initial_backoff_ms =
                parse_u64("RFQ_ENGINE_RETRY_INITIAL_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_env("RFQ_ENGINE_RETRY_MAX_BACKOFF_MS") {
            self.engine.retry_max_backoff_ms =
                parse_u64("RFQ_ENGINE_RETRY_MAX_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_env("RFQ_ENGINE_COLLABORATOR_TIMEOUT_MS") {
            self.engine.collaborator_timeout_ms =
                parse_u64("RFQ_ENGINE_COLLABORATOR_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("RFQ_ENGINE_TOTALS_MAX_RETRIES") {
            self.engine.totals_max_retries = parse_u32("RFQ_ENGINE_TOTALS_MAX_RETRIES", &value)?;
        }

        let log_level = read_env("RFQ_LOGGING_LEVEL").or_else(|| read_env("RFQ_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("RFQ_LOGGING_FORMAT").or_else(|| read_env("RFQ_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(timeout_ms) = overrides.collaborator_timeout_ms {
            self.engine.collaborator_timeout_ms = timeout_ms;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_engine(&self.engine)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("rfq.toml"), PathBuf::from("config/rfq.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.lookup_retries > 10 {
        return Err(ConfigError::Validation(
            "engine.lookup_retries must be in range 0..=10".to_string(),
        ));
    }

    if engine.retry_initial_backoff_ms > engine.retry_max_backoff_ms {
        return Err(ConfigError::Validation(
            "engine.retry_initial_backoff_ms must not exceed engine.retry_max_backoff_ms"
                .to_string(),
        ));
    }

    if engine.collaborator_timeout_ms == 0 || engine.collaborator_timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "engine.collaborator_timeout_ms must be in range 1..=60000".to_string(),
        ));
    }

    if engine.totals_max_retries == 0 {
        return Err(ConfigError::Validation(
            "engine.totals_max_retries must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    engine: Option<EnginePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    lookup_retries: Option<u32>,
    retry_initial_backoff_ms: Option<u64>,
    retry_max_backoff_ms: Option<u64>,
    collaborator_timeout_ms: Option<u64>,
    totals_max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.database.url == "sqlite://rfq.db", "default database url")?;
        ensure(config.engine.lookup_retries == 3, "default lookup retries")?;
        ensure(
            config.engine.collaborator_timeout() == Duration::from_millis(2_000),
            "default collaborator timeout",
        )?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "default log format")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_RFQ_DB_PATH", "/tmp/rfq-from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("rfq.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_RFQ_DB_PATH}"

[engine]
lookup_retries = 5
collaborator_timeout_ms = 750
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite:///tmp/rfq-from-env.db",
                "database url should be interpolated from environment",
            )?;
            ensure(config.engine.lookup_retries == 5, "lookup retries should come from file")?;
            ensure(
                config.engine.retry_policy().max_retries == 5,
                "retry policy should mirror lookup retries",
            )?;
            ensure(
                config.engine.collaborator_timeout_ms == 750,
                "collaborator timeout should come from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_RFQ_DB_PATH"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RFQ_LOG_LEVEL", "warn");
        env::set_var("RFQ_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["RFQ_LOG_LEVEL", "RFQ_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RFQ_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("RFQ_ENGINE_TOTALS_MAX_RETRIES", "9");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("rfq.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[engine]
totals_max_retries = 2
collaborator_timeout_ms = 300

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.engine.totals_max_retries == 9, "env should win over file")?;
            ensure(
                config.engine.collaborator_timeout_ms == 300,
                "file should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["RFQ_DATABASE_URL", "RFQ_ENGINE_TOTALS_MAX_RETRIES"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RFQ_ENGINE_LOOKUP_RETRIES", "many");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "RFQ_ENGINE_LOOKUP_RETRIES"
                ),
                "failure should name the offending variable",
            )
        })();

        clear_vars(&["RFQ_ENGINE_LOOKUP_RETRIES"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RFQ_ENGINE_RETRY_INITIAL_BACKOFF_MS", "1000");
        env::set_var("RFQ_ENGINE_RETRY_MAX_BACKOFF_MS", "10");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("engine.retry_initial_backoff_ms")
            );
            ensure(has_message, "validation failure should mention the backoff bounds")
        })();

        clear_vars(&["RFQ_ENGINE_RETRY_INITIAL_BACKOFF_MS", "RFQ_ENGINE_RETRY_MAX_BACKOFF_MS"]);
        result
    }

    #[test]
    fn missing_required_file_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let missing = dir.path().join("absent.toml");
        let result = AppConfig::load(LoadOptions {
            config_path: Some(missing),
            require_file: true,
            ..LoadOptions::default()
        });

        ensure(
            matches!(result, Err(ConfigError::MissingConfigFile(_))),
            "missing required file should fail",
        )
    }
}
