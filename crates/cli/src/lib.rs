pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rfq_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

use crate::commands::discount::DiscountArgs;
use crate::commands::price::PriceArgs;
use crate::commands::totals::TotalsArgs;

#[derive(Debug, Parser)]
#[command(
    name = "rfq",
    about = "RFQ pricing engine operator CLI",
    long_about = "Apply migrations, seed the demo catalog, and resolve prices, discounts and \
                  quote totals against the configured database.",
    after_help = "Examples:\n  rfq seed\n  rfq price --item item-bolt --offering off-bolt-acme \
                  --segment seg-retail --quantity 150\n  rfq totals --quote quote-demo-001"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (defaults to rfq.toml or config/rfq.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(long, global = true, help = "Override logging.format (compact|pretty|json)")]
    log_format: Option<LogFormat>,
    #[arg(long, global = true, help = "Override engine.collaborator_timeout_ms")]
    collaborator_timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Load the deterministic demo catalog, tier chains, prompts and quote")]
    Seed,
    #[command(about = "Resolve the unit price for a quantity of an offering in a segment")]
    Price(PriceArgs),
    #[command(about = "Resolve the best discount prompt for a subtotal and clamp a request")]
    Discount(DiscountArgs),
    #[command(about = "Normalize a JSON file of discount tiers and report the first violation")]
    ValidateRules {
        #[arg(help = "Path to a JSON array of discount tiers")]
        path: PathBuf,
    },
    #[command(about = "Recompute a quote's totals, optionally replacing its shipping amount")]
    Totals(TotalsArgs),
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                log_level: self.log_level.clone(),
                log_format: self.log_format,
                collaborator_timeout_ms: self.collaborator_timeout_ms,
            },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();
    // A config that fails to load is reported by the command itself.
    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Config => commands::config::run(options),
        Command::Seed => commands::seed::run(options),
        Command::Price(args) => commands::price::run(options, args),
        Command::Discount(args) => commands::discount::run(options, args),
        Command::ValidateRules { path } => commands::validate_rules::run(&path),
        Command::Totals(args) => commands::totals::run(options, args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rfq_core::config::LogFormat;

    use super::{Cli, Command};

    #[test]
    fn global_overrides_feed_load_options() {
        let cli = Cli::try_parse_from([
            "rfq",
            "totals",
            "--quote",
            "quote-demo-001",
            "--database-url",
            "sqlite::memory:",
            "--log-format",
            "json",
            "--collaborator-timeout-ms",
            "750",
        ])
        .expect("valid arguments");
        let options = cli.load_options();

        assert!(matches!(cli.command, Command::Totals(_)));
        assert_eq!(options.overrides.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(options.overrides.log_format, Some(LogFormat::Json));
        assert_eq!(options.overrides.collaborator_timeout_ms, Some(750));
        assert!(!options.require_file);
    }

    #[test]
    fn collaborator_timeout_defaults_to_config() {
        let cli = Cli::try_parse_from(["rfq", "seed"]).expect("valid arguments");
        assert_eq!(cli.load_options().overrides.collaborator_timeout_ms, None);

        let parsed = Cli::try_parse_from(["rfq", "seed", "--collaborator-timeout-ms", "soon"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn price_requires_a_decimal_quantity() {
        let parsed = Cli::try_parse_from([
            "rfq",
            "price",
            "--item",
            "item-bolt",
            "--offering",
            "off-bolt-acme",
            "--segment",
            "seg-retail",
            "--quantity",
            "lots",
        ]);
        assert!(parsed.is_err());
    }
}
