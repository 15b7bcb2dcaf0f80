//! Clinic tracker CLI
//!
//! Polls the configured search page and dispatches availability alerts.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use clinic_tracker::{
    config,
    error::Result,
    models::Config,
    pipeline::{Reconciler, Tracker},
    services::{AlertSink, LogAlerter, PageFetcher, PageParser, WebhookAlerter},
    storage::{self, CacheBackend, CacheStore, MemoryBackend},
    utils::http::{self, RetryPolicy},
};
use tracing_subscriber::EnvFilter;

/// Clinic appointment tracker
#[derive(Parser, Debug)]
#[command(
    name = "clinic-tracker",
    version,
    about = "Watches clinic appointment availability and sends alerts"
)]
struct Cli {
    /// Optional TOML configuration file (environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Log alerts instead of sending them and keep the cache in memory
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll forever (default)
    Run,

    /// Run a single poll and print the report
    Once,

    /// Parse a saved search page and print the clinics found
    Parse {
        /// HTML file to parse
        file: PathBuf,
    },

    /// Validate configuration
    Validate,

    /// Inspect the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Print every cached clinic
    List,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

/// Initialize logging based on verbosity and format.
fn init_logging(verbose: bool, format: LogFormat) {
    let level = if verbose { "debug" } else { "info" };
    match format {
        LogFormat::Text => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
                .format_timestamp_secs()
                .init();
        }
        LogFormat::Json => {
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// Open the cache, or an in-memory one for dry runs.
fn open_store(config: &Config, dry_run: bool) -> Result<CacheStore> {
    let backend: Box<dyn CacheBackend> = if dry_run {
        log::info!("Dry run: using an in-memory cache");
        Box::new(MemoryBackend::new())
    } else {
        storage::open_backend(&config.cache)?
    };
    Ok(CacheStore::new(backend, config.policy.alert_interval()))
}

/// Wire the fetcher, parser, cache and alert sink together.
fn build_tracker(config: &Config, dry_run: bool) -> Result<Tracker<'_>> {
    let client = http::create_client(&config.source)?;

    let alerts: Box<dyn AlertSink> = if dry_run {
        Box::new(LogAlerter)
    } else {
        Box::new(WebhookAlerter::new(
            client.clone(),
            &config.alert.webhook_url,
            RetryPolicy::from_config(&config.retry),
        ))
    };

    let fetcher = PageFetcher::from_config(config, client);
    log::info!("Watching {}", fetcher.url());

    let reconciler = Reconciler::new(
        open_store(config, dry_run)?,
        alerts,
        &config.policy,
        config.source.base_url.clone(),
        config.source.search_url(),
    );

    Ok(Tracker::new(
        Box::new(fetcher),
        PageParser::new()?,
        reconciler,
        config.scheduler.sleep_interval(),
    ))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config = config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            config.validate(!cli.dry_run)?;
            log::info!(
                "Starting tracker (up >= {}, down <= {}, cooldown {} min, poll every {} s)",
                config.policy.up_threshold,
                config.policy.down_threshold,
                config.policy.alert_interval_minutes,
                config.scheduler.sleep_interval_secs
            );

            let tracker = build_tracker(&config, cli.dry_run)?;
            tracker.run().await;
        }

        Command::Once => {
            config.validate(!cli.dry_run)?;

            let tracker = build_tracker(&config, cli.dry_run)?;
            let report = tracker.run_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Parse { file } => {
            let content = std::fs::read(&file)?;
            let snapshots = PageParser::new()?.parse_bytes(&content);
            log::info!("Found {} clinics in {}", snapshots.len(), file.display());
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate(!cli.dry_run) {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("Search URL: {}", config.source.search_url());
            log::info!("Config OK");
        }

        Command::Cache {
            action: CacheAction::List,
        } => {
            let store = open_store(&config, false)?;
            let entries = store.entries(Utc::now()).await?;
            if entries.is_empty() {
                log::info!("Cache is empty");
            }

            for (name, entry) in entries {
                println!(
                    "{}\t{}\tup={}\tdown={}\t{}",
                    name,
                    entry.available_count,
                    entry.last_up_alert_at.to_rfc3339(),
                    entry.last_down_alert_at.to_rfc3339(),
                    entry.detail_href.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}
