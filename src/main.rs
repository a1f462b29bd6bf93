use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bookwatch::config::Config;
use bookwatch::monitor::{Monitor, RunOptions};
use bookwatch::notify::{BrevoNotifier, Notifier};
use bookwatch::scrapers::BookFinderScraper;
use bookwatch::specs::SpecSheetLoader;
use bookwatch::storage::Store;

/// Watch a book marketplace for listings matching a spec sheet
#[derive(Parser, Debug)]
#[command(name = "bookwatch", version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Test spec sheet and marketplace connectivity, then exit
    #[arg(long)]
    test: bool,

    /// Only sync the spec sheet into the database
    #[arg(long, conflicts_with = "check_only")]
    sync_only: bool,

    /// Skip the sync phase and check stored specs
    #[arg(long)]
    check_only: bool,

    /// Do not send the digest email
    #[arg(long)]
    no_email: bool,
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "bookwatch=debug" } else { "bookwatch=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    info!("📚 Bookwatch - marketplace listing monitor");

    tokio::select! {
        result = run(cli) => match result {
            Ok(()) => {
                info!("✅ Monitoring complete");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Fatal error: {:#}", e);
                ExitCode::from(1)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted by user");
            ExitCode::from(130)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    config.validate().context("invalid configuration")?;

    let scraper = BookFinderScraper::from_config(&config.marketplace)
        .context("building marketplace client")?
        .with_name_variants(config.monitoring.name_variants());
    let sheet = SpecSheetLoader::new(&config.specs.path);

    if cli.test {
        return test_connections(&sheet, &scraper).await;
    }

    let store = Store::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path.display()))?;

    let notifier = if cli.no_email || cli.sync_only {
        None
    } else {
        Some(BrevoNotifier::from_env(&config.email).context("configuring email delivery")?)
    };

    let options = RunOptions {
        sync: !cli.check_only,
        sync_only: cli.sync_only,
        notify: !cli.no_email,
        max_specs: config.monitoring.max_specs_per_run,
    };

    let monitor = Monitor::new(scraper, store);
    let summary = monitor
        .run(
            &options,
            &sheet,
            notifier.as_ref().map(|n| n as &dyn Notifier),
        )
        .await?;

    let stats = monitor.store().get_statistics()?;
    info!(
        "Run summary: {} synced, {} checked, {} new listings, digest sent: {}",
        summary.synced, summary.checked, summary.new_listings, summary.digest_sent
    );
    info!(
        "Database: {} books, {} active listings, {} awaiting notification",
        stats.total_books, stats.active_listings, stats.unnotified_listings
    );
    Ok(())
}

async fn test_connections(sheet: &SpecSheetLoader, scraper: &BookFinderScraper) -> anyhow::Result<()> {
    info!("Test mode: checking connections...");

    let specs = sheet
        .load()
        .with_context(|| format!("reading spec sheet {}", sheet.path().display()))?;
    info!("✓ Spec sheet loaded: {} search specifications", specs.len());

    if !scraper.test_connection().await {
        bail!("✗ BookFinder connection failed");
    }
    info!("✓ BookFinder connection successful");
    info!("✓ All connections successful!");
    Ok(())
}
