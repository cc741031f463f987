use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use eview_signal_extractor::chromedriver_manager::ChromeDriverManager;
use eview_signal_extractor::config::RunConfig;
use eview_signal_extractor::scraper::browser::BrowserDriver;
use eview_signal_extractor::{RunOutcome, ScraperEngine};

/// Extract PLC signal lists from an EPLAN eVIEW project.
#[derive(Parser, Debug)]
#[command(name = "eview_extractor", version, about)]
struct Cli {
    /// Config file (JSON). Defaults to the platform config directory.
    #[arg(short, long, env = "EVIEW_CONFIG")]
    config: Option<PathBuf>,

    /// Where to write the per-page JSON array.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Project number or name to open.
    #[arg(short, long)]
    project: Option<String>,

    /// Run Chrome without a window.
    #[arg(long)]
    headless: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose || config.debug_mode);

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<RunConfig> {
    let mut config = RunConfig::load(cli.config.as_deref())?;
    if let Some(output) = &cli.output {
        config.output_path = output.clone();
    }
    if let Some(project) = &cli.project {
        config.project = project.clone();
    }
    if cli.headless {
        config.headless = true;
    }
    Ok(config)
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: RunConfig) -> Result<ExitCode> {
    let config = Arc::new(config);

    let driver_manager = ChromeDriverManager::new(config.driver.clone());
    driver_manager.start().await?;

    let session = match BrowserDriver::connect(&config).await {
        Ok(session) => session,
        Err(e) => {
            driver_manager.stop().await;
            return Err(e.into());
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, cancelling...");
                cancel.cancel();
            }
        })
    };

    let engine = ScraperEngine::new(session, config.clone(), cancel);
    let result = tokio::spawn(engine.run()).await?;
    ctrl_c.abort();

    let succeeded = match result {
        Ok(report) => {
            match report.outcome() {
                RunOutcome::Completed(pages) => info!(
                    "✅ {} pages extracted to {} ({} records, {} items scanned)",
                    pages,
                    config.output_path.display(),
                    report.records.len(),
                    report.stats.items_scanned
                ),
                RunOutcome::NothingFound => warn!(
                    "⚠️ No '{}' pages with PLC signals were found",
                    config.page_type
                ),
            }
            true
        }
        Err(e) => {
            error!("❌ Extraction failed in {}: {}", e.phase(), e);
            false
        }
    };

    if !succeeded && config.debug_mode {
        info!("Debug mode: browser left open for inspection, press Ctrl-C to exit");
        let _ = tokio::signal::ctrl_c().await;
    }
    driver_manager.stop().await;

    Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
