//! # Kabuka
//!
//! Command-line entry point: crawls one ticker's price history into CSV.
//!
//! ## Usage
//!
//! ```sh
//! chromedriver --port=9515 &
//! kabuka --ticker 4689.T --from 19900101 --to 20250926 --output data/stock_history_all.csv
//! ```
//!
//! Ctrl-C stops the crawl early; whatever was collected is still written.

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use kabuka::browser::{RetrySession, WebDriverOptions, WebDriverSession};
use kabuka::cli::Cli;
use kabuka::config::CrawlConfig;
use kabuka::crawl;
use kabuka::utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("kabuka starting up");

    // Parse CLI, then layer it over the optional config file
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let base = match &args.config {
        Some(path) => CrawlConfig::load(path)?,
        None => CrawlConfig::default(),
    };
    let config = args.merge_into(base);
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid crawl configuration");
        return Err(e.into());
    }
    info!(
        ticker = %config.ticker,
        from = %config.date_from,
        to = %config.date_to,
        timeframe = ?config.timeframe,
        max_pages = config.max_pages,
        checkpoint_every = config.checkpoint_every,
        "Crawl configured"
    );

    // Early check: ensure the output directory is writable
    let out_dir = config
        .output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    if let Err(e) = ensure_writable_dir(out_dir).await {
        error!(
            path = %out_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    // ---- Browser session ----
    let options = WebDriverOptions {
        endpoint: config.webdriver_url.clone(),
        headless: config.headless,
        ..Default::default()
    };
    let session = WebDriverSession::start(&options).await?;
    let session = RetrySession::new(session, config.navigate_retries, Duration::from_secs(1));

    // ---- Crawl ----
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C; crawl cannot be interrupted");
            std::future::pending::<()>().await;
        }
        info!("Interrupt received");
    };
    let result = crawl(session, &config, shutdown).await?;

    match &result.final_path {
        Some(path) => info!(
            state = ?result.state,
            pages = result.pages_accepted,
            rows = result.table.len(),
            path = %path.display(),
            "Saved price history"
        ),
        None => warn!(state = ?result.state, "No price history collected"),
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
