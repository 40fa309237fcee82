//! Command-line interface definitions.
//!
//! Every flag can also come from an environment variable, and all of them
//! override values loaded from `--config`.

use clap::Parser;
use std::path::PathBuf;

use crate::config::{CrawlConfig, Timeframe};

/// Command-line arguments for the price history crawler.
///
/// # Examples
///
/// ```sh
/// # Daily history of one ticker into data/
/// kabuka --ticker 4689.T --from 19900101 --to 20250926 --output data/stock_history_all.csv
///
/// # Weekly bars, visible browser, checkpoint every 3 pages
/// kabuka -t 4689.T --from 19900101 --to 20250926 -o weekly.csv --timeframe w --headed --checkpoint-every 3
///
/// # Settings from a file, ticker overridden
/// kabuka --config crawl.yaml --ticker 7203.T
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML crawl configuration
    #[arg(short, long, env = "KABUKA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Ticker symbol, e.g. 4689.T
    #[arg(short, long, env = "KABUKA_TICKER")]
    pub ticker: Option<String>,

    /// Range start, e.g. 19900101
    #[arg(long = "from", env = "KABUKA_FROM")]
    pub date_from: Option<String>,

    /// Range end, e.g. 20250926
    #[arg(long = "to", env = "KABUKA_TO")]
    pub date_to: Option<String>,

    /// Final CSV output path
    #[arg(short, long, env = "KABUKA_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Bar granularity
    #[arg(long, value_enum, env = "KABUKA_TIMEFRAME")]
    pub timeframe: Option<Timeframe>,

    /// Maximum number of pages to load
    #[arg(long, env = "KABUKA_MAX_PAGES")]
    pub max_pages: Option<usize>,

    /// Rewrite the recovery file every N pages
    #[arg(long, env = "KABUKA_CHECKPOINT_EVERY")]
    pub checkpoint_every: Option<usize>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headed: bool,

    /// WebDriver endpoint (chromedriver, Selenium, ...)
    #[arg(long, env = "KABUKA_WEBDRIVER_URL")]
    pub webdriver_url: Option<String>,
}

impl Cli {
    /// Apply the flags that were given on top of `base`.
    pub fn merge_into(&self, base: CrawlConfig) -> CrawlConfig {
        let mut config = base;
        if let Some(ticker) = &self.ticker {
            config.ticker = ticker.clone();
        }
        if let Some(from) = &self.date_from {
            config.date_from = from.clone();
        }
        if let Some(to) = &self.date_to {
            config.date_to = to.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(timeframe) = self.timeframe {
            config.timeframe = timeframe;
        }
        if let Some(max_pages) = self.max_pages {
            config.max_pages = max_pages;
        }
        if let Some(every) = self.checkpoint_every {
            config.checkpoint_every = every;
        }
        if self.headed {
            config.headless = false;
        }
        if let Some(url) = &self.webdriver_url {
            config.webdriver_url = url.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "kabuka",
            "--ticker",
            "4689.T",
            "--from",
            "19900101",
            "--to",
            "20250926",
            "--output",
            "data/out.csv",
        ]);

        assert_eq!(cli.ticker.as_deref(), Some("4689.T"));
        assert_eq!(cli.date_from.as_deref(), Some("19900101"));
        assert_eq!(cli.date_to.as_deref(), Some("20250926"));
        assert_eq!(cli.output, Some(PathBuf::from("data/out.csv")));
        assert!(!cli.headed);
    }

    #[test]
    fn test_cli_short_flags_and_timeframe_alias() {
        let cli = Cli::parse_from(["kabuka", "-t", "7203.T", "-o", "/tmp/x.csv", "--timeframe", "w"]);

        assert_eq!(cli.ticker.as_deref(), Some("7203.T"));
        assert_eq!(cli.timeframe, Some(Timeframe::Weekly));
    }

    #[test]
    fn test_flags_override_file_values() {
        let base = CrawlConfig {
            ticker: "4689.T".into(),
            date_from: "19900101".into(),
            date_to: "20250926".into(),
            checkpoint_every: 10,
            ..Default::default()
        };
        let cli = Cli::parse_from(["kabuka", "--checkpoint-every", "3", "--headed", "--max-pages", "7"]);

        let merged = cli.merge_into(base);
        assert_eq!(merged.ticker, "4689.T");
        assert_eq!(merged.checkpoint_every, 3);
        assert_eq!(merged.max_pages, 7);
        assert!(!merged.headless);
    }
}
