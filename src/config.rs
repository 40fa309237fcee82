//! Crawl configuration.
//!
//! A [`CrawlConfig`] can be loaded from a YAML file and is then overridden by
//! command-line flags (see [`crate::cli`]). Every field has a default except
//! the ticker, date range and output path, which [`CrawlConfig::validate`]
//! insists on.
//!
//! ```yaml
//! ticker: 4689.T
//! date_from: "19900101"
//! date_to: "20250926"
//! output: data/stock_history_all.csv
//! timeframe: daily
//! max_pages: 300
//! checkpoint_every: 3
//! headless: false
//! ```

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

use crate::error::ConfigError;

/// History page of the source site; `{ticker}` is substituted per crawl.
pub const DEFAULT_BASE_URL: &str = "https://finance.yahoo.co.jp/quote/{ticker}/history";

/// Granularity of the price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    #[default]
    #[serde(alias = "d")]
    #[value(alias = "d")]
    Daily,
    #[serde(alias = "w")]
    #[value(alias = "w")]
    Weekly,
    #[serde(alias = "m")]
    #[value(alias = "m")]
    Monthly,
}

impl Timeframe {
    /// Query-string code understood by the site.
    pub fn code(self) -> &'static str {
        match self {
            Timeframe::Daily => "d",
            Timeframe::Weekly => "w",
            Timeframe::Monthly => "m",
        }
    }
}

/// Everything one crawl run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub ticker: String,
    /// Range start as the site expects it, e.g. `19900101`.
    pub date_from: String,
    pub date_to: String,
    /// Final CSV path. The recovery file sits next to it.
    pub output: PathBuf,
    pub timeframe: Timeframe,
    pub max_pages: usize,
    pub headless: bool,
    /// Rewrite the recovery file every this many pages.
    pub checkpoint_every: usize,
    /// How long to wait for the table to render.
    pub page_timeout_secs: u64,
    /// Pause after each accepted page.
    pub page_delay_ms: u64,
    pub webdriver_url: String,
    pub base_url: String,
    /// Extra navigation attempts before a page load counts as a fault.
    pub navigate_retries: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            ticker: String::new(),
            date_from: String::new(),
            date_to: String::new(),
            output: PathBuf::from("stock_history.csv"),
            timeframe: Timeframe::Daily,
            max_pages: 300,
            headless: true,
            checkpoint_every: 5,
            page_timeout_secs: 12,
            page_delay_ms: 1000,
            webdriver_url: "http://localhost:9515".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            navigate_retries: 2,
        }
    }
}

impl CrawlConfig {
    /// Read a crawl configuration from a YAML file.
    ///
    /// # Arguments
    ///
    /// * `path` - YAML file; every key is optional and missing ones take the
    ///   [`Default`] value
    ///
    /// # Returns
    ///
    /// The parsed configuration, not yet validated (see [`Self::validate`]).
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be read and
    /// [`ConfigError::Yaml`] when it is not a valid configuration.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: CrawlConfig = serde_yaml::from_str(&text)?;
        info!(ticker = %config.ticker, "Loaded crawl configuration");
        Ok(config)
    }

    /// Reject configurations the crawl loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticker.trim().is_empty() {
            return Err(ConfigError::Invalid("ticker must not be empty".into()));
        }
        if self.date_from.is_empty() || self.date_to.is_empty() {
            return Err(ConfigError::Invalid("date range must be given".into()));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::Invalid("max_pages must be positive".into()));
        }
        if self.checkpoint_every == 0 {
            return Err(ConfigError::Invalid("checkpoint_every must be positive".into()));
        }
        if !self.base_url.contains("{ticker}") {
            return Err(ConfigError::Invalid("base_url must contain {ticker}".into()));
        }
        Ok(())
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}
