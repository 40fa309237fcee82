//! # Kabuka
//!
//! Crawls historical stock price tables from a paginated, JavaScript-rendered
//! quote site, normalizes them into typed records and saves them as CSV, with
//! a recovery snapshot that survives interruption.
//!
//! ## Pipeline
//!
//! 1. **Fetch**: [`fetcher::PageFetcher`] loads page N in a browser session
//!    and cuts out the rendered history table
//! 2. **Normalize**: [`normalize::normalize`] maps locale headers, dates and
//!    numbers onto [`models::PriceRecord`]s
//! 3. **Crawl**: [`crawl::Crawler`] pages until the history ends, checkpoints
//!    every few pages and merges everything at the end
//! 4. **Output**: [`outputs::csv`] writes the recovery and final files
//!
//! [`era::convert_era_year`] is a standalone helper for Japanese era year
//! labels.
//!
//! ## Usage
//!
//! ```ignore
//! use kabuka::browser::{WebDriverOptions, WebDriverSession};
//! use kabuka::config::CrawlConfig;
//!
//! let config = CrawlConfig::load("crawl.yaml")?;
//! let session = WebDriverSession::start(&WebDriverOptions::default()).await?;
//! let result = kabuka::crawl::crawl(session, &config, std::future::pending()).await?;
//! println!("{} rows", result.table.len());
//! ```

pub mod browser;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod era;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod normalize;
pub mod outputs;
pub mod utils;

pub use crawl::{CrawlResult, CrawlState, crawl};
pub use error::{BrowserError, ConfigError, CrawlError, EraError};
pub use models::{Column, Field, PageBatch, PriceRecord, PriceTable};
