//! Error types shared across the crate.
//!
//! The crawl loop itself swallows most of these (see [`crate::crawl`]); they
//! only reach a caller when the mandatory finalization path fails, when a
//! configuration is rejected, or from the era conversion utility.

use thiserror::Error;

/// Failures talking to the browser automation session.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("webdriver transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The driver answered with a W3C error payload.
    #[error("webdriver returned {status} ({error}): {message}")]
    Protocol {
        status: u16,
        error: String,
        message: String,
    },

    #[error("malformed webdriver response: {0}")]
    Malformed(String),

    #[error("browser session already released")]
    Released,
}

/// Faults raised while crawling or persisting a price history.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid css selector '{0}'")]
    Selector(String),
}

/// The era utility only knows a fixed set of era prefixes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EraError {
    #[error("Unknown era format: {label}")]
    UnknownEraFormat { label: String },

    #[error("no year number in era label: {label}")]
    MissingYear { label: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
