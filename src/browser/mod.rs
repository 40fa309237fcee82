//! Browser automation session used to render the history pages.
//!
//! The crawl loop only needs four operations from a browser, captured by the
//! [`BrowserSession`] trait:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | [`navigate`](BrowserSession::navigate) | load a page URL |
//! | [`wait_for_element`](BrowserSession::wait_for_element) | wait for client-side rendering |
//! | [`page_source`](BrowserSession::page_source) | read the rendered markup |
//! | [`quit`](BrowserSession::quit) | release the browser |
//!
//! # Implementations
//!
//! - [`webdriver::WebDriverSession`]: a W3C WebDriver client (chromedriver,
//!   geckodriver, Selenium) spoken over plain HTTP
//! - [`retry::RetrySession`]: decorator retrying failed navigations with
//!   exponential backoff

use std::time::Duration;

use crate::error::BrowserError;

pub mod retry;
pub mod webdriver;

pub use retry::RetrySession;
pub use webdriver::{WebDriverOptions, WebDriverSession};

/// A single rendering browser, driven one page at a time.
///
/// Sessions are owned by exactly one crawl and released through
/// [`quit`](BrowserSession::quit) before the crawl returns.
pub trait BrowserSession {
    /// Load `url` in the current window.
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Wait until an element matching `css` is present.
    ///
    /// Returns `Ok(false)` when `timeout` elapses first.
    async fn wait_for_element(&mut self, css: &str, timeout: Duration)
    -> Result<bool, BrowserError>;

    /// Current rendered markup of the page.
    async fn page_source(&mut self) -> Result<String, BrowserError>;

    /// Release the browser. Calling it twice is harmless.
    async fn quit(&mut self) -> Result<(), BrowserError>;
}
