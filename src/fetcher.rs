//! Page fetcher: one history page → its rendered price table.
//!
//! The history table is built by client-side JavaScript, so a plain HTTP GET
//! returns no rows. Each page is loaded in the browser session, the fetcher
//! waits for the table element, then cuts the table out of the rendered
//! markup.

use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::browser::BrowserSession;
use crate::config::{CrawlConfig, Timeframe};
use crate::error::CrawlError;
use crate::utils::truncate_for_log;

/// History table selector. Matches class substrings so that the hashed
/// suffixes the site appends to its class names do not matter.
pub const TABLE_CSS: &str =
    "table[class*='StocksEtfReitPriceHistory__historyTable'][class*='HistoryTable']";

/// Outer HTML of one page's price table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable(String);

impl RawTable {
    pub fn html(&self) -> &str {
        &self.0
    }
}

/// What a page load produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Table(RawTable),
    /// Rendering finished but no table element was in the markup.
    Absent,
    /// The table did not appear within the wait bound.
    Timeout,
}

/// Fixed query parameters shared by every page of one crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub ticker: String,
    pub date_from: String,
    pub date_to: String,
    pub timeframe: Timeframe,
}

impl From<&CrawlConfig> for PageQuery {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            ticker: config.ticker.clone(),
            date_from: config.date_from.clone(),
            date_to: config.date_to.clone(),
            timeframe: config.timeframe,
        }
    }
}

/// Build the URL of one history page.
///
/// # Arguments
///
/// * `base_url` - History page template; `{ticker}` is replaced by the
///   URL-encoded ticker
/// * `query` - Range and granularity shared by every page of the crawl
/// * `page` - 1-based page index
///
/// # Returns
///
/// The full URL with `styl`, `from`, `to`, `timeFrame` and `page` query
/// parameters, e.g.
/// `https://finance.yahoo.co.jp/quote/4689.T/history?styl=stock&from=19900101&to=20250926&timeFrame=d&page=2`.
pub fn page_url(base_url: &str, query: &PageQuery, page: usize) -> String {
    let base = base_url.replace("{ticker}", &urlencoding::encode(&query.ticker));
    format!(
        "{base}?styl=stock&from={from}&to={to}&timeFrame={tf}&page={page}",
        from = urlencoding::encode(&query.date_from),
        to = urlencoding::encode(&query.date_to),
        tf = query.timeframe.code(),
    )
}

/// Cut the first element matching `selector` out of a rendered page.
pub fn extract_table(source: &str, selector: &Selector) -> Option<RawTable> {
    let document = Html::parse_document(source);
    document
        .select(selector)
        .next()
        .map(|table| RawTable(table.html()))
}

/// Loads history pages through a browser session.
#[derive(Debug)]
pub struct PageFetcher<S> {
    session: S,
    base_url: String,
    query: PageQuery,
    wait: Duration,
    selector: Selector,
}

impl<S> PageFetcher<S>
where
    S: BrowserSession,
{
    pub fn new(
        session: S,
        base_url: impl Into<String>,
        query: PageQuery,
        wait: Duration,
    ) -> Result<Self, CrawlError> {
        let selector =
            Selector::parse(TABLE_CSS).map_err(|e| CrawlError::Selector(format!("{TABLE_CSS}: {e}")))?;
        Ok(Self {
            session,
            base_url: base_url.into(),
            query,
            wait,
            selector,
        })
    }

    pub fn from_config(session: S, config: &CrawlConfig) -> Result<Self, CrawlError> {
        Self::new(
            session,
            config.base_url.clone(),
            PageQuery::from(config),
            config.page_timeout(),
        )
    }

    pub fn url(&self, page: usize) -> String {
        page_url(&self.base_url, &self.query, page)
    }

    /// Load one history page and cut out its price table.
    ///
    /// Navigates, waits up to the configured bound for the table to render,
    /// then reads the page source.
    ///
    /// # Arguments
    ///
    /// * `page` - 1-based page index
    ///
    /// # Returns
    ///
    /// - [`PageOutcome::Table`] with the table's outer HTML
    /// - [`PageOutcome::Timeout`] when the table never appeared
    /// - [`PageOutcome::Absent`] when rendering finished without a table
    ///
    /// # Errors
    ///
    /// Browser failures (navigation, transport, protocol) as
    /// [`CrawlError::Browser`]; the crawl loop treats them as faults.
    #[instrument(level = "info", skip(self), fields(ticker = %self.query.ticker))]
    pub async fn fetch(&mut self, page: usize) -> Result<PageOutcome, CrawlError> {
        let url = self.url(page);
        debug!(%url, "Loading history page");
        self.session.navigate(&url).await?;

        if !self.session.wait_for_element(TABLE_CSS, self.wait).await? {
            warn!(page, wait = ?self.wait, "Timed out waiting for history table");
            return Ok(PageOutcome::Timeout);
        }

        let source = self.session.page_source().await?;
        match extract_table(&source, &self.selector) {
            Some(table) => {
                debug!(page, html = %truncate_for_log(table.html(), 200), "Extracted history table");
                Ok(PageOutcome::Table(table))
            }
            None => Ok(PageOutcome::Absent),
        }
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }
}
