//! Pagination-driven crawl with checkpointing.
//!
//! # State machine
//!
//! ```text
//!            ┌──────── page accepted ────────┐
//!            ▼                               │
//!        Running ──fetch──► normalize ──► cycle check ──► append ──► checkpoint? ──► pause
//!            │                  │              │
//!   Timeout ─┤        no rows ──┤     repeat ──┤
//!            ▼                  ▼              ▼
//!   StoppedTimeout        StoppedEmpty    StoppedCycle      (page == max_pages → StoppedMaxPages)
//!
//!   interruption signal → Interrupted        any fault → Failed
//! ```
//!
//! Every terminal state falls through to the same finalization: the browser
//! is released, the accumulated batches are merged (deduplicated, sorted
//! latest-first) into the recovery file, and, if anything was collected, into
//! the final output file.
//!
//! Stop conditions and loop faults never reach the caller as errors; only a
//! failure to release the browser or to write the final files does.
//!
//! Repeated pages are recognized by their leading date alone. A page that
//! reorders or partially overlaps the previous one without changing its first
//! row is accepted and its duplicates removed at merge time.

use chrono::NaiveDate;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::browser::BrowserSession;
use crate::config::CrawlConfig;
use crate::error::CrawlError;
use crate::fetcher::{PageFetcher, PageOutcome};
use crate::models::{PageBatch, PriceTable};
use crate::normalize::normalize;
use crate::outputs::csv::{partial_path, write_table};

/// Where the crawl loop currently is, or why it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Running,
    /// A page rendered without a usable table.
    StoppedEmpty,
    /// A page never rendered its table; treated as end of history.
    StoppedTimeout,
    /// A page repeated the previous page's leading date.
    StoppedCycle,
    StoppedMaxPages,
    Interrupted,
    Failed,
    /// Finalization finished.
    Done,
}

impl CrawlState {
    /// `true` for stops that mean "no more history", as opposed to an
    /// interruption or a fault.
    pub fn is_natural_end(self) -> bool {
        matches!(
            self,
            CrawlState::StoppedEmpty
                | CrawlState::StoppedTimeout
                | CrawlState::StoppedCycle
                | CrawlState::StoppedMaxPages
        )
    }
}

/// Outcome of a crawl run.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlResult {
    /// Merged, deduplicated, latest-first records. Empty if nothing was
    /// collected.
    pub table: PriceTable,
    /// Why the page loop ended.
    pub state: CrawlState,
    pub pages_accepted: usize,
    /// Recovery snapshot, always written.
    pub partial_path: PathBuf,
    /// Final output, written only when at least one page was accepted.
    pub final_path: Option<PathBuf>,
}

/// Growing collection of accepted page batches. Append-only.
#[derive(Debug, Default)]
pub struct Accumulator {
    batches: Vec<PageBatch>,
}

impl Accumulator {
    pub fn push(&mut self, batch: PageBatch) {
        self.batches.push(batch);
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Leading date of the most recently accepted batch.
    pub fn last_leading_date(&self) -> Option<NaiveDate> {
        self.batches.last().and_then(|b| b.table.leading_date())
    }

    /// All batches merged; an empty accumulator yields the canonical empty
    /// table.
    pub fn merged(&self) -> PriceTable {
        if self.batches.is_empty() {
            return PriceTable::empty();
        }
        PriceTable::merge(self.batches.iter().map(|b| &b.table))
    }
}

/// Limits and output location of one crawl.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlOptions {
    pub max_pages: usize,
    pub checkpoint_every: usize,
    /// Pause after each accepted page.
    pub page_delay: Duration,
    pub output: PathBuf,
}

impl From<&CrawlConfig> for CrawlOptions {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            checkpoint_every: config.checkpoint_every.max(1),
            page_delay: config.page_delay(),
            output: config.output.clone(),
        }
    }
}

/// Drives one crawl over a single browser session.
#[derive(Debug)]
pub struct Crawler<S> {
    fetcher: PageFetcher<S>,
    options: CrawlOptions,
    accumulator: Accumulator,
    partial_path: PathBuf,
    state: CrawlState,
}

impl<S> Crawler<S>
where
    S: BrowserSession,
{
    pub fn new(fetcher: PageFetcher<S>, options: CrawlOptions) -> Self {
        let partial_path = partial_path(&options.output);
        Self {
            fetcher,
            options,
            accumulator: Accumulator::default(),
            partial_path,
            state: CrawlState::Running,
        }
    }

    pub fn from_config(session: S, config: &CrawlConfig) -> Result<Self, CrawlError> {
        let fetcher = PageFetcher::from_config(session, config)?;
        Ok(Self::new(fetcher, CrawlOptions::from(config)))
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    fn transition(&mut self, next: CrawlState) {
        debug!(from = ?self.state, to = ?next, "Crawl state transition");
        self.state = next;
    }

    /// Crawl until a stop condition, a fault, or `shutdown` resolves, then
    /// finalize.
    ///
    /// # Errors
    ///
    /// Only finalization failures: releasing the browser, or writing the
    /// recovery/final files.
    #[instrument(level = "info", skip_all, fields(output = %self.options.output.display()))]
    pub async fn run<F>(mut self, shutdown: F) -> Result<CrawlResult, CrawlError>
    where
        F: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            outcome = self.crawl_pages() => Some(outcome),
            _ = shutdown => None,
        };

        let state = match outcome {
            Some(Ok(state)) => state,
            Some(Err(e)) => {
                error!(error = %e, kind = ?e, pages = self.accumulator.len(), "Crawl fault; saving what was collected");
                CrawlState::Failed
            }
            None => {
                warn!(pages = self.accumulator.len(), "Crawl interrupted; saving what was collected");
                CrawlState::Interrupted
            }
        };

        self.transition(state);
        self.finalize().await
    }

    async fn crawl_pages(&mut self) -> Result<CrawlState, CrawlError> {
        for page in 1..=self.options.max_pages {
            let raw = match self.fetcher.fetch(page).await? {
                PageOutcome::Table(raw) => raw,
                PageOutcome::Timeout => {
                    warn!(page, "Table wait timed out; treating as end of history");
                    return Ok(CrawlState::StoppedTimeout);
                }
                PageOutcome::Absent => {
                    info!(page, "No table on page; stopping");
                    return Ok(CrawlState::StoppedEmpty);
                }
            };

            let table = normalize(raw.html());
            if table.is_empty() {
                info!(page, "Empty page; stopping");
                return Ok(CrawlState::StoppedEmpty);
            }

            let leading = table.leading_date();
            if leading.is_some() && leading == self.accumulator.last_leading_date() {
                info!(page, top = ?leading, "Page repeats the previous one; stopping");
                return Ok(CrawlState::StoppedCycle);
            }

            let rows = table.len();
            self.accumulator.push(PageBatch::new(page, table));
            info!(page, rows, "Page accepted");

            if page % self.options.checkpoint_every == 0 {
                self.checkpoint().await?;
            }

            sleep(self.options.page_delay).await;
        }

        info!(max_pages = self.options.max_pages, "Page limit reached");
        Ok(CrawlState::StoppedMaxPages)
    }

    async fn checkpoint(&self) -> Result<(), CrawlError> {
        let partial = self.accumulator.merged();
        write_table(&self.partial_path, &partial).await?;
        info!(path = %self.partial_path.display(), rows = partial.len(), "Checkpoint saved");
        Ok(())
    }

    async fn finalize(mut self) -> Result<CrawlResult, CrawlError> {
        let state = self.state;
        // The snapshot is written even when releasing the browser fails.
        let released = self.fetcher.session_mut().quit().await;
        if let Err(e) = &released {
            error!(error = %e, "Failed to release browser session");
        }

        let merged = self.accumulator.merged();
        write_table(&self.partial_path, &merged).await?;
        info!(path = %self.partial_path.display(), rows = merged.len(), "Final partial save");
        released?;

        let pages_accepted = self.accumulator.len();
        if self.accumulator.is_empty() {
            self.transition(CrawlState::Done);
            info!(?state, "Crawl finished without data");
            return Ok(CrawlResult {
                table: merged,
                state,
                pages_accepted,
                partial_path: self.partial_path,
                final_path: None,
            });
        }

        write_table(&self.options.output, &merged).await?;
        self.transition(CrawlState::Done);
        info!(
            ?state,
            pages = pages_accepted,
            rows = merged.len(),
            path = %self.options.output.display(),
            "Crawl complete"
        );

        Ok(CrawlResult {
            table: merged,
            state,
            pages_accepted,
            partial_path: self.partial_path,
            final_path: Some(self.options.output),
        })
    }
}

/// Crawl the history described by `config` over `session`.
///
/// `shutdown` is the manual interruption signal (e.g. Ctrl-C); pass
/// [`std::future::pending`] to run until a natural stop.
pub async fn crawl<S, F>(session: S, config: &CrawlConfig, shutdown: F) -> Result<CrawlResult, CrawlError>
where
    S: BrowserSession,
    F: Future<Output = ()>,
{
    Crawler::from_config(session, config)?.run(shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrowserError;
    use chrono::Duration as Days;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    /// What the fake site serves for a page index.
    #[derive(Debug, Clone)]
    enum FakePage {
        Rows(Vec<NaiveDate>),
        Timeout,
        NoTable,
        Broken,
    }

    #[derive(Debug, Default)]
    struct SiteLog {
        visited: Vec<usize>,
        /// Rows in the recovery file when each page was requested.
        partial_rows: Vec<(usize, Option<usize>)>,
        /// Clock reading at each navigation.
        requested_at: Vec<tokio::time::Instant>,
        quit: bool,
    }

    /// In-memory stand-in for a rendering browser.
    struct FakeSite {
        pages: HashMap<usize, FakePage>,
        current: usize,
        partial: PathBuf,
        interrupt_at: Option<(usize, oneshot::Sender<()>)>,
        log: Arc<Mutex<SiteLog>>,
    }

    impl FakeSite {
        fn new(pages: HashMap<usize, FakePage>, config: &CrawlConfig) -> (Self, Arc<Mutex<SiteLog>>) {
            let log = Arc::new(Mutex::new(SiteLog::default()));
            let site = Self {
                pages,
                current: 0,
                partial: partial_path(&config.output),
                interrupt_at: None,
                log: Arc::clone(&log),
            };
            (site, log)
        }
    }

    fn rows_in(path: &Path) -> Option<usize> {
        std::fs::read_to_string(path)
            .ok()
            .map(|text| text.lines().count().saturating_sub(1))
    }

    fn page_index(url: &str) -> usize {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "page")
            .map(|(_, v)| v.parse().unwrap())
            .unwrap()
    }

    fn render(dates: &[NaiveDate]) -> String {
        let rows: String = dates
            .iter()
            .map(|d| {
                format!(
                    "<tr><th>{}</th><td>1,000</td><td>1,010</td><td>990</td><td>1,005</td><td>12,300</td><td>1,005</td></tr>",
                    d.format("%Y年%-m月%-d日")
                )
            })
            .collect();
        format!(
            r#"<html><body><div id="root">
<table class="StocksEtfReitPriceHistory__historyTable__13C_ HistoryTable__1aNo">
<thead><tr><th>日付</th><th>始値</th><th>高値</th><th>安値</th><th>終値</th><th>出来高</th><th>調整後終値*</th></tr></thead>
<tbody>{rows}</tbody></table></div></body></html>"#
        )
    }

    impl BrowserSession for FakeSite {
        async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
            let page = page_index(url);
            self.current = page;
            {
                let mut log = self.log.lock().unwrap();
                log.visited.push(page);
                log.partial_rows.push((page, rows_in(&self.partial)));
                log.requested_at.push(tokio::time::Instant::now());
            }
            if self.interrupt_at.as_ref().is_some_and(|(at, _)| *at == page) {
                if let Some((_, tx)) = self.interrupt_at.take() {
                    let _ = tx.send(());
                }
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn wait_for_element(&mut self, _: &str, _: Duration) -> Result<bool, BrowserError> {
            Ok(!matches!(self.pages.get(&self.current), Some(FakePage::Timeout) | None))
        }

        async fn page_source(&mut self) -> Result<String, BrowserError> {
            match self.pages.get(&self.current) {
                Some(FakePage::Rows(dates)) => Ok(render(dates)),
                Some(FakePage::Broken) => Err(BrowserError::Malformed("renderer crashed".into())),
                _ => Ok("<html><body><p>該当するデータはありません</p></body></html>".into()),
            }
        }

        async fn quit(&mut self) -> Result<(), BrowserError> {
            self.log.lock().unwrap().quit = true;
            Ok(())
        }
    }

    fn config(dir: &Path) -> CrawlConfig {
        CrawlConfig {
            ticker: "4689.T".into(),
            date_from: "19900101".into(),
            date_to: "20250926".into(),
            output: dir.join("data/history.csv"),
            max_pages: 50,
            checkpoint_every: 5,
            page_delay_ms: 0,
            base_url: "http://site.test/quote/{ticker}/history".into(),
            ..Default::default()
        }
    }

    /// Two rows per page, page 1 newest, no overlap between pages.
    fn history(pages: usize) -> HashMap<usize, FakePage> {
        let newest = NaiveDate::from_ymd_opt(2025, 9, 26).unwrap();
        (1..=pages)
            .map(|p| {
                let offset = ((p - 1) * 2) as i64;
                let dates = vec![newest - Days::days(offset), newest - Days::days(offset + 1)];
                (p, FakePage::Rows(dates))
            })
            .collect()
    }

    fn never() -> std::future::Pending<()> {
        std::future::pending()
    }

    #[tokio::test]
    async fn test_stops_on_empty_page_and_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut pages = history(3);
        pages.insert(4, FakePage::NoTable);
        let (site, log) = FakeSite::new(pages, &cfg);

        let result = crawl(site, &cfg, never()).await.unwrap();

        assert_eq!(result.state, CrawlState::StoppedEmpty);
        assert_eq!(result.pages_accepted, 3);
        assert_eq!(result.table.len(), 6);
        assert!(result.table.records.windows(2).all(|w| w[0].date > w[1].date));
        assert_eq!(result.final_path.as_deref(), Some(cfg.output.as_path()));
        assert_eq!(rows_in(&cfg.output), Some(6));
        assert_eq!(rows_in(&result.partial_path), Some(6));
        assert!(log.lock().unwrap().quit);
    }

    #[tokio::test]
    async fn test_timeout_on_first_page_yields_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let pages = HashMap::from([(1, FakePage::Timeout)]);
        let (site, log) = FakeSite::new(pages, &cfg);

        let result = crawl(site, &cfg, never()).await.unwrap();

        assert_eq!(result.state, CrawlState::StoppedTimeout);
        assert!(result.table.is_empty());
        assert_eq!(result.final_path, None);
        assert!(!cfg.output.exists());
        // recovery file still written, header only
        assert_eq!(rows_in(&result.partial_path), Some(0));
        assert!(log.lock().unwrap().quit);
    }

    #[tokio::test]
    async fn test_cycle_stops_and_discards_repeated_page() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut pages = history(2);
        let page2_top = match &pages[&2] {
            FakePage::Rows(dates) => dates[0],
            _ => unreachable!(),
        };
        let stale = NaiveDate::from_ymd_opt(2001, 1, 4).unwrap();
        pages.insert(3, FakePage::Rows(vec![page2_top, stale]));
        pages.extend(history(5).into_iter().filter(|(p, _)| *p > 3));
        let (site, log) = FakeSite::new(pages, &cfg);

        let result = crawl(site, &cfg, never()).await.unwrap();

        assert_eq!(result.state, CrawlState::StoppedCycle);
        assert_eq!(result.pages_accepted, 2);
        assert_eq!(result.table.len(), 4);
        assert!(result.table.records.iter().all(|r| r.date != stale));
        assert_eq!(log.lock().unwrap().visited, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_checkpoint_every_three_pages() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CrawlConfig {
            checkpoint_every: 3,
            ..config(dir.path())
        };
        let mut pages = history(10);
        pages.insert(11, FakePage::NoTable);
        let (site, log) = FakeSite::new(pages, &cfg);

        let result = crawl(site, &cfg, never()).await.unwrap();
        assert_eq!(result.pages_accepted, 10);

        let snapshots = log.lock().unwrap().partial_rows.clone();
        let expected: Vec<(usize, Option<usize>)> = vec![
            (1, None),
            (2, None),
            (3, None),
            (4, Some(6)),
            (5, Some(6)),
            (6, Some(6)),
            (7, Some(12)),
            (8, Some(12)),
            (9, Some(12)),
            (10, Some(18)),
            (11, Some(18)),
        ];
        assert_eq!(snapshots, expected);
        assert_eq!(rows_in(&result.partial_path), Some(20));
    }

    #[tokio::test]
    async fn test_max_pages_bound() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CrawlConfig {
            max_pages: 2,
            ..config(dir.path())
        };
        let (site, log) = FakeSite::new(history(5), &cfg);

        let result = crawl(site, &cfg, never()).await.unwrap();

        assert_eq!(result.state, CrawlState::StoppedMaxPages);
        assert_eq!(result.pages_accepted, 2);
        assert_eq!(log.lock().unwrap().visited, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_follows_each_accepted_page_only() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CrawlConfig {
            page_delay_ms: 1000,
            ..config(dir.path())
        };
        let mut pages = history(3);
        pages.insert(4, FakePage::NoTable);
        let (site, log) = FakeSite::new(pages, &cfg);

        let started = tokio::time::Instant::now();
        let result = crawl(site, &cfg, never()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result.state, CrawlState::StoppedEmpty);
        assert_eq!(result.pages_accepted, 3);

        let log = log.lock().unwrap();
        let gaps: Vec<Duration> = log
            .requested_at
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect();
        assert_eq!(gaps, vec![Duration::from_secs(1); 3]);
        // three accepted pages, no pause after the stopping page
        assert_eq!(elapsed, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_interruption_keeps_accepted_pages() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let (mut site, log) = FakeSite::new(history(10), &cfg);
        let (tx, rx) = oneshot::channel();
        site.interrupt_at = Some((5, tx));

        let shutdown = async {
            let _ = rx.await;
        };
        let result = crawl(site, &cfg, shutdown).await.unwrap();

        assert_eq!(result.state, CrawlState::Interrupted);
        assert_eq!(result.pages_accepted, 4);
        assert_eq!(result.table.len(), 8);
        assert_eq!(rows_in(&cfg.output), Some(8));
        assert_eq!(rows_in(&result.partial_path), Some(8));
        assert!(log.lock().unwrap().quit);
    }

    #[tokio::test]
    async fn test_fault_is_suppressed_and_data_saved() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut pages = history(2);
        pages.insert(3, FakePage::Broken);
        let (site, log) = FakeSite::new(pages, &cfg);

        let result = crawl(site, &cfg, never()).await.unwrap();

        assert_eq!(result.state, CrawlState::Failed);
        assert!(!result.state.is_natural_end());
        assert_eq!(result.pages_accepted, 2);
        assert_eq!(rows_in(&cfg.output), Some(4));
        assert!(log.lock().unwrap().quit);
    }

    #[tokio::test]
    async fn test_overlapping_pages_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let d = |day| NaiveDate::from_ymd_opt(2025, 9, day).unwrap();
        let pages = HashMap::from([
            (1, FakePage::Rows(vec![d(26), d(25), d(24)])),
            (2, FakePage::Rows(vec![d(24), d(23)])),
            (3, FakePage::NoTable),
        ]);
        let (site, _log) = FakeSite::new(pages, &cfg);

        let result = crawl(site, &cfg, never()).await.unwrap();

        let dates: Vec<NaiveDate> = result.table.records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(26), d(25), d(24), d(23)]);
    }

    #[test]
    fn test_new_crawler_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let (site, _log) = FakeSite::new(HashMap::new(), &cfg);
        let crawler = Crawler::from_config(site, &cfg).unwrap();
        assert_eq!(crawler.state(), CrawlState::Running);
    }

    #[test]
    fn test_accumulator_merged_when_empty_has_canonical_columns() {
        let acc = Accumulator::default();
        assert!(acc.is_empty());
        assert_eq!(acc.merged(), PriceTable::empty());
        assert_eq!(acc.last_leading_date(), None);
    }

}
