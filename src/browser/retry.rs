//! Navigation retry with exponential backoff.
//!
//! Page loads against a remote site fail transiently (driver hiccups, slow
//! DNS, dropped connections). [`RetrySession`] wraps any
//! [`BrowserSession`] and retries [`navigate`](BrowserSession::navigate)
//! before the failure reaches the crawl loop, where it would end the crawl.
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
//! ```

use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

use super::BrowserSession;
use crate::error::BrowserError;

/// Decorator adding retries to another session's navigations.
pub struct RetrySession<S> {
    inner: S,
    /// Extra attempts after the first failure.
    max_retries: usize,
    /// Delay before the first retry; doubles each attempt.
    base_delay: Duration,
    max_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    jitter: Duration,
}

impl<S> RetrySession<S>
where
    S: BrowserSession,
{
    /// Wrap `inner`, retrying up to `max_retries` times.
    ///
    /// ```ignore
    /// let session = WebDriverSession::start(&options).await?;
    /// let session = RetrySession::new(session, 2, Duration::from_secs(1));
    /// ```
    pub fn new(inner: S, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1 << shift)
            .min(self.max_delay);
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        delay + Duration::from_millis(rng().random_range(0..=jitter_ms))
    }
}

impl<S> fmt::Debug for RetrySession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySession")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<S> BrowserSession for RetrySession<S>
where
    S: BrowserSession,
{
    #[instrument(level = "debug", skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.navigate(url).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "navigate exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "navigate failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn wait_for_element(
        &mut self,
        css: &str,
        timeout: Duration,
    ) -> Result<bool, BrowserError> {
        self.inner.wait_for_element(css, timeout).await
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        self.inner.page_source().await
    }

    async fn quit(&mut self) -> Result<(), BrowserError> {
        self.inner.quit().await
    }
}
