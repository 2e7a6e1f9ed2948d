//! Rate fetcher: plans provider calls, enforces the quota, retries transient
//! failures and reports dates it could not fill as gaps.

use super::quota::QuotaTracker;
use super::sources::RateProvider;
use super::store::{MergeSummary, RateStore};
use crate::config::{Config, RetryConfig};
use crate::currency::{CurrencyCode, CurrencyPair};
use crate::error::{FxError, Result};
use crate::types::{FetchWindow, RatePoint, RateSeries};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Bounded exponential backoff for transient provider errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Retry without sleeping between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Raw result of fetching a window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReport {
    pub points: Vec<RatePoint>,
    /// Dates whose provider call failed after all retries
    pub gap_dates: Vec<NaiveDate>,
    pub calls_made: u32,
}

/// What the web layer gets back from `fetch_and_merge`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchSummary {
    pub pair: String,
    pub fetched_count: usize,
    pub gap_dates: Vec<NaiveDate>,
    pub calls_made: u32,
}

impl FetchSummary {
    fn empty(pair: &CurrencyPair) -> Self {
        Self {
            pair: pair.key(),
            fetched_count: 0,
            gap_dates: Vec::new(),
            calls_made: 0,
        }
    }
}

/// Fetches rates from a [`RateProvider`] into a [`RateStore`]
pub struct RateFetcher<P: RateProvider> {
    provider: P,
    quota: Mutex<QuotaTracker>,
    retry: RetryPolicy,
    earliest_date: NaiveDate,
    today: Option<NaiveDate>,
}

impl<P: RateProvider> RateFetcher<P> {
    pub fn new(provider: P, quota: QuotaTracker, retry: RetryPolicy, earliest_date: NaiveDate) -> Self {
        Self {
            provider,
            quota: Mutex::new(quota),
            retry,
            earliest_date,
            today: None,
        }
    }

    /// Fetcher with a persisted quota counter and retry settings from `config`
    pub fn from_config(provider: P, config: &Config) -> Self {
        let quota = QuotaTracker::with_state_file(
            config.provider.monthly_quota,
            config.provider.quota_safety_margin,
            config.quota_path(),
        );
        Self::new(provider, quota, RetryPolicy::from(&config.retry), config.earliest_date)
    }

    /// Pin "today" (the last fetchable date) instead of reading the clock
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Calls made against the provider this month
    pub fn quota_used(&self) -> u32 {
        self.quota().used()
    }

    /// Calls still allowed before the safety margin
    pub fn quota_allowance(&self) -> u32 {
        self.quota().allowance()
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn quota(&self) -> MutexGuard<'_, QuotaTracker> {
        self.quota.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restrict a window to what the provider can serve
    fn servable(&self, window: &FetchWindow) -> Option<FetchWindow> {
        let clamped = window.clamp(self.earliest_date, self.today());
        if clamped.is_none() {
            log::info!(
                "Window {}..{} is outside the servable range {}..{}, nothing to fetch",
                window.start(),
                window.end(),
                self.earliest_date,
                self.today()
            );
        }
        clamped
    }

    /// Provider calls needed to fill `window`, skipping dates `cached` already has
    pub fn plan(&self, cached: &RateSeries, window: &FetchWindow) -> Vec<FetchWindow> {
        let Some(window) = self.servable(window) else {
            return Vec::new();
        };
        let missing: Vec<NaiveDate> = window.dates().filter(|d| !cached.contains_date(*d)).collect();
        FetchWindow::coalesce(&missing)
            .iter()
            .flat_map(|w| w.split(self.provider.max_span_days()))
            .collect()
    }

    /// Fetch every date of `window` from the provider, ignoring the store
    pub fn fetch(&self, pair: &CurrencyPair, window: &FetchWindow) -> Result<FetchReport> {
        let cached = RateSeries::empty(pair.clone());
        let chunks = self.plan(&cached, window);
        let mut report = FetchReport::default();
        self.run(pair, &chunks, &mut report, &mut |_, _| {})?;
        Ok(report)
    }

    /// Fetch the dates of `start..=end` missing from `store` and merge them in
    pub fn fetch_and_merge(
        &self,
        store: &RateStore,
        pair: &CurrencyPair,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchSummary> {
        self.fetch_and_merge_with_progress(store, pair, start, end, &mut |_, _| {})
    }

    /// Like [`fetch_and_merge`](Self::fetch_and_merge), reporting `(done, total)` after each call unit
    pub fn fetch_and_merge_with_progress(
        &self,
        store: &RateStore,
        pair: &CurrencyPair,
        start: NaiveDate,
        end: NaiveDate,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<FetchSummary> {
        let window = FetchWindow::new(start, end)?;
        let cached = store.load(pair);
        let chunks = self.plan(&cached, &window);
        if chunks.is_empty() {
            log::info!("Nothing to fetch for {} {}..{}", pair, start, end);
            return Ok(FetchSummary::empty(pair));
        }

        let mut report = FetchReport::default();
        let outcome = self.run(pair, &chunks, &mut report, progress);

        // Keep whatever arrived before a quota or credential failure
        let merged = if report.points.is_empty() {
            Ok(MergeSummary::default())
        } else {
            store.merge(pair, report.points)
        };
        let merged = match (outcome, merged) {
            (Ok(()), merged) => merged?,
            (Err(e), Ok(kept)) => {
                log::warn!("{}: kept {} point(s) before stopping: {}", pair, kept.inserted + kept.updated, e);
                return Err(e);
            }
            (Err(e), Err(merge_err)) => {
                log::error!("{}: failed to store partial fetch: {}", pair, merge_err);
                return Err(e);
            }
        };
        let fetched_count = merged.inserted + merged.updated;

        if !report.gap_dates.is_empty() {
            log::warn!("{}: {} date(s) could not be fetched", pair, report.gap_dates.len());
        }
        log::info!(
            "Fetched {} point(s) for {} in {} call(s)",
            fetched_count,
            pair,
            report.calls_made
        );
        Ok(FetchSummary {
            pair: pair.key(),
            fetched_count,
            gap_dates: report.gap_dates,
            calls_made: report.calls_made,
        })
    }

    /// Extend the cached series up to today
    pub fn update_to_latest(&self, store: &RateStore, pair: &CurrencyPair) -> Result<FetchSummary> {
        let start = match store.date_range(pair) {
            Some((_, latest)) => latest + ChronoDuration::days(1),
            None => self.earliest_date,
        };
        let today = self.today();
        if start > today {
            log::info!("{} is up to date", pair);
            return Ok(FetchSummary::empty(pair));
        }
        self.fetch_and_merge(store, pair, start, today)
    }

    /// Currencies the provider quotes against `base`; counts as one call
    pub fn available_currencies(&self, base: &CurrencyCode) -> Result<Vec<CurrencyCode>> {
        self.quota().check(1)?;
        let result = self.provider.available_currencies(base);
        let mut quota = self.quota();
        quota.record_call(None);
        if matches!(result, Err(FxError::QuotaExceeded { .. })) {
            quota.exhaust();
            return Err(quota.exceeded());
        }
        result
    }

    fn run(
        &self,
        pair: &CurrencyPair,
        chunks: &[FetchWindow],
        report: &mut FetchReport,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        {
            let mut quota = self.quota();
            quota.check(1)?;
            let allowance = quota.allowance() as usize;
            if chunks.len() > allowance {
                log::warn!(
                    "{}: {} call(s) planned but only {} allowed, fetching oldest first",
                    pair,
                    chunks.len(),
                    allowance
                );
            }
        }

        for (done, chunk) in chunks.iter().enumerate() {
            match self.call_with_retry(pair, chunk, &mut report.calls_made) {
                Ok(points) => {
                    if points.len() < chunk.num_days() as usize && !chunk.is_single_day() {
                        log::debug!(
                            "{} of {} days published for {} {}..{}",
                            points.len(),
                            chunk.num_days(),
                            pair,
                            chunk.start(),
                            chunk.end()
                        );
                    }
                    report.points.extend(points);
                }
                Err(e @ (FxError::QuotaExceeded { .. } | FxError::Unauthorized(_))) => return Err(e),
                Err(e) => {
                    log::warn!(
                        "Giving up on {} {}..{}: {}",
                        pair,
                        chunk.start(),
                        chunk.end(),
                        e
                    );
                    report.gap_dates.extend(chunk.dates());
                }
            }
            progress(done + 1, chunks.len());
        }
        Ok(())
    }

    fn call_with_retry(&self, pair: &CurrencyPair, chunk: &FetchWindow, calls: &mut u32) -> Result<Vec<RatePoint>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.quota().check(1)?;
            let result = self.provider.fetch_window(pair, chunk);
            *calls += 1;

            match result {
                Ok(quote) => {
                    self.quota().record_call(quote.remaining_quota);
                    return Ok(quote.points);
                }
                Err(FxError::QuotaExceeded { .. }) => {
                    let mut quota = self.quota();
                    quota.record_call(None);
                    quota.exhaust();
                    return Err(quota.exceeded());
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    self.quota().record_call(None);
                    let delay = self.retry.delay_for(attempt);
                    log::debug!(
                        "{} {}..{} attempt {} failed ({}), retrying in {:?}",
                        pair,
                        chunk.start(),
                        chunk.end(),
                        attempt,
                        e,
                        delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => {
                    self.quota().record_call(None);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sources::ProviderQuote;
    use chrono::Datelike;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn usd_eur() -> CurrencyPair {
        CurrencyPair::from_codes("USD", "EUR").unwrap()
    }

    /// Answers every date with its day of month and fails the first `flaky` calls
    struct FlakyProvider {
        span: u32,
        flaky: u32,
        calls: AtomicU32,
    }

    impl RateProvider for FlakyProvider {
        fn max_span_days(&self) -> u32 {
            self.span
        }

        fn fetch_window(&self, _pair: &CurrencyPair, window: &FetchWindow) -> Result<ProviderQuote> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.flaky {
                return Err(FxError::transient("503"));
            }
            Ok(ProviderQuote::new(
                window
                    .dates()
                    .map(|date| RatePoint::new(date, f64::from(date.day())))
                    .collect(),
            ))
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn fetcher(span: u32, flaky: u32, budget: u32) -> RateFetcher<FlakyProvider> {
        RateFetcher::new(
            FlakyProvider {
                span,
                flaky,
                calls: AtomicU32::new(0),
            },
            QuotaTracker::new(budget, 0),
            RetryPolicy::immediate(3),
            d(1),
        )
        .with_today(d(31))
    }

    #[test]
    fn test_delay_for_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(40), Duration::from_millis(300));
    }

    #[test]
    fn test_plan_chunks_missing_dates() {
        let f = fetcher(3, 0, 100);
        let cached = RateSeries::from_points(
            usd_eur(),
            vec![RatePoint::new(d(3), 1.0), RatePoint::new(d(4), 1.0)],
        );
        let plan = f.plan(&cached, &FetchWindow::new(d(1), d(9)).unwrap());
        assert_eq!(
            plan,
            vec![
                FetchWindow::new(d(1), d(2)).unwrap(),
                FetchWindow::new(d(5), d(7)).unwrap(),
                FetchWindow::new(d(8), d(9)).unwrap(),
            ]
        );
    }

    #[test]
    fn test_plan_outside_servable_range() {
        let f = fetcher(1, 0, 100);
        let cached = RateSeries::empty(usd_eur());
        let before = FetchWindow::new(
            NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
        .unwrap();
        assert!(f.plan(&cached, &before).is_empty());

        let future = FetchWindow::new(
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
        )
        .unwrap();
        assert!(f.plan(&cached, &future).is_empty());
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let f = fetcher(1, 2, 100);
        let report = f.fetch(&usd_eur(), &FetchWindow::single(d(5))).unwrap();
        assert_eq!(report.points.len(), 1);
        assert!(report.gap_dates.is_empty());
        assert_eq!(report.calls_made, 3);
        assert_eq!(f.quota_used(), 3);
    }

    #[test]
    fn test_exhausted_retries_become_gap() {
        let f = fetcher(1, 3, 100);
        let report = f.fetch(&usd_eur(), &FetchWindow::new(d(5), d(6)).unwrap()).unwrap();
        assert_eq!(report.gap_dates, vec![d(5)]);
        assert_eq!(report.points, vec![RatePoint::new(d(6), 6.0)]);
    }

    #[test]
    fn test_quota_limits_fetch_to_allowance() {
        let f = fetcher(1, 0, 3);
        let dir = TempDir::new().unwrap();
        let store = RateStore::open(dir.path()).unwrap();
        let err = f.fetch_and_merge(&store, &usd_eur(), d(1), d(5)).unwrap_err();
        assert!(matches!(err, FxError::QuotaExceeded { .. }));
        assert_eq!(f.quota_used(), 3);
        assert_eq!(store.date_range(&usd_eur()), Some((d(1), d(3))));

        // Nothing left: refused before any call
        let err = f.fetch_and_merge(&store, &usd_eur(), d(4), d(5)).unwrap_err();
        assert!(matches!(err, FxError::QuotaExceeded { .. }));
        assert_eq!(f.quota_used(), 3);
    }

    #[test]
    fn test_update_to_latest_backfills_within_budget() {
        let f = RateFetcher::new(
            FlakyProvider {
                span: 1,
                flaky: 0,
                calls: AtomicU32::new(0),
            },
            QuotaTracker::new(60, 10),
            RetryPolicy::immediate(3),
            NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
        )
        .with_today(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        let dir = TempDir::new().unwrap();
        let store = RateStore::open(dir.path()).unwrap();

        assert!(f.update_to_latest(&store, &usd_eur()).is_err());
        assert_eq!(f.quota_used(), 50);
        assert_eq!(
            store.date_range(&usd_eur()),
            Some((
                NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2010, 2, 19).unwrap()
            ))
        );
    }

    #[test]
    fn test_range_provider_uses_chunks() {
        let f = fetcher(7, 0, 100);
        let dir = TempDir::new().unwrap();
        let store = RateStore::open(dir.path()).unwrap();
        let mut ticks = Vec::new();
        let summary = f
            .fetch_and_merge_with_progress(&store, &usd_eur(), d(1), d(20), &mut |done, total| {
                ticks.push((done, total))
            })
            .unwrap();
        assert_eq!(summary.fetched_count, 20);
        assert_eq!(summary.calls_made, 3);
        assert_eq!(ticks, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_update_to_latest() {
        let f = fetcher(31, 0, 100);
        let dir = TempDir::new().unwrap();
        let store = RateStore::open(dir.path()).unwrap();
        store.merge(&usd_eur(), vec![RatePoint::new(d(28), 1.28)]).unwrap();

        let summary = f.update_to_latest(&store, &usd_eur()).unwrap();
        assert_eq!(summary.fetched_count, 3);
        assert_eq!(store.date_range(&usd_eur()), Some((d(28), d(31))));

        let again = f.update_to_latest(&store, &usd_eur()).unwrap();
        assert_eq!(again.calls_made, 0);
    }
}
