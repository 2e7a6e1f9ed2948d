//! External rate providers
//!
//! A provider answers one request for a pair over a [`FetchWindow`] and hands
//! back points already normalized to `(date, rate)` for the requested quote
//! currency against the requested base. Retry, quota and gap handling live in
//! the fetcher, not here.

pub mod http;

pub use http::HttpRateProvider;

use crate::currency::{CurrencyCode, CurrencyPair};
use crate::error::{FxError, Result};
use crate::types::{FetchWindow, RatePoint};

/// Normalized answer to one provider call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderQuote {
    pub points: Vec<RatePoint>,
    /// Calls left this period, when the provider reports it
    pub remaining_quota: Option<u32>,
}

impl ProviderQuote {
    pub fn new(points: Vec<RatePoint>) -> Self {
        Self {
            points,
            remaining_quota: None,
        }
    }
}

/// Trait for external rate-quote providers
pub trait RateProvider: Send + Sync {
    /// Largest window one call may cover (1 for single-date endpoints)
    fn max_span_days(&self) -> u32;

    /// Fetch rates for `pair` over `window` in a single call.
    ///
    /// Transient failures are reported as retryable [`FxError::Provider`]
    /// errors; budget exhaustion as [`FxError::QuotaExceeded`]; bad
    /// credentials as [`FxError::Unauthorized`].
    ///
    /// [`FxError::Provider`]: crate::error::FxError::Provider
    /// [`FxError::QuotaExceeded`]: crate::error::FxError::QuotaExceeded
    /// [`FxError::Unauthorized`]: crate::error::FxError::Unauthorized
    fn fetch_window(&self, pair: &CurrencyPair, window: &FetchWindow) -> Result<ProviderQuote>;

    /// Currency codes the provider quotes against `base`, sorted
    fn available_currencies(&self, base: &CurrencyCode) -> Result<Vec<CurrencyCode>> {
        Err(FxError::rejected(format!(
            "{} cannot list currencies for {}",
            self.name(),
            base
        )))
    }

    /// Get the source name
    fn name(&self) -> &str;
}

impl<P: RateProvider + ?Sized> RateProvider for Box<P> {
    fn max_span_days(&self) -> u32 {
        (**self).max_span_days()
    }

    fn fetch_window(&self, pair: &CurrencyPair, window: &FetchWindow) -> Result<ProviderQuote> {
        (**self).fetch_window(pair, window)
    }

    fn available_currencies(&self, base: &CurrencyCode) -> Result<Vec<CurrencyCode>> {
        (**self).available_currencies(base)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
