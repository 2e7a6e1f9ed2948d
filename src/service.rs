//! Entry points for the web / CLI layer
//!
//! [`ForecastService`] wires the store, fetcher, predictor and prediction log
//! together. Every call re-reads the store; nothing is cached between
//! requests.

use crate::config::Config;
use crate::currency::{CurrencyCode, CurrencyPair};
use crate::data::{FetchSummary, HttpRateProvider, RateFetcher, RateProvider, RateStore};
use crate::error::{FxError, Result};
use crate::predictor::{Forecast, Predictor, TrainSummary};
use crate::prediction_log::{PredictionLogger, PredictionRecord};
use crate::types::{Rate, RateSeries};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Codes offered when the provider cannot list its own
pub const FALLBACK_CURRENCIES: [&str; 10] = [
    "USD", "EUR", "GBP", "JPY", "AUD", "CAD", "CHF", "CNY", "INR", "KRW",
];

/// Prediction result handed to the web layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResponse {
    pub request_id: Uuid,
    pub pair: String,
    pub predictions: Vec<(NaiveDate, Rate)>,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    pub forecast: Forecast,
}

/// Chart-ready series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub pair: String,
    pub dates: Vec<NaiveDate>,
    pub rates: Vec<Rate>,
}

/// Fetch, cache and forecast façade
pub struct ForecastService<P: RateProvider> {
    store: RateStore,
    fetcher: RateFetcher<P>,
    predictor: Predictor,
    log: PredictionLogger,
    base_currency: CurrencyCode,
}

impl ForecastService<HttpRateProvider> {
    /// Build the service against the configured HTTP provider
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = HttpRateProvider::new(&config.provider)?;
        Self::with_provider(config, provider)
    }
}

impl<P: RateProvider> ForecastService<P> {
    /// Build the service with an explicit provider
    pub fn with_provider(config: &Config, provider: P) -> Result<Self> {
        config.ensure_dirs()?;
        let store = RateStore::open(config.rates_dir())?;
        let fetcher = RateFetcher::from_config(provider, config);
        Ok(Self::from_parts(
            store,
            fetcher,
            Predictor::new(config.window_size).with_max_horizon(config.max_horizon_days),
            PredictionLogger::new(config.prediction_log_path()),
            config.base_currency.clone(),
        ))
    }

    pub fn from_parts(
        store: RateStore,
        fetcher: RateFetcher<P>,
        predictor: Predictor,
        log: PredictionLogger,
        base_currency: CurrencyCode,
    ) -> Self {
        Self {
            store,
            fetcher,
            predictor,
            log,
            base_currency,
        }
    }

    pub fn base_currency(&self) -> &CurrencyCode {
        &self.base_currency
    }

    /// Parse `USD_EUR`, or a bare quote code against the base currency
    pub fn resolve_pair(&self, raw: &str) -> Result<CurrencyPair> {
        CurrencyPair::parse_with_base(raw, &self.base_currency)
    }

    /// Currencies quoted against the base currency
    ///
    /// Falls back to a fixed list of majors when the provider call fails.
    pub fn currencies(&self) -> Vec<CurrencyCode> {
        match self.fetcher.available_currencies(&self.base_currency) {
            Ok(codes) if !codes.is_empty() => codes,
            Ok(_) => {
                log::warn!("Provider listed no currencies, using fallback list");
                fallback_currencies()
            }
            Err(e) => {
                log::warn!("Could not list currencies ({}), using fallback list", e);
                fallback_currencies()
            }
        }
    }

    pub fn store(&self) -> &RateStore {
        &self.store
    }

    pub fn fetcher(&self) -> &RateFetcher<P> {
        &self.fetcher
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    /// Fill `start..=end` for `pair`, fetching only dates not already cached
    pub fn fetch_and_merge(&self, pair: &CurrencyPair, start: NaiveDate, end: NaiveDate) -> Result<FetchSummary> {
        self.fetcher.fetch_and_merge(&self.store, pair, start, end)
    }

    /// [`fetch_and_merge`](Self::fetch_and_merge) with a `(done, total)` progress callback
    pub fn fetch_and_merge_with_progress(
        &self,
        pair: &CurrencyPair,
        start: NaiveDate,
        end: NaiveDate,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<FetchSummary> {
        self.fetcher
            .fetch_and_merge_with_progress(&self.store, pair, start, end, progress)
    }

    /// Fetch everything after the latest cached date up to today
    pub fn update_to_latest(&self, pair: &CurrencyPair) -> Result<FetchSummary> {
        self.fetcher.update_to_latest(&self.store, pair)
    }

    /// Validate that `pair` has enough history to predict
    pub fn train(&self, pair: &CurrencyPair) -> Result<TrainSummary> {
        self.predictor.train(&self.cached_series(pair)?)
    }

    /// Predict `horizon_days` days from `target_date` and log the result
    pub fn predict(&self, pair: &CurrencyPair, target_date: NaiveDate, horizon_days: u32) -> Result<PredictionResponse> {
        let series = self.cached_series(pair)?;
        let forecast = self.predictor.predict(&series, target_date, horizon_days)?;

        let request_id = Uuid::new_v4();
        self.log
            .record(&PredictionRecord::from_forecast(&forecast, request_id, Utc::now()));

        log::info!(
            "Predicted {} for {} day(s) from {} (rmse: {:?})",
            pair,
            horizon_days,
            target_date,
            forecast.rmse()
        );
        Ok(PredictionResponse {
            request_id,
            pair: pair.key(),
            predictions: forecast.predictions(),
            rmse: forecast.rmse(),
            mae: forecast.mae(),
            forecast,
        })
    }

    /// Pairs with cached data
    pub fn pairs(&self) -> Result<Vec<CurrencyPair>> {
        self.store.pairs()
    }

    pub fn date_range(&self, pair: &CurrencyPair) -> Option<(NaiveDate, NaiveDate)> {
        self.store.date_range(pair)
    }

    /// Full cached series for charting
    pub fn chart_data(&self, pair: &CurrencyPair) -> Result<ChartData> {
        let series = self.cached_series(pair)?;
        let (dates, rates) = series.columns();
        Ok(ChartData {
            pair: pair.key(),
            dates,
            rates,
        })
    }

    /// Most recent prediction log entries, oldest first
    pub fn recent_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>> {
        self.log.recent(limit)
    }

    /// Drop the cached series for `pair`
    pub fn purge(&self, pair: &CurrencyPair) -> Result<bool> {
        self.store.remove(pair)
    }

    /// Drop every cached series
    pub fn purge_all(&self) -> Result<usize> {
        self.store.clear()
    }

    fn cached_series(&self, pair: &CurrencyPair) -> Result<RateSeries> {
        let series = self.store.load(pair);
        if series.is_empty() {
            return Err(FxError::UnknownPair(pair.key()));
        }
        Ok(series)
    }
}

fn fallback_currencies() -> Vec<CurrencyCode> {
    FALLBACK_CURRENCIES
        .iter()
        .filter_map(|code| CurrencyCode::new(code).ok())
        .collect()
}
