//! End-to-end tests for the fetch -> cache -> predict flow
//!
//! A scripted provider stands in for the HTTP source so every call can be
//! counted and failures injected per date.

use approx::assert_relative_eq;
use chrono::NaiveDate;
use rusty_fx::config::Config;
use rusty_fx::currency::{CurrencyCode, CurrencyPair};
use rusty_fx::data::{ProviderQuote, RateProvider, RateStore};
use rusty_fx::error::{ErrorResponse, FxError, Result};
use rusty_fx::types::{FetchWindow, RatePoint};
use rusty_fx::service::FALLBACK_CURRENCIES;
use rusty_fx::ForecastService;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tempfile::TempDir;

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
}

fn usd_eur() -> CurrencyPair {
    "USD_EUR".parse().unwrap()
}

enum Failure {
    Transient,
    Unauthorized,
    Quota,
}

/// Provider backed by a fixed table of rates, recording every requested window
struct ScriptedProvider {
    span: u32,
    rates: HashMap<NaiveDate, f64>,
    failures: HashMap<NaiveDate, Failure>,
    currencies: Option<Vec<&'static str>>,
    calls: Mutex<Vec<FetchWindow>>,
}

impl ScriptedProvider {
    fn daily(rates: &[(NaiveDate, f64)]) -> Self {
        Self {
            span: 1,
            rates: rates.iter().copied().collect(),
            failures: HashMap::new(),
            currencies: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn listing(mut self, codes: &[&'static str]) -> Self {
        self.currencies = Some(codes.to_vec());
        self
    }

    fn failing_on(mut self, date: NaiveDate, failure: Failure) -> Self {
        self.failures.insert(date, failure);
        self
    }

    fn requested_dates(&self) -> Vec<NaiveDate> {
        let dates: HashSet<NaiveDate> = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .flat_map(|w| w.dates())
            .collect();
        let mut dates: Vec<_> = dates.into_iter().collect();
        dates.sort();
        dates
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl RateProvider for ScriptedProvider {
    fn max_span_days(&self) -> u32 {
        self.span
    }

    fn fetch_window(&self, _pair: &CurrencyPair, window: &FetchWindow) -> Result<ProviderQuote> {
        self.calls.lock().unwrap().push(*window);
        for date in window.dates() {
            match self.failures.get(&date) {
                Some(Failure::Transient) => return Err(FxError::transient("503 Service Unavailable")),
                Some(Failure::Unauthorized) => return Err(FxError::Unauthorized("invalid-key".into())),
                Some(Failure::Quota) => return Err(FxError::QuotaExceeded { used: 0, limit: 0 }),
                None => {}
            }
        }
        Ok(ProviderQuote::new(
            window
                .dates()
                .filter_map(|date| self.rates.get(&date).map(|r| RatePoint::new(date, *r)))
                .collect(),
        ))
    }

    fn available_currencies(&self, _base: &CurrencyCode) -> Result<Vec<CurrencyCode>> {
        match &self.currencies {
            Some(codes) => codes.iter().map(|c| CurrencyCode::new(c)).collect(),
            None => Err(FxError::transient("503 Service Unavailable")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.earliest_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    config
}

fn january(days: std::ops::RangeInclusive<u32>) -> Vec<(NaiveDate, f64)> {
    days.map(|day| (d(day), 0.89 + f64::from(day) / 100.0)).collect()
}

#[test]
fn test_fetch_only_requests_missing_dates() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let store = RateStore::open(config.rates_dir()).unwrap();
    store
        .merge(&usd_eur(), january(1..=3).into_iter().map(|(d, r)| RatePoint::new(d, r)))
        .unwrap();

    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&january(1..=5))).unwrap();
    let summary = service.fetch_and_merge(&usd_eur(), d(1), d(5)).unwrap();

    assert_eq!(service.fetcher().provider().requested_dates(), vec![d(4), d(5)]);
    assert_eq!(summary.fetched_count, 2);
    assert_eq!(summary.calls_made, 2);
    assert!(summary.gap_dates.is_empty());
    assert_eq!(service.date_range(&usd_eur()), Some((d(1), d(5))));
}

#[test]
fn test_failed_date_is_reported_as_gap() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let provider = ScriptedProvider::daily(&january(1..=5)).failing_on(d(4), Failure::Transient);

    let service = ForecastService::with_provider(&config, provider).unwrap();
    let summary = service.fetch_and_merge(&usd_eur(), d(1), d(5)).unwrap();

    assert_eq!(summary.fetched_count, 4);
    assert_eq!(summary.gap_dates, vec![d(4)]);
    // 01, 02, 03, 05 once each plus three attempts at 04
    assert_eq!(summary.calls_made, 7);

    let series = service.store().load(&usd_eur());
    assert_eq!(series.len(), 4);
    assert!(!series.contains_date(d(4)));
}

#[test]
fn test_refetch_of_cached_range_makes_no_calls() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&january(1..=5))).unwrap();

    service.fetch_and_merge(&usd_eur(), d(1), d(5)).unwrap();
    let before = service.fetcher().provider().call_count();
    let again = service.fetch_and_merge(&usd_eur(), d(2), d(4)).unwrap();

    assert_eq!(again.calls_made, 0);
    assert_eq!(service.fetcher().provider().call_count(), before);
}

#[test]
fn test_unauthorized_aborts_but_keeps_fetched_points() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let provider = ScriptedProvider::daily(&january(1..=5)).failing_on(d(3), Failure::Unauthorized);

    let service = ForecastService::with_provider(&config, provider).unwrap();
    let err = service.fetch_and_merge(&usd_eur(), d(1), d(5)).unwrap_err();

    assert!(matches!(err, FxError::Unauthorized(_)));
    assert_eq!(service.fetcher().provider().requested_dates(), vec![d(1), d(2), d(3)]);
    assert_eq!(service.date_range(&usd_eur()), Some((d(1), d(2))));
}

#[test]
fn test_provider_quota_signal_stops_fetching() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let provider = ScriptedProvider::daily(&january(1..=5)).failing_on(d(2), Failure::Quota);

    let service = ForecastService::with_provider(&config, provider).unwrap();
    let err = service.fetch_and_merge(&usd_eur(), d(1), d(5)).unwrap_err();

    assert!(matches!(err, FxError::QuotaExceeded { .. }));
    assert_eq!(service.fetcher().quota_allowance(), 0);
    assert_eq!(service.store().load(&usd_eur()).len(), 1);

    // Later requests are refused without touching the provider
    let calls = service.fetcher().provider().call_count();
    assert!(service.fetch_and_merge(&usd_eur(), d(4), d(5)).is_err());
    assert_eq!(service.fetcher().provider().call_count(), calls);
}

#[test]
fn test_quota_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    {
        let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&january(1..=5))).unwrap();
        service.fetch_and_merge(&usd_eur(), d(1), d(5)).unwrap();
        assert_eq!(service.fetcher().quota_used(), 5);
    }
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&[])).unwrap();
    assert!(service.fetcher().quota_used() >= 5);
}

#[test]
fn test_unknown_pair_prediction() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&[])).unwrap();

    let pair: CurrencyPair = "XYZ_ABC".parse().unwrap();
    let err = service.predict(&pair, d(11), 1).unwrap_err();
    assert!(matches!(err, FxError::UnknownPair(ref p) if p == "XYZ_ABC"));

    let response = ErrorResponse::from(&err);
    assert_eq!(response.code, "unknown_pair");
    assert!(response.recoverable);
    assert!(service.recent_predictions(50).unwrap().is_empty());
}

#[test]
fn test_predict_after_fetch() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&january(1..=10))).unwrap();

    service.fetch_and_merge(&usd_eur(), d(1), d(10)).unwrap();
    let response = service.predict(&usd_eur(), d(11), 3).unwrap();

    assert_eq!(response.pair, "USD_EUR");
    assert_eq!(response.predictions.len(), 3);
    for (i, (date, rate)) in response.predictions.iter().enumerate() {
        assert_eq!(*date, d(11 + i as u32));
        assert_relative_eq!(*rate, 0.945, epsilon = 1e-9);
    }
    assert!(response.rmse.is_none());

    let logged = service.recent_predictions(50).unwrap();
    assert_eq!(logged.len(), 3);
    assert!(logged.iter().all(|r| r.request_id == response.request_id));
    assert!(logged.iter().all(|r| r.actual_rate.is_none()));
}

#[test]
fn test_backtest_reports_accuracy() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&january(1..=20))).unwrap();

    service.fetch_and_merge(&usd_eur(), d(1), d(20)).unwrap();
    let response = service.predict(&usd_eur(), d(15), 5).unwrap();

    // Linear +0.01/day: a 10-day trailing mean lags the actual by 0.055
    let rmse = response.rmse.unwrap();
    let mae = response.mae.unwrap();
    assert_relative_eq!(rmse, 0.055, epsilon = 1e-9);
    assert_relative_eq!(mae, 0.055, epsilon = 1e-9);
    assert!(response.forecast.points.iter().all(|p| p.actual.is_some()));

    let logged = service.recent_predictions(2).unwrap();
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[1].target_date, d(19));
    assert!(logged[1].error.is_some());
}

#[test]
fn test_insufficient_history() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&january(1..=4))).unwrap();

    service.fetch_and_merge(&usd_eur(), d(1), d(4)).unwrap();
    let err = service.predict(&usd_eur(), d(5), 1).unwrap_err();
    assert!(matches!(
        err,
        FxError::InsufficientData { required: 10, available: 4, .. }
    ));
    assert!(matches!(service.train(&usd_eur()), Err(FxError::InsufficientData { .. })));
}

#[test]
fn test_pairs_chart_and_purge() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&january(1..=3))).unwrap();
    let usd_gbp: CurrencyPair = "USD/GBP".parse().unwrap();

    service.fetch_and_merge(&usd_eur(), d(1), d(3)).unwrap();
    service.fetch_and_merge(&usd_gbp, d(1), d(2)).unwrap();
    assert_eq!(service.pairs().unwrap(), vec![usd_eur(), usd_gbp.clone()]);

    let chart = service.chart_data(&usd_gbp).unwrap();
    assert_eq!(chart.dates, vec![d(1), d(2)]);
    assert_eq!(chart.rates.len(), 2);

    assert!(service.purge(&usd_gbp).unwrap());
    assert!(!service.purge(&usd_gbp).unwrap());
    assert!(matches!(service.chart_data(&usd_gbp), Err(FxError::UnknownPair(_))));
    assert_eq!(service.purge_all().unwrap(), 1);
    assert!(service.pairs().unwrap().is_empty());
}

#[test]
fn test_invalid_range_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&[])).unwrap();

    let err = service.fetch_and_merge(&usd_eur(), d(5), d(1)).unwrap_err();
    assert!(matches!(err, FxError::InvalidRequest(_)));
}

#[test]
fn test_invalid_rates_are_not_counted_as_fetched() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let provider = ScriptedProvider::daily(&[(d(1), 0.91), (d(2), -1.0), (d(3), f64::NAN)]);

    let service = ForecastService::with_provider(&config, provider).unwrap();
    let summary = service.fetch_and_merge(&usd_eur(), d(1), d(3)).unwrap();

    assert_eq!(summary.calls_made, 3);
    assert_eq!(summary.fetched_count, 1);
    assert_eq!(service.store().load(&usd_eur()).len(), 1);
}

#[test]
fn test_fetch_error_wins_over_merge_failure() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let provider = ScriptedProvider::daily(&january(1..=5)).failing_on(d(3), Failure::Unauthorized);
    let service = ForecastService::with_provider(&config, provider).unwrap();

    // A directory where the pair file belongs makes the merge fail
    std::fs::create_dir_all(service.store().path_for(&usd_eur())).unwrap();

    let err = service.fetch_and_merge(&usd_eur(), d(1), d(5)).unwrap_err();
    assert!(matches!(err, FxError::Unauthorized(_)));
    assert_eq!(service.fetcher().provider().requested_dates(), vec![d(1), d(2), d(3)]);
}

#[test]
fn test_horizon_is_capped_by_config() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.max_horizon_days = 5;
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&january(1..=10))).unwrap();
    service.fetch_and_merge(&usd_eur(), d(1), d(10)).unwrap();

    assert_eq!(service.predict(&usd_eur(), d(11), 5).unwrap().predictions.len(), 5);
    let err = service.predict(&usd_eur(), d(11), u32::MAX).unwrap_err();
    assert!(matches!(err, FxError::InvalidRequest(_)));
    assert_eq!(service.recent_predictions(50).unwrap().len(), 5);
}

#[test]
fn test_bare_quote_resolves_against_base_currency() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&[])).unwrap();
    assert_eq!(service.resolve_pair("eur").unwrap(), usd_eur());
    assert_eq!(service.resolve_pair("GBP_JPY").unwrap().key(), "GBP_JPY");

    config.base_currency = CurrencyCode::new("EUR").unwrap();
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&[])).unwrap();
    assert_eq!(service.resolve_pair("CHF").unwrap().key(), "EUR_CHF");
    assert!(service.resolve_pair("EUR").is_err());
}

#[test]
fn test_currencies_from_provider() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let provider = ScriptedProvider::daily(&[]).listing(&["EUR", "GBP", "JPY"]);
    let service = ForecastService::with_provider(&config, provider).unwrap();

    let codes: Vec<String> = service.currencies().into_iter().map(String::from).collect();
    assert_eq!(codes, vec!["EUR", "GBP", "JPY"]);
    assert_eq!(service.fetcher().quota_used(), 1);
}

#[test]
fn test_currencies_fall_back_when_provider_fails() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = ForecastService::with_provider(&config, ScriptedProvider::daily(&[])).unwrap();

    let codes: Vec<String> = service.currencies().into_iter().map(String::from).collect();
    assert_eq!(codes, FALLBACK_CURRENCIES.to_vec());
}
