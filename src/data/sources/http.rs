//! HTTP rate provider
//!
//! Speaks two URL conventions:
//! - `path`: exchangerate-api v6 history endpoint, one date per call
//! - `query`: `/<date>?base=..&symbols=..` for single dates and
//!   `/timeseries?start_date=..&end_date=..` for ranges
//!
//! Response bodies are normalized from either a flat `{"EUR": 0.95}` rate
//! table or a date-keyed `{"2025-01-01": {"EUR": 0.95}}` table.

use super::{ProviderQuote, RateProvider};
use crate::config::{EndpointStyle, ProviderConfig};
use crate::currency::{CurrencyCode, CurrencyPair};
use crate::error::{FxError, Result};
use crate::types::{FetchWindow, Rate, RatePoint};
use chrono::{Datelike, NaiveDate};
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

const REMAINING_HEADERS: [&str; 3] = [
    "x-ratelimit-remaining",
    "x-ratelimit-requests-remaining",
    "ratelimit-remaining",
];

/// Rate provider reached over HTTP with a blocking client
pub struct HttpRateProvider {
    base_url: String,
    api_key: String,
    style: EndpointStyle,
    max_span_days: u32,
    client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RatesBody {
    ByDate(BTreeMap<NaiveDate, HashMap<String, Rate>>),
    Flat(HashMap<String, Rate>),
}

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(rename = "error-type", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default, alias = "base_code")]
    base: Option<String>,
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    month: Option<u32>,
    #[serde(default)]
    day: Option<u32>,
    #[serde(default, alias = "conversion_rates")]
    rates: Option<RatesBody>,
}

impl HttpRateProvider {
    /// Create a provider from configuration
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("rusty-fx/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FxError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        // The path endpoint only answers single dates
        let max_span_days = match config.endpoint_style {
            EndpointStyle::Path => 1,
            EndpointStyle::Query => config.max_span_days.max(1),
        };

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            style: config.endpoint_style,
            max_span_days,
            client,
        })
    }

    /// URL and query parameters for one call
    fn endpoint(&self, pair: &CurrencyPair, window: &FetchWindow) -> (String, Vec<(&'static str, String)>) {
        match self.style {
            EndpointStyle::Path => {
                let date = window.start();
                let url = format!(
                    "{}/{}/history/{}/{}/{}/{}",
                    self.base_url,
                    self.api_key,
                    pair.base(),
                    date.year(),
                    date.month(),
                    date.day()
                );
                (url, Vec::new())
            }
            EndpointStyle::Query => {
                let mut params = vec![
                    ("base", pair.base().to_string()),
                    ("symbols", pair.quote().to_string()),
                ];
                if !self.api_key.is_empty() {
                    params.push(("access_key", self.api_key.clone()));
                }
                if window.is_single_day() {
                    (format!("{}/{}", self.base_url, window.start()), params)
                } else {
                    params.push(("start_date", window.start().to_string()));
                    params.push(("end_date", window.end().to_string()));
                    (format!("{}/timeseries", self.base_url), params)
                }
            }
        }
    }

    /// URL and query parameters for the latest-rates listing
    fn latest_endpoint(&self, base: &CurrencyCode) -> (String, Vec<(&'static str, String)>) {
        match self.style {
            EndpointStyle::Path => (
                format!("{}/{}/latest/{}", self.base_url, self.api_key, base),
                Vec::new(),
            ),
            EndpointStyle::Query => {
                let mut params = vec![("base", base.to_string())];
                if !self.api_key.is_empty() {
                    params.push(("access_key", self.api_key.clone()));
                }
                (format!("{}/latest", self.base_url), params)
            }
        }
    }

    fn get(&self, url: &str, params: &[(&'static str, String)]) -> Result<(Option<u32>, String)> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .map_err(|e| {
                if e.is_builder() {
                    FxError::rejected(format!("Invalid request: {}", e))
                } else {
                    FxError::transient(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        let remaining_quota = remaining_from_headers(response.headers());
        check_status(status)?;

        let body = response
            .text()
            .map_err(|e| FxError::transient(format!("Failed to read response: {}", e)))?;
        Ok((remaining_quota, body))
    }

    fn require_key(&self) -> Result<()> {
        if self.style == EndpointStyle::Path && self.api_key.is_empty() {
            return Err(FxError::Unauthorized("no API key configured".to_string()));
        }
        Ok(())
    }
}

impl RateProvider for HttpRateProvider {
    fn max_span_days(&self) -> u32 {
        self.max_span_days
    }

    fn fetch_window(&self, pair: &CurrencyPair, window: &FetchWindow) -> Result<ProviderQuote> {
        self.require_key()?;

        let (url, params) = self.endpoint(pair, window);
        // URL omitted from logs because the path-style URL embeds the API key
        log::debug!("Requesting {} {}..{} from {}", pair, window.start(), window.end(), self.name());

        let (remaining_quota, body) = self.get(&url, &params)?;
        let points = parse_response(&body, pair, window)?;
        Ok(ProviderQuote {
            points,
            remaining_quota,
        })
    }

    fn available_currencies(&self, base: &CurrencyCode) -> Result<Vec<CurrencyCode>> {
        self.require_key()?;
        let (url, params) = self.latest_endpoint(base);
        log::debug!("Listing currencies against {} from {}", base, self.name());
        let (_, body) = self.get(&url, &params)?;
        parse_currencies(&body)
    }

    fn name(&self) -> &str {
        match self.style {
            EndpointStyle::Path => "exchangerate-api",
            EndpointStyle::Query => "query-api",
        }
    }
}

fn check_status(status: StatusCode) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(FxError::Unauthorized(format!("provider returned {}", status)))
        }
        StatusCode::TOO_MANY_REQUESTS => Err(FxError::QuotaExceeded { used: 0, limit: 0 }),
        StatusCode::REQUEST_TIMEOUT => Err(FxError::transient(format!("provider returned {}", status))),
        s if s.is_server_error() => Err(FxError::transient(format!("provider returned {}", s))),
        s => Err(FxError::rejected(format!("provider returned {}", s))),
    }
}

/// Remaining-calls count from the first rate-limit header present
pub(crate) fn remaining_from_headers(headers: &HeaderMap) -> Option<u32> {
    REMAINING_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

/// Parse a provider body into points for `pair` inside `window`.
///
/// Quota exhaustion reported in the body carries placeholder counts; the
/// fetcher substitutes its own.
pub(crate) fn parse_response(body: &str, pair: &CurrencyPair, window: &FetchWindow) -> Result<Vec<RatePoint>> {
    let envelope: QuoteEnvelope = serde_json::from_str(body)
        .map_err(|e| FxError::transient(format!("Malformed provider response: {}", e)))?;
    check_body_error(&envelope)?;

    let rates = envelope
        .rates
        .as_ref()
        .ok_or_else(|| FxError::transient("Provider response has no rates"))?;
    let reported_base = envelope.base.as_deref();

    let mut points = Vec::new();
    match rates {
        RatesBody::ByDate(by_date) => {
            for (date, table) in by_date {
                if !window.contains(*date) {
                    continue;
                }
                match pick_rate(table, pair, reported_base) {
                    Ok(rate) => points.push(RatePoint::new(*date, rate)),
                    Err(e) => log::debug!("No usable {} rate on {}: {}", pair, date, e),
                }
            }
        }
        RatesBody::Flat(table) => {
            let date = response_date(&envelope)
                .or_else(|| window.is_single_day().then(|| window.start()))
                .ok_or_else(|| FxError::transient("Single-date response without a date"))?;
            let rate = pick_rate(table, pair, reported_base)?;
            if window.contains(date) {
                points.push(RatePoint::new(date, rate));
            } else {
                log::debug!("Provider answered {} for {} outside {}..{}", date, pair, window.start(), window.end());
            }
        }
    }
    Ok(points)
}

/// Sorted currency codes from a latest-rates body
pub(crate) fn parse_currencies(body: &str) -> Result<Vec<CurrencyCode>> {
    let envelope: QuoteEnvelope = serde_json::from_str(body)
        .map_err(|e| FxError::transient(format!("Malformed provider response: {}", e)))?;
    check_body_error(&envelope)?;

    let mut codes: Vec<CurrencyCode> = match envelope.rates {
        Some(RatesBody::Flat(table)) => table
            .keys()
            .filter_map(|code| CurrencyCode::new(code).ok())
            .collect(),
        Some(RatesBody::ByDate(_)) => {
            return Err(FxError::rejected("Expected a single rate table for the currency list"))
        }
        None => return Err(FxError::transient("Provider response has no rates")),
    };
    codes.sort();
    codes.dedup();
    Ok(codes)
}

fn response_date(envelope: &QuoteEnvelope) -> Option<NaiveDate> {
    envelope.date.or_else(|| match (envelope.year, envelope.month, envelope.day) {
        (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
        _ => None,
    })
}

/// Rate of `pair.quote` per unit of `pair.base`, crossing through the
/// provider's base currency when it differs from ours
fn pick_rate(table: &HashMap<String, Rate>, pair: &CurrencyPair, reported_base: Option<&str>) -> Result<Rate> {
    let quote = pair.quote().as_str();
    let base = pair.base().as_str();
    let lookup = |code: &str| {
        table
            .get(code)
            .copied()
            .ok_or_else(|| FxError::transient(format!("Response has no rate for {}", code)))
    };

    let rate = match reported_base {
        Some(b) if !b.eq_ignore_ascii_case(base) => {
            let quote_rate = if quote.eq_ignore_ascii_case(b) { 1.0 } else { lookup(quote)? };
            quote_rate / lookup(base)?
        }
        _ => lookup(quote)?,
    };

    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(FxError::transient(format!("Invalid {} rate {}", pair, rate)))
    }
}

fn check_body_error(envelope: &QuoteEnvelope) -> Result<()> {
    let failed = envelope.result.as_deref() == Some("error") || envelope.success == Some(false);
    if !failed {
        return Ok(());
    }

    let kind = envelope
        .error_type
        .clone()
        .or_else(|| {
            envelope.error.as_ref().and_then(|e| {
                e.get("type")
                    .and_then(|t| t.as_str())
                    .or_else(|| e.as_str())
                    .map(str::to_string)
            })
        })
        .unwrap_or_else(|| "unknown".to_string());

    Err(match kind.as_str() {
        "quota-reached" | "usage_limit_reached" | "rate_limit_reached" => {
            FxError::QuotaExceeded { used: 0, limit: 0 }
        }
        "invalid-key" | "inactive-account" | "invalid_access_key" | "missing_access_key" => {
            FxError::Unauthorized(kind)
        }
        _ => FxError::rejected(format!("Provider error: {}", kind)),
    })
}
