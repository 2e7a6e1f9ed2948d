//! Trailing moving-average predictor
//!
//! The model has no trend component: a forward forecast is the mean of the
//! last `window` cached rates, repeated for every requested day. Dates that
//! are already covered by the cache are backtested, each one predicted from
//! the `window` points strictly before it and scored against the actual rate.
//!
//! All operations are pure functions of the [`RateSeries`] passed in.

use crate::error::{FxError, Result};
use crate::metrics::{moving_average, ErrorTracker, ForecastMetrics};
use crate::types::{Rate, RatePoint, RateSeries};
use chrono::NaiveDate;
use serde::Serialize;
use statrs::statistics::Statistics;

/// Default trailing window (days of history averaged)
pub const DEFAULT_WINDOW: usize = 10;

/// Default cap on the number of days one request may predict
pub const DEFAULT_MAX_HORIZON: u32 = 365;

/// Model label reported alongside forecasts
pub const MODEL_NAME: &str = "simple_moving_average";

/// Result of validating a series for prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainSummary {
    pub pair: String,
    pub data_points: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub window: usize,
    pub model: &'static str,
    /// Mean of the last `window` rates, i.e. the current forward forecast
    pub moving_average: Rate,
    /// Mean over the whole series
    pub mean_rate: Rate,
    /// Sample standard deviation over the whole series (0 for a single point)
    pub std_rate: f64,
}

/// One predicted day
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictedPoint {
    pub date: NaiveDate,
    pub predicted: Rate,
    /// Cached rate on `date`, if known
    pub actual: Option<Rate>,
    /// |predicted - actual| when the actual is known
    pub error: Option<f64>,
}

/// Forecast over `[target_date, target_date + horizon_days)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub pair: String,
    pub model: &'static str,
    pub window: usize,
    pub target_date: NaiveDate,
    pub horizon_days: u32,
    /// Latest cached date the forecast was computed from
    pub as_of: NaiveDate,
    pub points: Vec<PredictedPoint>,
    /// Backtest accuracy over the days that had actual rates
    pub metrics: Option<ForecastMetrics>,
}

impl Forecast {
    /// `(date, predicted_rate)` pairs for charting
    pub fn predictions(&self) -> Vec<(NaiveDate, Rate)> {
        self.points.iter().map(|p| (p.date, p.predicted)).collect()
    }

    pub fn rmse(&self) -> Option<f64> {
        self.metrics.map(|m| m.rmse)
    }

    pub fn mae(&self) -> Option<f64> {
        self.metrics.map(|m| m.mae)
    }
}

/// Moving-average predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predictor {
    window: usize,
    max_horizon: u32,
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl Predictor {
    /// Create a predictor averaging the last `window` points (at least 1)
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            max_horizon: DEFAULT_MAX_HORIZON,
        }
    }

    /// Cap `horizon_days` per request (at least 1)
    pub fn with_max_horizon(mut self, max_horizon: u32) -> Self {
        self.max_horizon = max_horizon.max(1);
        self
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn max_horizon(&self) -> u32 {
        self.max_horizon
    }

    /// Check the series can support a prediction. Nothing is stored.
    pub fn train(&self, series: &RateSeries) -> Result<TrainSummary> {
        let (first_date, last_date) = series
            .date_range()
            .ok_or_else(|| FxError::UnknownPair(series.pair().key()))?;
        self.require(series, series.len())?;

        let moving_average = mean_rate(series.latest(self.window));
        let (_, rates) = series.columns();
        let std_rate = rates.iter().std_dev();
        log::info!(
            "Validated {} with {} points ({}..{}), window {}",
            series.pair(),
            series.len(),
            first_date,
            last_date,
            self.window
        );
        Ok(TrainSummary {
            pair: series.pair().key(),
            data_points: series.len(),
            first_date,
            last_date,
            window: self.window,
            model: MODEL_NAME,
            moving_average,
            mean_rate: mean_rate(series.points()),
            std_rate: if std_rate.is_finite() { std_rate } else { 0.0 },
        })
    }

    /// Predict `horizon_days` consecutive days starting at `target_date`.
    ///
    /// Days after the latest cached date get the flat forward forecast; days
    /// inside the cache are backtested from the points strictly before them.
    pub fn predict(&self, series: &RateSeries, target_date: NaiveDate, horizon_days: u32) -> Result<Forecast> {
        if horizon_days == 0 {
            return Err(FxError::InvalidRequest("horizon_days must be at least 1".to_string()));
        }
        if horizon_days > self.max_horizon {
            return Err(FxError::InvalidRequest(format!(
                "horizon_days {} exceeds the maximum of {}",
                horizon_days, self.max_horizon
            )));
        }
        let latest = series
            .last()
            .map(|p| p.date)
            .ok_or_else(|| FxError::UnknownPair(series.pair().key()))?;

        // The earliest predicted day has the least history behind it
        self.require(series, series.count_before(target_date))?;

        let forward = mean_rate(series.latest(self.window));
        let mut tracker = ErrorTracker::new();
        let mut points = Vec::with_capacity(horizon_days as usize);

        for date in target_date.iter_days().take(horizon_days as usize) {
            if date > latest {
                points.push(PredictedPoint {
                    date,
                    predicted: forward,
                    actual: None,
                    error: None,
                });
                continue;
            }

            let predicted = mean_rate(series.window_before(date, self.window));
            let actual = series.rate_on(date);
            let error = actual.map(|a| tracker.record(predicted, a).abs());
            points.push(PredictedPoint {
                date,
                predicted,
                actual,
                error,
            });
        }

        let metrics = tracker.calculate();
        if let Some(m) = metrics {
            log::debug!(
                "Backtest {} over {} day(s): rmse={:.6} mae={:.6}",
                series.pair(),
                m.evaluated,
                m.rmse,
                m.mae
            );
        }

        Ok(Forecast {
            pair: series.pair().key(),
            model: MODEL_NAME,
            window: self.window,
            target_date,
            horizon_days,
            as_of: latest,
            points,
            metrics,
        })
    }

    fn require(&self, series: &RateSeries, available: usize) -> Result<()> {
        if available < self.window {
            return Err(FxError::InsufficientData {
                pair: series.pair().key(),
                required: self.window,
                available,
            });
        }
        Ok(())
    }
}

fn mean_rate(points: &[RatePoint]) -> Rate {
    let rates: Vec<Rate> = points.iter().map(|p| p.rate).collect();
    moving_average(&rates).unwrap_or(f64::NAN)
}
