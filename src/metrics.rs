//! Forecast accuracy metrics

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Aggregated backtest accuracy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    /// Root mean squared error: sqrt(mean(error²))
    pub rmse: f64,
    /// Mean absolute error: mean(|error|)
    pub mae: f64,
    /// Number of dates with both a prediction and an actual rate
    pub evaluated: usize,
}

/// Collects per-date errors and aggregates them
#[derive(Debug, Clone, Default)]
pub struct ErrorTracker {
    errors: Vec<f64>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one prediction against its actual; returns the signed error
    pub fn record(&mut self, predicted: f64, actual: f64) -> f64 {
        let error = predicted - actual;
        self.errors.push(error);
        error
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `None` until at least one error was recorded
    pub fn calculate(&self) -> Option<ForecastMetrics> {
        if self.errors.is_empty() {
            return None;
        }
        Some(ForecastMetrics {
            rmse: rmse(&self.errors),
            mae: mae(&self.errors),
            evaluated: self.errors.len(),
        })
    }
}

/// Arithmetic mean of a window of rates; `None` for an empty window
pub fn moving_average(rates: &[f64]) -> Option<f64> {
    if rates.is_empty() {
        None
    } else {
        Some(rates.iter().mean())
    }
}

/// sqrt(mean(error²)); 0 for no errors
pub fn rmse(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    errors.iter().map(|e| e * e).mean().sqrt()
}

/// mean(|error|); 0 for no errors
pub fn mae(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    errors.iter().map(|e| e.abs()).mean()
}
