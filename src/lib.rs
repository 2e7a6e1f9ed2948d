//! # rusty_fx
//!
//! Fetches historical exchange-rate series from an external provider, caches
//! them on disk, and serves a trailing moving-average forecast with
//! backtested accuracy (RMSE / MAE).
//!
//! The web or CLI layer needs two calls: [`ForecastService::fetch_and_merge`]
//! and [`ForecastService::predict`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use rusty_fx::prelude::*;
//! use chrono::NaiveDate;
//!
//! # fn main() -> rusty_fx::error::Result<()> {
//! let config = Config::load(None)?;
//! let service = ForecastService::from_config(&config)?;
//! let pair: CurrencyPair = "USD_EUR".parse()?;
//!
//! let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
//! let end = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
//! let fetched = service.fetch_and_merge(&pair, start, end)?;
//! println!("fetched {} points, gaps: {:?}", fetched.fetched_count, fetched.gap_dates);
//!
//! let response = service.predict(&pair, NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(), 7)?;
//! println!("{:?}", response.predictions);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod currency;
pub mod data;
pub mod error;
pub mod metrics;
pub mod prediction_log;
pub mod predictor;
pub mod service;
pub mod types;

pub use service::ForecastService;

pub mod prelude {
    //! Commonly used types and traits
    pub use crate::config::Config;
    pub use crate::currency::{CurrencyCode, CurrencyPair};
    pub use crate::data::{FetchSummary, RateFetcher, RateProvider, RateStore};
    pub use crate::error::{ErrorResponse, FxError, Result};
    pub use crate::predictor::{Forecast, Predictor};
    pub use crate::prediction_log::{PredictionLogger, PredictionRecord};
    pub use crate::service::{ForecastService, PredictionResponse};
    pub use crate::types::*;
}
