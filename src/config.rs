//! Runtime configuration
//!
//! Read once at startup from a TOML file and passed explicitly to the store,
//! fetcher and predictor constructors.

use crate::currency::CurrencyCode;
use crate::error::{FxError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the configured API key
pub const API_KEY_ENV: &str = "RUSTY_FX_API_KEY";

/// Upper bound accepted for `max_horizon_days`
const MAX_HORIZON_LIMIT: u32 = 3650;

/// How the provider expects dates and currencies to be encoded in the URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStyle {
    /// `<base_url>/<key>/history/<BASE>/<Y>/<M>/<D>` (exchangerate-api v6)
    Path,
    /// `<base_url>/<date>?base=..&symbols=..` or `/timeseries?start_date=..`
    Query,
}

/// Provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub endpoint_style: EndpointStyle,
    /// Largest date span one call may cover; 1 means one call per day
    pub max_span_days: u32,
    pub timeout_secs: u64,
    pub monthly_quota: u32,
    /// Calls held back from the monthly quota
    pub quota_safety_margin: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://v6.exchangerate-api.com/v6".to_string(),
            api_key: String::new(),
            endpoint_style: EndpointStyle::Path,
            max_span_days: 1,
            timeout_secs: 10,
            monthly_quota: 1500,
            quota_safety_margin: 50,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry settings for transient provider failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub base_currency: CurrencyCode,
    /// Earliest date the provider serves; earlier requests are clamped
    pub earliest_date: NaiveDate,
    /// Trailing window of the moving-average predictor
    pub window_size: usize,
    /// Most days one prediction request may cover
    pub max_horizon_days: u32,
    pub provider: ProviderConfig,
    pub retry: RetryConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rusty-fx")
        .join("data")
}

fn default_earliest_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or(NaiveDate::MIN)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            base_currency: CurrencyCode::usd(),
            earliest_date: default_earliest_date(),
            window_size: 10,
            max_horizon_days: 365,
            provider: ProviderConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Default config file location (`~/.rusty-fx/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".rusty-fx").join("config.toml"))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| FxError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Load from `path`, or from the default location, falling back to defaults.
    ///
    /// The API key from [`API_KEY_ENV`] wins over the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match candidate {
            Some(p) if p.exists() => {
                log::debug!("Loading config from {}", p.display());
                Self::from_toml(&fs::read_to_string(&p)?)?
            }
            Some(p) if path.is_some() => {
                return Err(FxError::ConfigError(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            _ => {
                log::warn!("No config file found, using default configuration");
                Self::default()
            }
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.provider.api_key = key.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Sanity-check values once at startup
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(FxError::ConfigError("window_size must be at least 1".into()));
        }
        if self.max_horizon_days == 0 || self.max_horizon_days > MAX_HORIZON_LIMIT {
            return Err(FxError::ConfigError(format!(
                "max_horizon_days must be between 1 and {}",
                MAX_HORIZON_LIMIT
            )));
        }
        if self.provider.max_span_days == 0 {
            return Err(FxError::ConfigError("provider.max_span_days must be at least 1".into()));
        }
        if self.provider.quota_safety_margin >= self.provider.monthly_quota {
            return Err(FxError::ConfigError(format!(
                "quota_safety_margin ({}) must be below monthly_quota ({})",
                self.provider.quota_safety_margin, self.provider.monthly_quota
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(FxError::ConfigError("retry.max_attempts must be at least 1".into()));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(FxError::ConfigError("provider.base_url is empty".into()));
        }
        Ok(())
    }

    pub fn rates_dir(&self) -> PathBuf {
        self.data_dir.join("rates")
    }

    pub fn prediction_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("predictions.csv")
    }

    pub fn quota_path(&self) -> PathBuf {
        self.data_dir.join("quota.json")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.rates_dir())?;
        if let Some(parent) = self.prediction_log_path().parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
