//! Currency codes and currency pairs

use crate::error::{FxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO 4217 style currency code (three ASCII letters, upper-case)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse and normalize a currency code
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FxError::InvalidPair(format!(
                "Currency code must be three letters, got: {:?}",
                code
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// US dollar, the default base currency
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CurrencyCode {
    type Err = FxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = FxError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered (base, quote) pair. One unit of `base` buys `rate` units of `quote`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyPair {
    base: CurrencyCode,
    quote: CurrencyCode,
}

impl CurrencyPair {
    pub fn new(base: CurrencyCode, quote: CurrencyCode) -> Result<Self> {
        if base == quote {
            return Err(FxError::InvalidPair(format!(
                "Base and quote currency are both {}",
                base
            )));
        }
        Ok(Self { base, quote })
    }

    /// Build a pair from two code strings
    pub fn from_codes(base: &str, quote: &str) -> Result<Self> {
        Self::new(CurrencyCode::new(base)?, CurrencyCode::new(quote)?)
    }

    pub fn base(&self) -> &CurrencyCode {
        &self.base
    }

    pub fn quote(&self) -> &CurrencyCode {
        &self.quote
    }

    /// Parse `raw` as a full pair, or as a bare quote code against `base`
    pub fn parse_with_base(raw: &str, base: &CurrencyCode) -> Result<Self> {
        let raw = raw.trim();
        if raw.len() == 3 {
            return Self::new(base.clone(), CurrencyCode::new(raw)?);
        }
        raw.parse()
    }

    /// Canonical `BASE_QUOTE` key used for file names and persisted rows
    pub fn key(&self) -> String {
        format!("{}_{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = FxError;

    /// Accepts `USD_EUR`, `USD/EUR` and `USD_to_EUR`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (base, quote) = s
            .split_once("_to_")
            .or_else(|| s.split_once('_'))
            .or_else(|| s.split_once('/'))
            .ok_or_else(|| FxError::InvalidPair(format!("Cannot parse pair: {:?}", s)))?;
        Self::from_codes(base, quote)
    }
}

impl TryFrom<String> for CurrencyPair {
    type Error = FxError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CurrencyPair> for String {
    fn from(pair: CurrencyPair) -> Self {
        pair.key()
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.base, self.quote)
    }
}
