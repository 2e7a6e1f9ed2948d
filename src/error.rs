//! Error types for rusty_fx

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for rusty_fx
#[derive(Error, Debug)]
pub enum FxError {
    #[error("Unknown currency pair: {0} (no cached data, fetch it first)")]
    UnknownPair(String),

    #[error("Insufficient data for {pair}: need at least {required} points, got {available}")]
    InsufficientData {
        pair: String,
        required: usize,
        available: usize,
    },

    #[error("Provider quota exceeded: {used} of {limit} calls used this month")]
    QuotaExceeded { used: u32, limit: u32 },

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Corrupt rate store file {path}: {message}")]
    StoreCorruption { path: PathBuf, message: String },

    #[error("Invalid currency pair: {0}")]
    InvalidPair(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl FxError {
    /// Transient provider failure that is worth retrying
    pub fn transient(message: impl Into<String>) -> Self {
        FxError::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    /// Provider failure that retrying will not fix
    pub fn rejected(message: impl Into<String>) -> Self {
        FxError::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FxError::Provider { retryable: true, .. })
    }

    /// Whether the caller can recover within the session (usually by fetching more data)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FxError::UnknownPair(_) | FxError::InsufficientData { .. }
        ) || self.is_retryable()
    }

    /// Stable machine-readable code for structured responses
    pub fn code(&self) -> &'static str {
        match self {
            FxError::UnknownPair(_) => "unknown_pair",
            FxError::InsufficientData { .. } => "insufficient_data",
            FxError::QuotaExceeded { .. } => "quota_exceeded",
            FxError::Provider { .. } => "provider_error",
            FxError::Unauthorized(_) => "unauthorized",
            FxError::StoreCorruption { .. } => "store_corruption",
            FxError::InvalidPair(_) => "invalid_pair",
            FxError::InvalidRequest(_) => "invalid_request",
            FxError::ConfigError(_) => "config_error",
            FxError::IoError(_) => "io_error",
            FxError::CsvError(_) => "csv_error",
            FxError::SerdeError(_) => "serialization_error",
        }
    }
}

/// Structured error body handed to the web layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    pub recoverable: bool,
}

impl From<&FxError> for ErrorResponse {
    fn from(err: &FxError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

/// Result type alias for rusty_fx operations
pub type Result<T> = std::result::Result<T, FxError>;
