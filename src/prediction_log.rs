//! Append-only prediction log
//!
//! Every predicted day is one CSV row. Rows are only ever appended; the file
//! is never truncated or rewritten.

use crate::error::Result;
use crate::predictor::Forecast;
use crate::types::Rate;
use chrono::{DateTime, NaiveDate, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// One logged prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Shared by all rows of one prediction request
    pub request_id: Uuid,
    pub pair: String,
    pub issued_at: DateTime<Utc>,
    pub target_date: NaiveDate,
    pub horizon_days: u32,
    pub predicted_rate: Rate,
    pub actual_rate: Option<Rate>,
    pub error: Option<f64>,
}

impl PredictionRecord {
    /// One record per predicted day of `forecast`
    pub fn from_forecast(forecast: &Forecast, request_id: Uuid, issued_at: DateTime<Utc>) -> Vec<Self> {
        forecast
            .points
            .iter()
            .map(|p| Self {
                request_id,
                pair: forecast.pair.clone(),
                issued_at,
                target_date: p.date,
                horizon_days: forecast.horizon_days,
                predicted_rate: p.predicted,
                actual_rate: p.actual,
                error: p.error,
            })
            .collect()
    }
}

/// Append-only CSV log of predictions
#[derive(Debug)]
pub struct PredictionLogger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl PredictionLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records, logging (not returning) any failure
    pub fn record(&self, entries: &[PredictionRecord]) {
        if let Err(e) = self.try_record(entries) {
            log::warn!(
                "Failed to write {} prediction record(s) to {}: {}",
                entries.len(),
                self.path.display(),
                e
            );
        }
    }

    /// Append records, reporting failures
    pub fn try_record(&self, entries: &[PredictionRecord]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = WriterBuilder::new().has_headers(needs_header).from_writer(file);
        for entry in entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        log::debug!("Logged {} prediction record(s)", entries.len());
        Ok(())
    }

    /// The last `limit` records, oldest first
    pub fn recent(&self, limit: usize) -> Result<Vec<PredictionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(&self.path)?;
        let mut tail = VecDeque::with_capacity(limit.min(1024));
        for result in reader.deserialize::<PredictionRecord>() {
            match result {
                Ok(record) => {
                    if tail.len() == limit {
                        tail.pop_front();
                    }
                    if limit > 0 {
                        tail.push_back(record);
                    }
                }
                Err(e) => log::warn!("Skipping unreadable prediction log row: {}", e),
            }
        }
        Ok(tail.into())
    }
}
