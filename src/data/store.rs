//! On-disk rate store
//!
//! One CSV file per pair under the store directory (`USD_EUR.csv`), with a
//! `pair,date,rate` header and rows sorted by date. Writes go through a temp
//! file in the same directory and an atomic rename, so readers never see a
//! half-written file. Writers for the same pair are serialized in-process.

use crate::currency::CurrencyPair;
use crate::error::{FxError, Result};
use crate::types::{Rate, RatePoint, RateSeries};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;

/// Persisted row layout
#[derive(Debug, Serialize, Deserialize)]
struct RateRow {
    pair: String,
    date: NaiveDate,
    rate: Rate,
}

/// Outcome of a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeSummary {
    /// Dates not previously stored
    pub inserted: usize,
    /// Stored dates whose rate was replaced
    pub updated: usize,
    /// Points rejected for a non-positive or non-finite rate
    pub rejected: usize,
    /// Series length after the merge
    pub total: usize,
}

/// CSV-backed rate store
#[derive(Debug)]
pub struct RateStore {
    dir: PathBuf,
    locks: Mutex<HashMap<CurrencyPair, Arc<Mutex<()>>>>,
}

impl RateStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing a pair's series
    pub fn path_for(&self, pair: &CurrencyPair) -> PathBuf {
        self.dir.join(format!("{}.csv", pair.key()))
    }

    pub fn contains(&self, pair: &CurrencyPair) -> bool {
        self.path_for(pair).is_file()
    }

    /// Load a pair's series. Missing files give an empty series; corrupt files
    /// are logged and also treated as empty.
    pub fn load(&self, pair: &CurrencyPair) -> RateSeries {
        match self.try_load(pair) {
            Ok(series) => series,
            Err(e) => {
                log::warn!("Treating {} as empty: {}", pair, e);
                RateSeries::empty(pair.clone())
            }
        }
    }

    /// Load a pair's series, reporting corruption as [`FxError::StoreCorruption`]
    pub fn try_load(&self, pair: &CurrencyPair) -> Result<RateSeries> {
        let path = self.path_for(pair);
        if !path.exists() {
            return Ok(RateSeries::empty(pair.clone()));
        }

        let corrupt = |message: String| FxError::StoreCorruption {
            path: path.clone(),
            message,
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|e| corrupt(e.to_string()))?;

        let key = pair.key();
        let mut points = Vec::new();
        for (line, result) in reader.deserialize::<RateRow>().enumerate() {
            let row = result.map_err(|e| corrupt(format!("row {}: {}", line + 1, e)))?;
            if row.pair != key {
                return Err(corrupt(format!(
                    "row {}: pair {} in file for {}",
                    line + 1,
                    row.pair,
                    key
                )));
            }
            let point = RatePoint::new(row.date, row.rate);
            if !point.is_valid() {
                return Err(corrupt(format!("row {}: invalid rate {}", line + 1, row.rate)));
            }
            points.push(point);
        }

        Ok(RateSeries::from_points(pair.clone(), points))
    }

    /// Merge newly fetched points into the stored series and persist atomically.
    ///
    /// Incoming rates replace stored rates on the same date.
    pub fn merge(
        &self,
        pair: &CurrencyPair,
        new_points: impl IntoIterator<Item = RatePoint>,
    ) -> Result<MergeSummary> {
        let lock = self.pair_lock(pair);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = self.load(pair);
        let mut summary = MergeSummary::default();
        let mut accepted = Vec::new();
        for point in new_points {
            if point.is_valid() {
                accepted.push(point);
            } else {
                log::warn!("Dropping invalid rate {} for {} on {}", point.rate, pair, point.date);
                summary.rejected += 1;
            }
        }

        let incoming_dates: BTreeSet<NaiveDate> = accepted.iter().map(|p| p.date).collect();
        summary.updated = incoming_dates
            .iter()
            .filter(|date| existing.contains_date(**date))
            .count();

        let merged = existing.merged_with(accepted);
        summary.inserted = merged.len() - existing.len();
        summary.total = merged.len();

        self.write_atomic(&merged)?;
        log::debug!(
            "Merged {} into store: {} inserted, {} updated, {} total",
            pair,
            summary.inserted,
            summary.updated,
            summary.total
        );
        Ok(summary)
    }

    /// The last `n` points by date (fewer when history is short)
    pub fn latest_window(&self, pair: &CurrencyPair, n: usize) -> Vec<RatePoint> {
        self.load(pair).latest(n).to_vec()
    }

    /// (earliest, latest) stored date for a pair
    pub fn date_range(&self, pair: &CurrencyPair) -> Option<(NaiveDate, NaiveDate)> {
        self.load(pair).date_range()
    }

    /// Pairs with a persisted series, sorted
    pub fn pairs(&self) -> Result<Vec<CurrencyPair>> {
        let mut pairs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<CurrencyPair>() {
                Ok(pair) => pairs.push(pair),
                Err(_) => log::debug!("Ignoring unrecognized file {}", path.display()),
            }
        }
        pairs.sort();
        Ok(pairs)
    }

    /// Delete a pair's series. Returns whether anything was removed.
    pub fn remove(&self, pair: &CurrencyPair) -> Result<bool> {
        let lock = self.pair_lock(pair);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.path_for(pair);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        log::info!("Deleted cached rates for {}", pair);
        Ok(true)
    }

    /// Delete every stored series, returning how many were removed
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for pair in self.pairs()? {
            if self.remove(&pair)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn pair_lock(&self, pair: &CurrencyPair) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(pair.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn write_atomic(&self, series: &RateSeries) -> Result<()> {
        let key = series.pair().key();
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = WriterBuilder::new().has_headers(true).from_writer(tmp.as_file_mut());
            for point in series.points() {
                writer.serialize(RateRow {
                    pair: key.clone(),
                    date: point.date,
                    rate: point.rate,
                })?;
            }
            if series.is_empty() {
                writer.write_record(["pair", "date", "rate"])?;
            }
            writer.flush()?;
        }
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(series.pair()))
            .map_err(|e| FxError::IoError(e.error))?;
        Ok(())
    }
}
