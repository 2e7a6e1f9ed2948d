//! Core types: rate points, rate series and fetch windows

use crate::currency::CurrencyPair;
use crate::error::{FxError, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Exchange rate type
pub type Rate = f64;

/// A single observed rate on a date
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatePoint {
    pub date: NaiveDate,
    pub rate: Rate,
}

impl RatePoint {
    pub fn new(date: NaiveDate, rate: Rate) -> Self {
        Self { date, rate }
    }

    /// Rates must be finite and strictly positive
    pub fn is_valid(&self) -> bool {
        self.rate.is_finite() && self.rate > 0.0
    }
}

/// Date-ordered rate history for one pair.
///
/// Points are strictly increasing by date with exactly one rate per date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateSeries {
    pair: CurrencyPair,
    points: Vec<RatePoint>,
}

impl RateSeries {
    /// Create an empty series
    pub fn empty(pair: CurrencyPair) -> Self {
        Self {
            pair,
            points: Vec::new(),
        }
    }

    /// Build a series from unordered points. Later points win on duplicate dates.
    pub fn from_points(pair: CurrencyPair, points: impl IntoIterator<Item = RatePoint>) -> Self {
        let by_date: BTreeMap<NaiveDate, Rate> =
            points.into_iter().map(|p| (p.date, p.rate)).collect();
        Self {
            pair,
            points: by_date
                .into_iter()
                .map(|(date, rate)| RatePoint::new(date, rate))
                .collect(),
        }
    }

    /// Overlay `incoming` on this series; incoming rates replace stored rates on the same date
    pub fn merged_with(&self, incoming: impl IntoIterator<Item = RatePoint>) -> Self {
        Self::from_points(
            self.pair.clone(),
            self.points.iter().copied().chain(incoming),
        )
    }

    pub fn pair(&self) -> &CurrencyPair {
        &self.pair
    }

    pub fn points(&self) -> &[RatePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&RatePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&RatePoint> {
        self.points.last()
    }

    /// (earliest, latest) cached date
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => Some((first.date, last.date)),
            _ => None,
        }
    }

    /// Last `n` points, or the whole series when shorter
    pub fn latest(&self, n: usize) -> &[RatePoint] {
        let start = self.points.len().saturating_sub(n);
        &self.points[start..]
    }

    /// Up to `n` points dated strictly before `date`
    pub fn window_before(&self, date: NaiveDate, n: usize) -> &[RatePoint] {
        let end = self.count_before(date);
        &self.points[end.saturating_sub(n)..end]
    }

    /// Number of points dated strictly before `date`
    pub fn count_before(&self, date: NaiveDate) -> usize {
        self.points.partition_point(|p| p.date < date)
    }

    /// Rate recorded on `date`, if any
    pub fn rate_on(&self, date: NaiveDate) -> Option<Rate> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|idx| self.points[idx].rate)
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.rate_on(date).is_some()
    }

    /// Chart-friendly columns: (dates, rates)
    pub fn columns(&self) -> (Vec<NaiveDate>, Vec<Rate>) {
        self.points.iter().map(|p| (p.date, p.rate)).unzip()
    }
}

/// Inclusive date range requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl FetchWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(FxError::InvalidRequest(format!(
                "Fetch window start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// One-day window
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every date in the window, ascending
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// Restrict the window to `[floor, ceiling]`; `None` when nothing is left
    pub fn clamp(&self, floor: NaiveDate, ceiling: NaiveDate) -> Option<Self> {
        let start = self.start.max(floor);
        let end = self.end.min(ceiling);
        (start <= end).then_some(Self { start, end })
    }

    /// Split into consecutive sub-windows of at most `max_days` days
    pub fn split(&self, max_days: u32) -> Vec<FetchWindow> {
        let step = i64::from(max_days.max(1));
        let mut chunks = Vec::new();
        let mut start = self.start;
        while start <= self.end {
            let end = (start + Duration::days(step - 1)).min(self.end);
            chunks.push(FetchWindow { start, end });
            start = end + Duration::days(1);
        }
        chunks
    }

    /// Coalesce sorted dates into contiguous windows
    pub fn coalesce(dates: &[NaiveDate]) -> Vec<FetchWindow> {
        let mut windows: Vec<FetchWindow> = Vec::new();
        for &date in dates {
            match windows.last_mut() {
                Some(w) if w.end + Duration::days(1) == date => w.end = date,
                _ => windows.push(FetchWindow::single(date)),
            }
        }
        windows
    }
}
