//! Monthly provider call budget

use crate::error::{FxError, Result};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted usage for the current month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct QuotaUsage {
    year: i32,
    month: u32,
    used: u32,
    /// Remaining calls as last reported by the provider, counted down per call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remaining: Option<u32>,
}

impl QuotaUsage {
    fn fresh(today: NaiveDate) -> Self {
        Self {
            year: today.year(),
            month: today.month(),
            used: 0,
            remaining: None,
        }
    }
}

/// Tracks provider calls against a monthly budget with a safety margin.
///
/// Usage resets when the calendar month changes. When a state file is set the
/// counter survives restarts.
#[derive(Debug)]
pub struct QuotaTracker {
    monthly_limit: u32,
    safety_margin: u32,
    usage: QuotaUsage,
    state_path: Option<PathBuf>,
}

impl QuotaTracker {
    pub fn new(monthly_limit: u32, safety_margin: u32) -> Self {
        Self {
            monthly_limit,
            safety_margin,
            usage: QuotaUsage::fresh(Utc::now().date_naive()),
            state_path: None,
        }
    }

    /// Tracker backed by a JSON state file; unreadable state starts from zero
    pub fn with_state_file(monthly_limit: u32, safety_margin: u32, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tracker = Self::new(monthly_limit, safety_margin);
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<QuotaUsage>(&contents) {
                Ok(usage) => tracker.usage = usage,
                Err(e) => log::warn!("Ignoring unreadable quota state {}: {}", path.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to read quota state {}: {}", path.display(), e),
        }
        tracker.state_path = Some(path);
        tracker.roll_over(Utc::now().date_naive());
        tracker
    }

    pub fn monthly_limit(&self) -> u32 {
        self.monthly_limit
    }

    /// Calls made this month
    pub fn used(&self) -> u32 {
        self.usage.used
    }

    /// Calls still allowed before the safety margin
    pub fn allowance(&self) -> u32 {
        let by_count = self
            .monthly_limit
            .saturating_sub(self.safety_margin)
            .saturating_sub(self.usage.used);
        match self.usage.remaining {
            Some(remaining) => by_count.min(remaining.saturating_sub(self.safety_margin)),
            None => by_count,
        }
    }

    /// Refuse if fewer than `calls` calls remain in the allowance
    pub fn check(&mut self, calls: u32) -> Result<()> {
        self.roll_over(Utc::now().date_naive());
        if calls > self.allowance() {
            return Err(self.exceeded());
        }
        Ok(())
    }

    /// Count one call, optionally with the provider's remaining-calls header.
    ///
    /// Without a header the last reported count is decremented.
    pub fn record_call(&mut self, reported_remaining: Option<u32>) {
        self.usage.used = self.usage.used.saturating_add(1);
        self.usage.remaining = match reported_remaining {
            Some(remaining) => Some(remaining),
            None => self.usage.remaining.map(|r| r.saturating_sub(1)),
        };
        self.persist();
    }

    /// Mark the budget as spent (provider said so, e.g. HTTP 429)
    pub fn exhaust(&mut self) {
        self.usage.remaining = Some(0);
        self.usage.used = self.usage.used.max(self.monthly_limit);
        self.persist();
    }

    pub fn exceeded(&self) -> FxError {
        FxError::QuotaExceeded {
            used: self.usage.used,
            limit: self.monthly_limit,
        }
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if (self.usage.year, self.usage.month) != (today.year(), today.month()) {
            log::info!(
                "New quota month {}-{:02}, resetting usage ({} calls last period)",
                today.year(),
                today.month(),
                self.usage.used
            );
            self.usage = QuotaUsage::fresh(today);
            self.persist();
        }
    }

    fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let result = serde_json::to_string(&self.usage)
            .map_err(FxError::from)
            .and_then(|json| fs::write(path, json).map_err(FxError::from));
        if let Err(e) = result {
            log::warn!("Failed to persist quota state {}: {}", path.display(), e);
        }
    }
}
