//! Rate data acquisition and caching
//!
//! - [`store`]: CSV-backed per-pair rate series with atomic merge
//! - [`sources`]: external quote providers
//! - [`fetcher`]: gap-aware, quota-aware, retrying fetch into the store
//! - [`quota`]: monthly provider call budget

pub mod fetcher;
pub mod quota;
pub mod sources;
pub mod store;

pub use fetcher::{FetchReport, FetchSummary, RateFetcher, RetryPolicy};
pub use quota::QuotaTracker;
pub use sources::{HttpRateProvider, ProviderQuote, RateProvider};
pub use store::{MergeSummary, RateStore};
