//! Concurrent acquisition of point-in-time financial datasets.
//!
//! This crate drives remote data sources through a bounded worker pool,
//! retries transient failures indefinitely with a fixed backoff, and
//! assembles the per-symbol results into `fundlab_core::Universe`
//! snapshots. The `EntityFetcher` trait decouples the scheduler from the
//! concrete HTTP client, so batches run identically against the real
//! Financial Modeling Prep API and against in-memory stubs in tests.

pub mod fmp;
pub mod provider;
pub mod retry;
pub mod scheduler;
pub mod snapshot;

pub use fmp::{FmpClient, FmpConfig};
pub use provider::{EntityFetcher, FetchError, FetchOutcome, FetchProgress, SilentProgress, StdoutProgress};
pub use retry::RetryPolicy;
pub use scheduler::{
    AggregatedFetch, BatchFetchError, FailurePolicy, FetchReport, FetchScheduler,
};
pub use snapshot::{build_universe, SnapshotError, SnapshotOptions};
