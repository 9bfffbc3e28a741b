//! Entity-fetcher abstraction and structured error taxonomy.
//!
//! The `EntityFetcher` trait abstracts over remote data sources so the
//! scheduler can be driven by a real HTTP client or a stub in tests.
//! Errors classify as transient (retry after a delay) or permanent
//! (drop or escalate, per the scheduler's failure policy).

use fundlab_core::schema::{SchemaError, SourceKind};
use polars::prelude::DataFrame;
use thiserror::Error;

/// Structured errors for fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("HTTP {status} from provider for {symbol}")]
    Http { status: u16, symbol: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl FetchError {
    /// Transient failures are retried after a backoff delay and never
    /// surface to callers; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. } | FetchError::NetworkUnreachable(_)
        )
    }
}

/// Result of one entity fetch after the retry policy has absorbed any
/// transient failures. This is what a worker hands the batch coordinator:
/// a permanent failure here is final for that entity.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(DataFrame),
    Failed(FetchError),
}

/// A remote source that can produce one validated table per
/// (symbol, source kind) pair.
pub trait EntityFetcher: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch and schema-validate one table.
    fn fetch(&self, kind: SourceKind, symbol: &str) -> Result<DataFrame, FetchError>;
}

/// Progress callback for multi-symbol operations. Observable side effect
/// only; nothing downstream depends on it.
pub trait FetchProgress: Send + Sync {
    /// A worker started fetching a symbol.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// A symbol fetch finished; `error` is set on permanent failure.
    fn on_complete(&self, symbol: &str, index: usize, total: usize, error: Option<&FetchError>);

    /// The whole batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that prints to stdout.
pub struct StdoutProgress;

impl FetchProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Fetching {symbol}...", index + 1, total);
    }

    fn on_complete(&self, symbol: &str, _index: usize, _total: usize, error: Option<&FetchError>) {
        match error {
            None => println!("  OK: {symbol}"),
            Some(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\nFetch complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

/// No-op progress reporter.
pub struct SilentProgress;

impl FetchProgress for SilentProgress {
    fn on_start(&self, _symbol: &str, _index: usize, _total: usize) {}
    fn on_complete(&self, _s: &str, _i: usize, _t: usize, _e: Option<&FetchError>) {}
    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FetchError::RateLimited { retry_after_secs: 10 }.is_transient());
        assert!(FetchError::NetworkUnreachable("dns".into()).is_transient());
        assert!(!FetchError::SymbolNotFound { symbol: "X".into() }.is_transient());
        assert!(!FetchError::ResponseFormatChanged("drift".into()).is_transient());
        assert!(!FetchError::Http { status: 500, symbol: "X".into() }.is_transient());
    }
}
