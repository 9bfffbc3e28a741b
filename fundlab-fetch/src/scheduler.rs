//! Bounded-concurrency batch scheduler.
//!
//! Fetches one table per symbol across a worker pool of at most `width`
//! threads, retrying transient failures per symbol and aggregating the
//! per-symbol frames into one combined frame. Two failure policies:
//!
//! - tolerant: permanent failures are recorded in the report and the
//!   batch keeps going; the aggregate holds whatever succeeded.
//! - strict: the first permanent failure stops dispatch of queued
//!   symbols (in-flight fetches run to completion) and the batch
//!   returns an error naming the failing symbol.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

use polars::prelude::DataFrame;
use thiserror::Error;

use crate::provider::{FetchError, FetchOutcome, FetchProgress};
use crate::retry::RetryPolicy;

/// How the scheduler reacts to a permanent per-symbol failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the failure and continue with the remaining symbols.
    Tolerant,
    /// Stop dispatching and fail the whole batch.
    Strict,
}

/// Per-batch accounting: which symbols succeeded and which failed, with
/// the structured error for each failure.
#[derive(Debug)]
pub struct FetchReport {
    pub requested: usize,
    pub succeeded: usize,
    pub failures: Vec<(String, FetchError)>,
}

impl FetchReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// One-line summary, e.g. "2 of 3 succeeded".
    pub fn summary(&self) -> String {
        format!("{} of {} succeeded", self.succeeded, self.requested)
    }
}

/// Combined result of a batch: the stacked frame of all successful
/// fetches (None when nothing succeeded or nothing produced rows) plus
/// the per-symbol report.
#[derive(Debug)]
pub struct AggregatedFetch {
    pub frame: Option<DataFrame>,
    pub report: FetchReport,
}

/// A batch failure under the strict policy, naming the symbol whose
/// permanent error stopped the batch.
#[derive(Debug, Error)]
#[error("fetch failed for {symbol}: {source}")]
pub struct BatchFetchError {
    pub symbol: String,
    #[source]
    pub source: FetchError,
}

/// Scheduler for concurrent per-symbol fetches.
pub struct FetchScheduler {
    width: usize,
    policy: FailurePolicy,
    retry: RetryPolicy,
}

impl Default for FetchScheduler {
    fn default() -> Self {
        FetchScheduler {
            width: 8,
            policy: FailurePolicy::Tolerant,
            retry: RetryPolicy::default(),
        }
    }
}

impl FetchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on simultaneously in-flight fetches. Clamped to at least 1.
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(1);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch one frame per symbol and stack the successes.
    ///
    /// `fetch` runs on worker threads; transient errors inside it are
    /// retried indefinitely by the scheduler's retry policy, so only
    /// permanent errors reach the report. Symbols are dispatched in
    /// order, at most `width` at a time. A fetch that succeeds with an
    /// empty frame still counts as a success.
    pub fn fetch_all<F>(
        &self,
        symbols: &[String],
        progress: &dyn FetchProgress,
        fetch: F,
    ) -> Result<AggregatedFetch, BatchFetchError>
    where
        F: Fn(&str) -> Result<DataFrame, FetchError> + Sync,
    {
        let total = symbols.len();
        let strict = self.policy == FailurePolicy::Strict;
        let cursor = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<(usize, FetchOutcome)>();

        let mut combined: Option<DataFrame> = None;
        let mut succeeded = 0usize;
        let mut failures: Vec<(String, FetchError)> = Vec::new();

        std::thread::scope(|scope| {
            let workers = self.width.min(total);
            for _ in 0..workers {
                let tx = tx.clone();
                let cursor = &cursor;
                let stop = &stop;
                let retry = &self.retry;
                let fetch = &fetch;
                scope.spawn(move || loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let i = cursor.fetch_add(1, Ordering::SeqCst);
                    if i >= total {
                        break;
                    }
                    let symbol = symbols[i].as_str();
                    progress.on_start(symbol, i, total);
                    match retry.run(|| fetch(symbol)) {
                        Ok(frame) => {
                            progress.on_complete(symbol, i, total, None);
                            let _ = tx.send((i, FetchOutcome::Success(frame)));
                        }
                        Err(err) => {
                            progress.on_complete(symbol, i, total, Some(&err));
                            if strict {
                                stop.store(true, Ordering::SeqCst);
                            }
                            let _ = tx.send((i, FetchOutcome::Failed(err)));
                        }
                    }
                });
            }
            drop(tx);

            // Single coordinator owns the accumulator; workers never
            // touch shared frames.
            for (i, outcome) in rx {
                match outcome {
                    FetchOutcome::Success(frame) => match combined.take() {
                        None => {
                            succeeded += 1;
                            combined = Some(frame);
                        }
                        Some(acc) => match acc.vstack(&frame) {
                            Ok(stacked) => {
                                succeeded += 1;
                                combined = Some(stacked);
                            }
                            Err(e) => {
                                combined = Some(acc);
                                failures.push((
                                    symbols[i].clone(),
                                    FetchError::ResponseFormatChanged(e.to_string()),
                                ));
                                if strict {
                                    stop.store(true, Ordering::SeqCst);
                                }
                            }
                        },
                    },
                    FetchOutcome::Failed(err) => failures.push((symbols[i].clone(), err)),
                }
            }
        });

        progress.on_batch_complete(succeeded, failures.len(), total);

        if strict && !failures.is_empty() {
            let (symbol, source) = failures.into_iter().next().unwrap();
            return Err(BatchFetchError { symbol, source });
        }

        Ok(AggregatedFetch {
            frame: combined,
            report: FetchReport {
                requested: total,
                succeeded,
                failures,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SilentProgress;
    use polars::prelude::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn syms(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn one_row(symbol: &str, value: f64) -> DataFrame {
        DataFrame::new(vec![
            Column::new("symbol".into(), vec![symbol]),
            Column::new("value".into(), vec![value]),
        ])
        .unwrap()
    }

    fn fast_scheduler(policy: FailurePolicy) -> FetchScheduler {
        FetchScheduler::new()
            .with_policy(policy)
            .with_retry(RetryPolicy::new(Duration::from_millis(1)))
    }

    #[test]
    fn tolerant_batch_aggregates_successes() {
        let scheduler = fast_scheduler(FailurePolicy::Tolerant);
        let out = scheduler
            .fetch_all(&syms(&["AAA", "BBB", "CCC"]), &SilentProgress, |symbol| {
                if symbol == "CCC" {
                    Err(FetchError::SymbolNotFound { symbol: symbol.into() })
                } else {
                    Ok(one_row(symbol, 1.0))
                }
            })
            .unwrap();

        assert_eq!(out.report.succeeded, 2);
        assert_eq!(out.report.failed(), 1);
        assert_eq!(out.report.summary(), "2 of 3 succeeded");
        assert_eq!(out.frame.unwrap().height(), 2);
    }

    #[test]
    fn strict_batch_fails_with_symbol() {
        let scheduler = fast_scheduler(FailurePolicy::Strict).with_width(1);
        let err = scheduler
            .fetch_all(&syms(&["AAA", "BBB"]), &SilentProgress, |symbol| {
                if symbol == "AAA" {
                    Err(FetchError::AuthenticationRequired("bad key".into()))
                } else {
                    Ok(one_row(symbol, 1.0))
                }
            })
            .unwrap_err();

        assert_eq!(err.symbol, "AAA");
        assert!(matches!(err.source, FetchError::AuthenticationRequired(_)));
    }

    #[test]
    fn strict_stops_dispatching_queued_symbols() {
        let scheduler = fast_scheduler(FailurePolicy::Strict).with_width(1);
        let dispatched = AtomicUsize::new(0);
        let symbols = syms(&["AAA", "BBB", "CCC", "DDD"]);
        let result = scheduler.fetch_all(&symbols, &SilentProgress, |_symbol| {
            dispatched.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::SymbolNotFound { symbol: "AAA".into() })
        });

        assert!(result.is_err());
        // Width 1: the first failure sets the stop flag before the next
        // dispatch, so only one symbol ever starts.
        assert_eq!(dispatched.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transient_errors_never_reach_the_report() {
        let scheduler = fast_scheduler(FailurePolicy::Strict);
        let attempts = AtomicUsize::new(0);
        let out = scheduler
            .fetch_all(&syms(&["AAA"]), &SilentProgress, |symbol| {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::RateLimited { retry_after_secs: 0 })
                } else {
                    Ok(one_row(symbol, 1.0))
                }
            })
            .unwrap();

        assert_eq!(out.report.succeeded, 1);
        assert!(out.report.failures.is_empty());
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn empty_frame_counts_as_success() {
        let scheduler = fast_scheduler(FailurePolicy::Tolerant);
        let out = scheduler
            .fetch_all(&syms(&["AAA"]), &SilentProgress, |_| {
                Ok(DataFrame::new(vec![
                    Column::new("symbol".into(), Vec::<String>::new()),
                    Column::new("value".into(), Vec::<f64>::new()),
                ])
                .unwrap())
            })
            .unwrap();

        assert_eq!(out.report.succeeded, 1);
        assert_eq!(out.frame.unwrap().height(), 0);
    }

    #[test]
    fn empty_symbol_list_yields_empty_report() {
        let scheduler = fast_scheduler(FailurePolicy::Tolerant);
        let out = scheduler
            .fetch_all(&[], &SilentProgress, |symbol| Ok(one_row(symbol, 1.0)))
            .unwrap();

        assert!(out.frame.is_none());
        assert_eq!(out.report.requested, 0);
        assert_eq!(out.report.succeeded, 0);
    }

    #[test]
    fn wide_batch_visits_every_symbol_once() {
        let scheduler = fast_scheduler(FailurePolicy::Tolerant).with_width(8);
        let names: Vec<String> = (0..40).map(|i| format!("SYM{i:02}")).collect();
        let calls = AtomicUsize::new(0);
        let out = scheduler
            .fetch_all(&names, &SilentProgress, |symbol| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(one_row(symbol, 1.0))
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 40);
        assert_eq!(out.report.succeeded, 40);
        assert_eq!(out.frame.unwrap().height(), 40);
    }
}
