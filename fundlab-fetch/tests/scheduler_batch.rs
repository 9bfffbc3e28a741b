//! End-to-end batch behavior against a stubbed data source.
//!
//! Exercises the scheduler's failure policies and aggregation through the
//! public API, plus a full snapshot build where rows flow through the
//! schema contract exactly as they would from the real provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use polars::prelude::*;
use serde_json::json;

use fundlab_core::schema::{RawRow, SchemaContract, SourceKind};
use fundlab_fetch::provider::{EntityFetcher, FetchError, SilentProgress};
use fundlab_fetch::retry::RetryPolicy;
use fundlab_fetch::scheduler::{FailurePolicy, FetchScheduler};
use fundlab_fetch::snapshot::{build_universe, SnapshotOptions};

fn syms(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn rows(symbol: &str, n: usize) -> DataFrame {
    let symbols: Vec<&str> = std::iter::repeat(symbol).take(n).collect();
    let values: Vec<f64> = (0..n).map(|i| i as f64).collect();
    DataFrame::new(vec![
        Column::new("symbol".into(), symbols),
        Column::new("value".into(), values),
    ])
    .unwrap()
}

/// Stub batch: AAA succeeds with 5 rows, BBB hits one rate limit before
/// succeeding with 3 rows, CCC always fails permanently.
fn mixed_fetch(bbb_attempts: &AtomicUsize) -> impl Fn(&str) -> Result<DataFrame, FetchError> + Sync + '_ {
    move |symbol| match symbol {
        "AAA" => Ok(rows("AAA", 5)),
        "BBB" => {
            if bbb_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FetchError::RateLimited { retry_after_secs: 0 })
            } else {
                Ok(rows("BBB", 3))
            }
        }
        other => Err(FetchError::SymbolNotFound {
            symbol: other.to_string(),
        }),
    }
}

fn fast_scheduler(policy: FailurePolicy) -> FetchScheduler {
    FetchScheduler::new()
        .with_policy(policy)
        .with_retry(RetryPolicy::new(Duration::from_millis(1)))
}

#[test]
fn tolerant_batch_keeps_going_past_permanent_failures() {
    let bbb_attempts = AtomicUsize::new(0);
    let out = fast_scheduler(FailurePolicy::Tolerant)
        .fetch_all(
            &syms(&["AAA", "BBB", "CCC"]),
            &SilentProgress,
            mixed_fetch(&bbb_attempts),
        )
        .unwrap();

    // The transient BBB failure was retried, never reported.
    assert_eq!(bbb_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(out.report.summary(), "2 of 3 succeeded");
    assert_eq!(out.report.failures.len(), 1);
    assert_eq!(out.report.failures[0].0, "CCC");
    assert!(matches!(
        out.report.failures[0].1,
        FetchError::SymbolNotFound { .. }
    ));
    assert_eq!(out.frame.unwrap().height(), 8);
}

#[test]
fn tolerant_aggregate_holds_exactly_the_successful_rows() {
    let bbb_attempts = AtomicUsize::new(0);
    let out = fast_scheduler(FailurePolicy::Tolerant)
        .fetch_all(
            &syms(&["AAA", "BBB", "CCC"]),
            &SilentProgress,
            mixed_fetch(&bbb_attempts),
        )
        .unwrap();

    let combined = out
        .frame
        .unwrap()
        .sort(["symbol", "value"], SortMultipleOptions::default())
        .unwrap();
    let expected = rows("AAA", 5)
        .vstack(&rows("BBB", 3))
        .unwrap()
        .sort(["symbol", "value"], SortMultipleOptions::default())
        .unwrap();
    assert!(combined.equals_missing(&expected));
}

#[test]
fn strict_batch_surfaces_the_failing_symbol() {
    let bbb_attempts = AtomicUsize::new(0);
    let err = fast_scheduler(FailurePolicy::Strict)
        .with_width(1)
        .fetch_all(
            &syms(&["CCC", "AAA", "BBB"]),
            &SilentProgress,
            mixed_fetch(&bbb_attempts),
        )
        .unwrap_err();

    assert_eq!(err.symbol, "CCC");
    assert!(matches!(err.source, FetchError::SymbolNotFound { .. }));
    // CCC failed before AAA or BBB were dispatched.
    assert_eq!(bbb_attempts.load(Ordering::SeqCst), 0);
}

/// Stub provider that serves canned price payloads through the same
/// raw-row path the HTTP client uses.
struct CannedPrices;

impl CannedPrices {
    fn price_rows(symbol: &str) -> Vec<RawRow> {
        let payload = json!([
            {"symbol": symbol, "date": "2020-01-02", "open": 10.0, "high": 11.0,
             "low": 9.5, "close": 10.5, "adjClose": 10.5, "volume": 1000.0},
            {"symbol": symbol, "date": "2020-01-03", "open": 10.5, "high": 12.0,
             "low": 10.0, "close": 11.5, "adjClose": 11.5, "volume": 1200.0},
        ]);
        match payload {
            serde_json::Value::Array(entries) => entries
                .into_iter()
                .map(|e| match e {
                    serde_json::Value::Object(row) => row,
                    _ => unreachable!(),
                })
                .collect(),
            _ => unreachable!(),
        }
    }
}

impl EntityFetcher for CannedPrices {
    fn name(&self) -> &str {
        "canned"
    }

    fn fetch(&self, kind: SourceKind, symbol: &str) -> Result<DataFrame, FetchError> {
        let contract = SchemaContract::for_kind(kind);
        match kind {
            SourceKind::Prices => Ok(contract.validate(&Self::price_rows(symbol))?),
            _ => Ok(contract.empty_frame()?),
        }
    }
}

#[test]
fn snapshot_build_validates_rows_through_the_contract() {
    let symbols = syms(&["AAA", "BBB"]);
    let options = SnapshotOptions {
        kinds: vec![SourceKind::Prices, SourceKind::CompanyProfiles],
        backoff: Duration::from_millis(1),
        ..SnapshotOptions::default()
    };
    let (universe, reports) =
        build_universe(&CannedPrices, &symbols, &options, &SilentProgress).unwrap();

    let prices = universe.collect(SourceKind::Prices).unwrap();
    assert_eq!(prices.height(), 4);
    assert_eq!(
        prices.column("date").unwrap().dtype(),
        &DataType::Date
    );
    assert_eq!(reports[&SourceKind::Prices].summary(), "2 of 2 succeeded");

    // Profiles produced no rows but the table is present and typed.
    let profiles = universe.collect(SourceKind::CompanyProfiles).unwrap();
    assert_eq!(profiles.height(), 0);
}
