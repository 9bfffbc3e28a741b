//! Snapshot builder: one scheduler batch per source kind, assembled into
//! a Universe.
//!
//! A snapshot fetches every requested source kind for every watchlist
//! symbol. Each kind runs as its own batch so a kind-wide outage (say,
//! ratings) cannot poison the statements. A kind where nothing succeeded
//! still lands in the universe as an empty, correctly typed table.

use std::collections::BTreeMap;
use std::time::Duration;

use polars::prelude::IntoLazy;
use thiserror::Error;

use fundlab_core::schema::{SchemaContract, SchemaError, SourceKind};
use fundlab_core::universe::Universe;

use crate::provider::{EntityFetcher, FetchProgress};
use crate::retry::RetryPolicy;
use crate::scheduler::{BatchFetchError, FailurePolicy, FetchReport, FetchScheduler};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Fetch(#[from] BatchFetchError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Knobs for one snapshot run.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Source kinds to fetch. Defaults to the core set; ratings and
    /// price targets are opt-in.
    pub kinds: Vec<SourceKind>,
    pub width: usize,
    pub policy: FailurePolicy,
    pub backoff: Duration,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        SnapshotOptions {
            kinds: SourceKind::CORE.to_vec(),
            width: 8,
            policy: FailurePolicy::Tolerant,
            backoff: Duration::from_secs(10),
        }
    }
}

impl SnapshotOptions {
    pub fn all_kinds() -> Self {
        SnapshotOptions {
            kinds: SourceKind::ALL.to_vec(),
            ..Self::default()
        }
    }
}

/// Fetch every (kind, symbol) pair and assemble the results.
///
/// Returns the universe plus a per-kind report of what succeeded. Under
/// the strict policy the first permanent failure aborts the whole
/// snapshot; under the tolerant policy failed symbols are simply absent
/// from the affected tables.
pub fn build_universe(
    fetcher: &dyn EntityFetcher,
    symbols: &[String],
    options: &SnapshotOptions,
    progress: &dyn FetchProgress,
) -> Result<(Universe, BTreeMap<SourceKind, FetchReport>), SnapshotError> {
    let scheduler = FetchScheduler::new()
        .with_width(options.width)
        .with_policy(options.policy)
        .with_retry(RetryPolicy::new(options.backoff));

    let mut universe = Universe::new();
    let mut reports = BTreeMap::new();

    for &kind in &options.kinds {
        let batch = scheduler.fetch_all(symbols, progress, |symbol| fetcher.fetch(kind, symbol))?;
        let frame = match batch.frame {
            Some(frame) => frame,
            None => SchemaContract::for_kind(kind).empty_frame()?,
        };
        universe.insert(kind, frame.lazy());
        reports.insert(kind, batch.report);
    }

    Ok((universe, reports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FetchError, SilentProgress};
    use polars::prelude::DataFrame;

    struct EmptyFetcher;

    impl EntityFetcher for EmptyFetcher {
        fn name(&self) -> &str {
            "empty"
        }

        fn fetch(&self, kind: SourceKind, _symbol: &str) -> Result<DataFrame, FetchError> {
            Ok(SchemaContract::for_kind(kind).empty_frame()?)
        }
    }

    #[test]
    fn default_options_cover_core_kinds() {
        let options = SnapshotOptions::default();
        assert_eq!(options.kinds, SourceKind::CORE.to_vec());
        assert!(!options.kinds.contains(&SourceKind::Ratings));
        assert_eq!(options.width, 8);
    }

    #[test]
    fn snapshot_contains_every_requested_kind() {
        let symbols = vec!["AAA".to_string()];
        let mut options = SnapshotOptions::default();
        options.backoff = Duration::from_millis(1);
        let (universe, reports) =
            build_universe(&EmptyFetcher, &symbols, &options, &SilentProgress).unwrap();

        for kind in SourceKind::CORE {
            assert!(universe.contains(kind), "{:?} missing", kind);
            assert_eq!(reports[&kind].succeeded, 1);
        }
        assert!(!universe.contains(SourceKind::Ratings));
    }

    #[test]
    fn empty_batch_yields_typed_empty_table() {
        let options = SnapshotOptions {
            kinds: vec![SourceKind::Prices],
            backoff: Duration::from_millis(1),
            ..SnapshotOptions::default()
        };
        let (universe, _) =
            build_universe(&EmptyFetcher, &[], &options, &SilentProgress).unwrap();

        let df = universe.collect(SourceKind::Prices).unwrap();
        assert_eq!(df.height(), 0);
        let expected = SchemaContract::for_kind(SourceKind::Prices);
        for name in expected.field_names() {
            assert!(df.schema().contains(name));
        }
    }
}
