//! FundLab core: multi-table financial universes.
//!
//! This crate contains the dataset plumbing shared by every consumer:
//! - Schema contracts: per-source-kind field catalogs with typed validation
//! - The `Universe` aggregate and its structural operations
//!   (sort, split-by-date, concat, currency normalization)
//! - Parquet snapshot store with lazy access
//! - Exchange-rate sheets and the nearest-date / latest-rate normalizers
//! - Watchlist configuration (sector-organized ticker lists)
//!
//! Fetching lives in `fundlab-fetch`; this crate never touches the network.

pub mod forex;
pub mod schema;
pub mod store;
pub mod universe;
pub mod watchlist;

pub use forex::{RateLookup, RateSheet};
pub use schema::{SchemaContract, SchemaError, SemanticType, SourceKind};
pub use store::{SnapshotMeta, SnapshotStore, StoreError};
pub use universe::{Universe, UniverseError};
pub use watchlist::Watchlist;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: the types handed across the fetch worker
    /// threads must be Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<schema::SourceKind>();
        require_sync::<schema::SourceKind>();
        require_send::<schema::SchemaContract>();
        require_sync::<schema::SchemaContract>();
        require_send::<schema::SchemaError>();
        require_sync::<schema::SchemaError>();
        require_send::<forex::RateSheet>();
        require_sync::<forex::RateSheet>();
        require_send::<universe::Universe>();
        require_send::<store::SnapshotMeta>();
        require_sync::<store::SnapshotMeta>();
    }
}
