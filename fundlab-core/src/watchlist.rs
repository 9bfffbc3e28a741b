//! Watchlist configuration: sector-organized symbol lists.
//!
//! The set of securities to snapshot is stored as a TOML file mapping
//! sectors to their member symbols. Fetch batches are usually driven by a
//! flattened watchlist, or by one sector at a time when snapshots are
//! built incrementally and merged with `Universe::concat`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum WatchlistError {
    #[error("read watchlist file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse watchlist TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize watchlist: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// The complete watchlist configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watchlist {
    pub sectors: BTreeMap<String, Vec<String>>,
}

impl Watchlist {
    /// Load a watchlist from a TOML file.
    pub fn from_file(path: &Path) -> Result<Watchlist, WatchlistError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&content)?)
    }

    /// Parse a watchlist from a TOML string.
    pub fn from_toml(content: &str) -> Result<Watchlist, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize the watchlist to TOML.
    pub fn to_toml(&self) -> Result<String, WatchlistError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// All symbols across all sectors.
    pub fn all_symbols(&self) -> Vec<&str> {
        self.sectors
            .values()
            .flat_map(|symbols| symbols.iter().map(|s| s.as_str()))
            .collect()
    }

    /// Symbols for a specific sector.
    pub fn sector_symbols(&self, sector: &str) -> Option<&[String]> {
        self.sectors.get(sector).map(|v| v.as_slice())
    }

    pub fn sector_names(&self) -> Vec<&str> {
        self.sectors.keys().map(|s| s.as_str()).collect()
    }

    pub fn symbol_count(&self) -> usize {
        self.sectors.values().map(|v| v.len()).sum()
    }

    /// A default large-cap US watchlist with major sectors.
    pub fn default_us() -> Watchlist {
        let mut sectors = BTreeMap::new();

        sectors.insert(
            "Technology".into(),
            vec!["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "AVGO", "CRM", "ADBE", "ORCL"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        sectors.insert(
            "Healthcare".into(),
            vec!["JNJ", "UNH", "PFE", "ABBV", "MRK", "LLY", "TMO", "ABT"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        sectors.insert(
            "Finance".into(),
            vec!["JPM", "BAC", "WFC", "GS", "MS", "BLK", "SCHW", "C", "AXP", "V"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        sectors.insert(
            "Energy".into(),
            vec!["XOM", "CVX", "COP", "SLB", "EOG", "MPC", "PSX", "VLO"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        sectors.insert(
            "Consumer".into(),
            vec!["WMT", "PG", "KO", "PEP", "COST", "HD", "MCD", "NKE", "SBUX", "TGT"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        Watchlist { sectors }
    }
}
