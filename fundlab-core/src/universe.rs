//! The Universe aggregate: one table per source kind, plus the structural
//! operations analysis code builds on: sort, split-by-date, concat and
//! currency normalization.
//!
//! A Universe is value-like: every operation returns a new Universe and the
//! underlying tables are lazy, so chaining operations defers work until a
//! consumer collects.
//!
//! `split` exists to prevent look-ahead leakage: `past` holds strictly
//! `date <= cutoff`, `future` strictly `date > cutoff`, and the undated
//! company-profile table is copied into both halves.

use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap};

use crate::forex::{self, RateLookup, RateSheet};
use crate::schema::{epoch, SchemaContract, SourceKind};

#[derive(Debug, thiserror::Error)]
pub enum UniverseError {
    #[error("universe has no '{}' table", .0.table_name())]
    MissingTable(SourceKind),

    #[error("company-profile table required to resolve currencies for '{}'", .0.table_name())]
    MissingProfiles(SourceKind),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Named aggregate of per-kind tables for one snapshot of securities.
#[derive(Clone, Default)]
pub struct Universe {
    tables: BTreeMap<SourceKind, LazyFrame>,
}

impl std::fmt::Debug for Universe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Universe")
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Universe {
    pub fn new() -> Universe {
        Universe::default()
    }

    /// Build a Universe from eager per-kind frames.
    pub fn from_frames(frames: impl IntoIterator<Item = (SourceKind, DataFrame)>) -> Universe {
        let tables = frames.into_iter().map(|(k, df)| (k, df.lazy())).collect();
        Universe { tables }
    }

    pub fn insert(&mut self, kind: SourceKind, table: LazyFrame) {
        self.tables.insert(kind, table);
    }

    pub fn with_table(mut self, kind: SourceKind, table: LazyFrame) -> Universe {
        self.insert(kind, table);
        self
    }

    /// Lazy handle to one table, if present.
    pub fn table(&self, kind: SourceKind) -> Option<LazyFrame> {
        self.tables.get(&kind).cloned()
    }

    /// Materialize one table.
    pub fn collect(&self, kind: SourceKind) -> Result<DataFrame, UniverseError> {
        let lf = self.table(kind).ok_or(UniverseError::MissingTable(kind))?;
        Ok(lf.collect()?)
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        self.tables.keys().copied().collect()
    }

    pub fn contains(&self, kind: SourceKind) -> bool {
        self.tables.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Every dated table sorted ascending by its date column; the profile
    /// table is left as-is. Stable, therefore idempotent.
    pub fn sorted(&self) -> Universe {
        let tables = self
            .tables
            .iter()
            .map(|(kind, lf)| {
                let lf = match kind.date_column() {
                    Some(dc) => lf.clone().sort(
                        [dc],
                        SortMultipleOptions::default().with_maintain_order(true),
                    ),
                    None => lf.clone(),
                };
                (*kind, lf)
            })
            .collect();
        Universe { tables }
    }

    /// Partition every dated table at `cutoff`: rows with `date <= cutoff`
    /// go to `past`, rows with `date > cutoff` to `future`. Company
    /// profiles are copied unchanged into both halves.
    pub fn split(&self, cutoff: NaiveDate) -> (Universe, Universe) {
        let mut past = Universe::new();
        let mut future = Universe::new();
        for (kind, lf) in &self.tables {
            match kind.date_column() {
                Some(dc) => {
                    // Datetime columns (price targets) compare at day
                    // granularity, same as the Date columns.
                    let day = col(dc).cast(DataType::Date);
                    past.insert(*kind, lf.clone().filter(day.clone().lt_eq(date_lit(cutoff))));
                    future.insert(*kind, lf.clone().filter(day.gt(date_lit(cutoff))));
                }
                None => {
                    past.insert(*kind, lf.clone());
                    future.insert(*kind, lf.clone());
                }
            }
        }
        (past, future)
    }

    /// Per-kind row-wise concatenation across universes, no deduplication.
    /// The output kind set is the union of the inputs' kind sets. Used to
    /// merge incrementally fetched batches into one logical Universe.
    pub fn concat(universes: &[Universe]) -> PolarsResult<Universe> {
        let mut merged = Universe::new();
        for kind in SourceKind::ALL {
            let parts: Vec<LazyFrame> =
                universes.iter().filter_map(|u| u.table(kind)).collect();
            match parts.len() {
                0 => {}
                1 => merged.insert(kind, parts.into_iter().next().unwrap()),
                _ => merged.insert(kind, concat(&parts, UnionArgs::default())?),
            }
        }
        Ok(merged)
    }

    /// Convert every monetary column into the reference currency using the
    /// rate nearest in time to each row's date.
    pub fn adjust_by_rates(&self, rates: &RateSheet) -> Result<Universe, UniverseError> {
        self.adjust(rates, RateLookup::NearestDate)
    }

    /// Convert every monetary column using each currency's single most
    /// recent rate, ignoring row dates.
    pub fn adjust_by_latest_rate(&self, rates: &RateSheet) -> Result<Universe, UniverseError> {
        self.adjust(rates, RateLookup::Latest)
    }

    fn adjust(&self, rates: &RateSheet, lookup: RateLookup) -> Result<Universe, UniverseError> {
        // Symbol -> reported currency, for the kinds without their own
        // currency column. Resolved lazily so a universe of
        // currency-carrying tables works without a profile table.
        let mut profile_currencies: Option<HashMap<String, String>> = None;

        let mut out = Universe::new();
        for (kind, lf) in &self.tables {
            let contract = SchemaContract::for_kind(*kind);
            let monetary = contract.monetary_columns();
            if monetary.is_empty() {
                out.insert(*kind, lf.clone());
                continue;
            }

            let df = lf.clone().collect()?;
            let currencies: Vec<Option<String>> = match kind.currency_column() {
                Some(cc) => df
                    .column(cc)?
                    .str()?
                    .iter()
                    .map(|c| c.map(str::to_string))
                    .collect(),
                None => {
                    if profile_currencies.is_none() {
                        profile_currencies = Some(self.collect_profile_currencies(*kind)?);
                    }
                    let lookup_table = profile_currencies.as_ref().unwrap();
                    df.column("symbol")?
                        .str()?
                        .iter()
                        .map(|s| s.and_then(|s| lookup_table.get(s).cloned()))
                        .collect()
                }
            };

            // Undated tables (profiles) have no per-row date to match on,
            // so they always take the latest rate.
            let (dates, lookup) = match kind.date_column() {
                Some(dc) => (Some(date_values(&df, dc)?), lookup),
                None => (None, RateLookup::Latest),
            };

            let adjusted =
                forex::adjust_frame(df, &currencies, dates.as_deref(), &monetary, rates, lookup)?;
            out.insert(*kind, adjusted.lazy());
        }
        Ok(out)
    }

    fn collect_profile_currencies(
        &self,
        wanted_by: SourceKind,
    ) -> Result<HashMap<String, String>, UniverseError> {
        let profiles = self
            .table(SourceKind::CompanyProfiles)
            .ok_or(UniverseError::MissingProfiles(wanted_by))?
            .select([col("symbol"), col("currency")])
            .collect()?;
        let symbols = profiles.column("symbol")?.str()?;
        let currencies = profiles.column("currency")?.str()?;

        let mut map = HashMap::with_capacity(profiles.height());
        for i in 0..profiles.height() {
            if let (Some(symbol), Some(currency)) = (symbols.get(i), currencies.get(i)) {
                map.insert(symbol.to_string(), currency.to_string());
            }
        }
        Ok(map)
    }
}

/// Literal expression for a calendar date.
fn date_lit(date: NaiveDate) -> Expr {
    let days = (date - epoch()).num_days() as i32;
    lit(days).cast(DataType::Date)
}

/// Per-row dates of a Date or Datetime column.
fn date_values(df: &DataFrame, column: &str) -> PolarsResult<Vec<Option<NaiveDate>>> {
    let days = df.column(column)?.cast(&DataType::Date)?;
    let days = days.date()?;
    Ok(days
        .iter()
        .map(|d| d.map(|d| epoch() + chrono::Duration::days(d as i64)))
        .collect())
}
