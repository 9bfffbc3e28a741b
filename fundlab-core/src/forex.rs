//! Exchange-rate sheets and currency normalization.
//!
//! A `RateSheet` holds per-currency rate series against one reference
//! currency (EUR, matching the ECB reference sheet). Two interchangeable
//! lookups exist:
//!
//! - nearest-date: each row matches the rate closest in time to its own date
//! - latest-rate: every row of a currency uses the single most recent rate
//!
//! Both are tolerant of missing rates: an unmatched currency yields a null
//! adjusted value, never an error. Monetary columns are divided by the
//! matched rate; identifying columns are untouched and no helper columns
//! survive into the output.

use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::schema::epoch;

/// The currency every monetary column is normalized into.
pub const REFERENCE_CURRENCY: &str = "eur";

/// Which rate a row is divided by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLookup {
    /// Rate whose date is closest to the row's date; exact match wins,
    /// an equidistant tie resolves to the earlier rate.
    NearestDate,
    /// The most recent rate in the sheet, regardless of the row's date.
    Latest,
}

#[derive(Debug, thiserror::Error)]
pub enum ForexError {
    #[error("rate sheet missing column '{0}'")]
    MissingColumn(&'static str),

    #[error("unparseable date '{0}' in rate sheet")]
    BadDate(String),

    #[error("rate sheet csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("rate sheet io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Time series of exchange rates against the reference currency,
/// keyed by lower-cased currency code.
#[derive(Debug, Clone, Default)]
pub struct RateSheet {
    by_currency: HashMap<String, Vec<(NaiveDate, f64)>>,
}

impl RateSheet {
    /// Build a sheet from (date, currency, rate) rows. Currency codes are
    /// case-insensitive. The reference currency gets a synthetic 1.0 rate
    /// spanning the sheet's full range if it has no explicit one.
    pub fn from_rows<C>(rows: impl IntoIterator<Item = (NaiveDate, C, f64)>) -> RateSheet
    where
        C: AsRef<str>,
    {
        let mut by_currency: HashMap<String, Vec<(NaiveDate, f64)>> = HashMap::new();
        for (date, currency, rate) in rows {
            by_currency
                .entry(currency.as_ref().to_lowercase())
                .or_default()
                .push((date, rate));
        }
        for series in by_currency.values_mut() {
            series.sort_by_key(|(d, _)| *d);
        }
        let mut sheet = RateSheet { by_currency };
        sheet.ensure_reference();
        sheet
    }

    /// Build a sheet from a long-format frame with `date`, `currency` and
    /// `rate` columns.
    pub fn from_frame(df: &DataFrame) -> Result<RateSheet, ForexError> {
        let dates = df
            .column("date")
            .map_err(|_| ForexError::MissingColumn("date"))?
            .date()?;
        let currencies = df
            .column("currency")
            .map_err(|_| ForexError::MissingColumn("currency"))?
            .str()?;
        let rates = df
            .column("rate")
            .map_err(|_| ForexError::MissingColumn("rate"))?
            .cast(&DataType::Float64)?;
        let rates = rates.f64()?;

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let (Some(days), Some(currency), Some(rate)) =
                (dates.get(i), currencies.get(i), rates.get(i))
            else {
                continue;
            };
            rows.push((epoch() + chrono::Duration::days(days as i64), currency, rate));
        }
        Ok(RateSheet::from_rows(rows))
    }

    /// Load the wide ECB reference-rate CSV: a `Date` column followed by one
    /// column per currency, with "N/A" holes on non-quoted days.
    pub fn load_ecb_csv(path: &Path) -> Result<RateSheet, ForexError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let raw_date = record.get(0).unwrap_or_default().trim();
            let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
                .map_err(|_| ForexError::BadDate(raw_date.to_string()))?;

            for (idx, currency) in headers.iter().enumerate().skip(1) {
                let Some(cell) = record.get(idx) else { continue };
                let cell = cell.trim();
                if cell.is_empty() || cell.eq_ignore_ascii_case("n/a") {
                    continue;
                }
                if let Ok(rate) = cell.parse::<f64>() {
                    rows.push((date, currency.to_string(), rate));
                }
            }
        }
        Ok(RateSheet::from_rows(rows))
    }

    /// Make sure the reference currency spans the sheet's full date range
    /// with a rate of 1.0, so reference-denominated rows pass through
    /// normalization unchanged.
    fn ensure_reference(&mut self) {
        if self.by_currency.contains_key(REFERENCE_CURRENCY) {
            return;
        }
        let Some((min, max)) = self.date_range() else { return };
        let mut series = vec![(min, 1.0)];
        if max > min {
            series.push((max, 1.0));
        }
        self.by_currency.insert(REFERENCE_CURRENCY.to_string(), series);
    }

    pub fn is_empty(&self) -> bool {
        self.by_currency.is_empty()
    }

    pub fn currencies(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.by_currency.keys().map(String::as_str).collect();
        out.sort_unstable();
        out
    }

    /// Full date range covered by any currency.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let mut range: Option<(NaiveDate, NaiveDate)> = None;
        for series in self.by_currency.values() {
            for (date, _) in series {
                range = Some(match range {
                    None => (*date, *date),
                    Some((lo, hi)) => (lo.min(*date), hi.max(*date)),
                });
            }
        }
        range
    }

    /// Rate for `currency` closest in time to `date`. Exact-date matches
    /// win outright; an equidistant tie resolves to the earlier rate.
    pub fn nearest(&self, currency: &str, date: NaiveDate) -> Option<f64> {
        let series = self.by_currency.get(&currency.to_lowercase())?;
        if series.is_empty() {
            return None;
        }
        let idx = series.partition_point(|(d, _)| *d < date);
        let after = series.get(idx);
        let before = idx.checked_sub(1).and_then(|i| series.get(i));
        match (before, after) {
            (None, Some((_, rate))) => Some(*rate),
            (Some((_, rate)), None) => Some(*rate),
            (Some((d0, r0)), Some((d1, r1))) => {
                // d0 < date <= d1
                if (date - *d0) < (*d1 - date) {
                    Some(*r0)
                } else if (*d1 - date) < (date - *d0) {
                    Some(*r1)
                } else {
                    Some(*r0)
                }
            }
            (None, None) => None,
        }
    }

    /// Most recent rate for `currency` anywhere in the sheet.
    pub fn latest(&self, currency: &str) -> Option<f64> {
        self.by_currency
            .get(&currency.to_lowercase())?
            .last()
            .map(|(_, rate)| *rate)
    }
}

/// Divide the frame's monetary columns by each row's matched rate.
///
/// `currencies` and `dates` are per-row resolutions supplied by the caller
/// (a table either carries its own currency column or joins the profile
/// table on symbol). A missing currency, date or rate yields a null
/// adjusted value for that row.
pub(crate) fn adjust_frame(
    mut df: DataFrame,
    currencies: &[Option<String>],
    dates: Option<&[Option<NaiveDate>]>,
    monetary: &[&str],
    rates: &RateSheet,
    lookup: RateLookup,
) -> PolarsResult<DataFrame> {
    let divisors: Vec<Option<f64>> = (0..df.height())
        .map(|i| {
            let currency = currencies.get(i).and_then(|c| c.as_deref())?;
            match lookup {
                RateLookup::Latest => rates.latest(currency),
                RateLookup::NearestDate => {
                    let date = dates.and_then(|d| d.get(i).copied().flatten())?;
                    rates.nearest(currency, date)
                }
            }
        })
        .collect();

    for name in monetary {
        if df.column(name).is_err() {
            continue;
        }
        let values = df.column(name)?.cast(&DataType::Float64)?;
        let values = values.f64()?;
        let adjusted: Vec<Option<f64>> = values
            .iter()
            .zip(&divisors)
            .map(|(v, rate)| match (v, rate) {
                (Some(v), Some(rate)) => Some(v / rate),
                _ => None,
            })
            .collect();
        df.with_column(Column::new((*name).into(), adjusted))?;
    }
    Ok(df)
}
