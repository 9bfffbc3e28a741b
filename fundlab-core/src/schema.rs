//! Schema contracts: per-source-kind field catalogs with typed validation.
//!
//! Each source kind declares an ordered list of `(field, type, required)`
//! specs. `SchemaContract::validate` turns raw JSON rows into a DataFrame
//! with exactly the declared columns: declared fields are cast to their
//! declared dtype, undeclared fields are dropped, a required field that is
//! missing or uncastable is a validation error, and an optional miss becomes
//! a null of the declared dtype.
//!
//! The same contract is re-applied at the snapshot-store boundary so that
//! legacy columns on disk never leak into consumers.

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One raw row as decoded from a provider's JSON payload.
pub type RawRow = serde_json::Map<String, Value>;

/// Semantic column types a contract can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticType {
    Str,
    Int,
    Float,
    Bool,
    Date,
    Datetime,
}

impl SemanticType {
    pub fn dtype(&self) -> DataType {
        match self {
            SemanticType::Str => DataType::String,
            SemanticType::Int => DataType::Int64,
            SemanticType::Float => DataType::Float64,
            SemanticType::Bool => DataType::Boolean,
            SemanticType::Date => DataType::Date,
            SemanticType::Datetime => DataType::Datetime(TimeUnit::Milliseconds, None),
        }
    }
}

/// Declaration of a single contract field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: SemanticType,
    pub required: bool,
    /// Monetary columns are denominated in the row's reported currency and
    /// are the ones rewritten by currency normalization.
    pub monetary: bool,
}

// Shorthand constructors for the field catalogs below.
fn key(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: SemanticType::Str, required: true, monetary: false }
}
fn date(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: SemanticType::Date, required: true, monetary: false }
}
fn day(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: SemanticType::Date, required: false, monetary: false }
}
fn stamp(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: SemanticType::Datetime, required: true, monetary: false }
}
fn text(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: SemanticType::Str, required: false, monetary: false }
}
fn int(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: SemanticType::Int, required: false, monetary: false }
}
fn flag(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: SemanticType::Bool, required: false, monetary: false }
}
fn num(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: SemanticType::Float, required: false, monetary: false }
}
fn money(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: SemanticType::Float, required: false, monetary: true }
}

/// The table kinds a Universe can carry.
///
/// `Ratings` and `PriceTargets` are optional: a snapshot without them is
/// still complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    IncomeStatements,
    BalanceSheets,
    CashflowStatements,
    KeyMetrics,
    Prices,
    MarketCaps,
    CompanyProfiles,
    Ratings,
    PriceTargets,
}

impl SourceKind {
    /// Every declared kind, in on-disk order.
    pub const ALL: [SourceKind; 9] = [
        SourceKind::IncomeStatements,
        SourceKind::BalanceSheets,
        SourceKind::CashflowStatements,
        SourceKind::KeyMetrics,
        SourceKind::Prices,
        SourceKind::MarketCaps,
        SourceKind::CompanyProfiles,
        SourceKind::Ratings,
        SourceKind::PriceTargets,
    ];

    /// The kinds every snapshot must carry.
    pub const CORE: [SourceKind; 7] = [
        SourceKind::IncomeStatements,
        SourceKind::BalanceSheets,
        SourceKind::CashflowStatements,
        SourceKind::KeyMetrics,
        SourceKind::Prices,
        SourceKind::MarketCaps,
        SourceKind::CompanyProfiles,
    ];

    /// Stable file/table name under a snapshot directory.
    pub fn table_name(&self) -> &'static str {
        match self {
            SourceKind::IncomeStatements => "income_statements",
            SourceKind::BalanceSheets => "balance_sheets",
            SourceKind::CashflowStatements => "cashflow_statements",
            SourceKind::KeyMetrics => "key_metrics",
            SourceKind::Prices => "prices",
            SourceKind::MarketCaps => "market_caps",
            SourceKind::CompanyProfiles => "company_profiles",
            SourceKind::Ratings => "ratings",
            SourceKind::PriceTargets => "price_targets",
        }
    }

    /// The date-comparable column, if the table participates in
    /// sort/split. Company profiles carry no date and are never
    /// partitioned by time.
    pub fn date_column(&self) -> Option<&'static str> {
        match self {
            SourceKind::CompanyProfiles => None,
            SourceKind::PriceTargets => Some("publishedDate"),
            _ => Some("date"),
        }
    }

    pub fn is_dated(&self) -> bool {
        self.date_column().is_some()
    }

    /// Column naming each row's reported currency, for kinds that carry
    /// one. The remaining monetary kinds resolve currency by joining the
    /// company-profile table on symbol.
    pub fn currency_column(&self) -> Option<&'static str> {
        match self {
            SourceKind::IncomeStatements
            | SourceKind::BalanceSheets
            | SourceKind::CashflowStatements => Some("reportedCurrency"),
            _ => None,
        }
    }

    /// A snapshot missing this kind is still valid.
    pub fn is_optional(&self) -> bool {
        matches!(self, SourceKind::Ratings | SourceKind::PriceTargets)
    }

    pub fn from_table_name(name: &str) -> Option<SourceKind> {
        SourceKind::ALL.iter().copied().find(|k| k.table_name() == name)
    }
}

/// Validation failures. Treated as permanent failures by the fetch side.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("required field '{field}' missing or null at row {row}")]
    RequiredFieldMissing { field: &'static str, row: usize },

    #[error("cannot cast required field '{field}' value {value} at row {row}")]
    BadCast { field: &'static str, value: String, row: usize },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Ordered, typed field catalog for one source kind.
#[derive(Debug, Clone)]
pub struct SchemaContract {
    kind: SourceKind,
    fields: Vec<FieldSpec>,
}

impl SchemaContract {
    pub fn for_kind(kind: SourceKind) -> SchemaContract {
        SchemaContract { kind, fields: field_catalog(kind) }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    pub fn monetary_columns(&self) -> Vec<&'static str> {
        self.fields.iter().filter(|f| f.monetary).map(|f| f.name).collect()
    }

    /// Cast raw rows into a DataFrame with exactly the declared columns.
    ///
    /// Zero rows are legitimate (a delisted symbol) and produce an empty
    /// frame that still carries the full schema, so row-wise aggregation
    /// across entities never sees a schema mismatch.
    pub fn validate(&self, rows: &[RawRow]) -> Result<DataFrame, SchemaError> {
        let mut columns = Vec::with_capacity(self.fields.len());
        for spec in &self.fields {
            columns.push(build_column(spec, rows)?);
        }
        Ok(DataFrame::new(columns)?)
    }

    /// The empty frame this contract validates to.
    pub fn empty_frame(&self) -> Result<DataFrame, SchemaError> {
        self.validate(&[])
    }
}

// ── Column construction ─────────────────────────────────────────────

fn build_column(spec: &FieldSpec, rows: &[RawRow]) -> Result<Column, SchemaError> {
    let name: PlSmallStr = spec.name.into();
    match spec.ty {
        SemanticType::Str => {
            let vals = gather(spec, rows, as_str)?;
            Ok(Column::new(name, vals))
        }
        SemanticType::Int => {
            let vals = gather(spec, rows, as_i64)?;
            Ok(Column::new(name, vals))
        }
        SemanticType::Float => {
            let vals = gather(spec, rows, as_f64)?;
            Ok(Column::new(name, vals))
        }
        SemanticType::Bool => {
            let vals = gather(spec, rows, as_bool)?;
            Ok(Column::new(name, vals))
        }
        SemanticType::Date => {
            let vals = gather(spec, rows, as_epoch_days)?;
            Ok(Column::new(name, vals).cast(&DataType::Date)?)
        }
        SemanticType::Datetime => {
            let vals = gather(spec, rows, as_epoch_millis)?;
            Ok(Column::new(name, vals)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
        }
    }
}

/// Extract one field from every row, applying the required/optional policy:
/// a required miss or bad cast is an error, an optional problem is a null.
fn gather<T>(
    spec: &FieldSpec,
    rows: &[RawRow],
    convert: fn(&Value) -> Option<T>,
) -> Result<Vec<Option<T>>, SchemaError> {
    let mut out = Vec::with_capacity(rows.len());
    for (row, raw) in rows.iter().enumerate() {
        let value = raw.get(spec.name).filter(|v| !v.is_null());
        match value {
            None => {
                if spec.required {
                    return Err(SchemaError::RequiredFieldMissing { field: spec.name, row });
                }
                out.push(None);
            }
            Some(v) => match convert(v) {
                Some(t) => out.push(Some(t)),
                None => {
                    if spec.required {
                        return Err(SchemaError::BadCast {
                            field: spec.name,
                            value: v.to_string(),
                            row,
                        });
                    }
                    out.push(None);
                }
            },
        }
    }
    Ok(out)
}

fn as_str(v: &Value) -> Option<String> {
    v.as_str().map(str::to_string)
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" | "True" => Some(true),
            "false" | "False" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

fn as_epoch_days(v: &Value) -> Option<i32> {
    let s = v.as_str()?;
    let d = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some((d - epoch()).num_days() as i32)
}

fn as_epoch_millis(v: &Value) -> Option<i64> {
    let s = v.as_str()?;
    let dt = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%:z"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()?;
    Some(dt.and_utc().timestamp_millis())
}

// ── Field catalogs ──────────────────────────────────────────────────
//
// These mirror the provider's payloads: identifying columns first, then the
// columns that are actually interesting for analysis. The lists are data,
// not behavior: extending one only changes what validation keeps.

fn field_catalog(kind: SourceKind) -> Vec<FieldSpec> {
    match kind {
        SourceKind::IncomeStatements => vec![
            key("symbol"),
            date("date"),
            day("fillingDate"),
            int("calendarYear"),
            key("reportedCurrency"),
            text("period"),
            money("revenue"),
            money("costOfRevenue"),
            money("grossProfit"),
            num("grossProfitRatio"),
            money("researchAndDevelopmentExpenses"),
            money("sellingGeneralAndAdministrativeExpenses"),
            money("operatingExpenses"),
            money("interestIncome"),
            money("interestExpense"),
            money("depreciationAndAmortization"),
            money("ebitda"),
            num("ebitdaratio"),
            money("operatingIncome"),
            num("operatingIncomeRatio"),
            money("incomeBeforeTax"),
            money("incomeTaxExpense"),
            money("netIncome"),
            num("netIncomeRatio"),
            money("eps"),
            money("epsdiluted"),
            num("weightedAverageShsOut"),
            num("weightedAverageShsOutDil"),
        ],
        SourceKind::BalanceSheets => vec![
            key("symbol"),
            date("date"),
            day("fillingDate"),
            int("calendarYear"),
            key("reportedCurrency"),
            text("period"),
            money("cashAndCashEquivalents"),
            money("shortTermInvestments"),
            money("netReceivables"),
            money("inventory"),
            money("totalCurrentAssets"),
            money("propertyPlantEquipmentNet"),
            money("goodwill"),
            money("intangibleAssets"),
            money("longTermInvestments"),
            money("totalNonCurrentAssets"),
            money("totalAssets"),
            money("accountPayables"),
            money("shortTermDebt"),
            money("deferredRevenue"),
            money("totalCurrentLiabilities"),
            money("longTermDebt"),
            money("totalNonCurrentLiabilities"),
            money("totalLiabilities"),
            money("retainedEarnings"),
            money("totalStockholdersEquity"),
            money("totalEquity"),
            money("totalInvestments"),
            money("totalDebt"),
            money("netDebt"),
        ],
        SourceKind::CashflowStatements => vec![
            key("symbol"),
            date("date"),
            day("fillingDate"),
            int("calendarYear"),
            key("reportedCurrency"),
            text("period"),
            money("netIncome"),
            money("depreciationAndAmortization"),
            money("deferredIncomeTax"),
            money("stockBasedCompensation"),
            money("changeInWorkingCapital"),
            money("netCashProvidedByOperatingActivities"),
            money("investmentsInPropertyPlantAndEquipment"),
            money("acquisitionsNet"),
            money("netCashUsedForInvestingActivites"),
            money("debtRepayment"),
            money("commonStockIssued"),
            money("commonStockRepurchased"),
            money("dividendsPaid"),
            money("netCashUsedProvidedByFinancingActivities"),
            money("netChangeInCash"),
            money("cashAtEndOfPeriod"),
            money("operatingCashFlow"),
            money("capitalExpenditure"),
            money("freeCashFlow"),
        ],
        SourceKind::KeyMetrics => vec![
            key("symbol"),
            date("date"),
            int("calendarYear"),
            text("period"),
            money("revenuePerShare"),
            money("netIncomePerShare"),
            money("operatingCashFlowPerShare"),
            money("freeCashFlowPerShare"),
            money("cashPerShare"),
            money("bookValuePerShare"),
            money("tangibleBookValuePerShare"),
            money("marketCap"),
            money("enterpriseValue"),
            num("peRatio"),
            num("priceToSalesRatio"),
            num("pbRatio"),
            num("evToSales"),
            num("enterpriseValueOverEBITDA"),
            num("earningsYield"),
            num("freeCashFlowYield"),
            num("debtToEquity"),
            num("currentRatio"),
            num("interestCoverage"),
            num("dividendYield"),
            num("payoutRatio"),
            num("roic"),
            num("roe"),
            money("workingCapital"),
            money("investedCapital"),
            money("grahamNumber"),
        ],
        SourceKind::Prices => vec![
            key("symbol"),
            date("date"),
            money("open"),
            money("high"),
            money("low"),
            money("close"),
            money("adjClose"),
            int("volume"),
            num("changePercent"),
            money("vwap"),
        ],
        SourceKind::MarketCaps => vec![
            key("symbol"),
            date("date"),
            money("marketCap"),
        ],
        SourceKind::CompanyProfiles => vec![
            key("symbol"),
            text("companyName"),
            key("currency"),
            text("isin"),
            text("exchangeShortName"),
            text("industry"),
            text("sector"),
            text("country"),
            money("price"),
            num("beta"),
            num("volAvg"),
            money("mktCap"),
            money("lastDiv"),
            int("fullTimeEmployees"),
            day("ipoDate"),
            flag("isEtf"),
            flag("isActivelyTrading"),
            flag("isFund"),
        ],
        SourceKind::Ratings => vec![
            key("symbol"),
            date("date"),
            text("rating"),
            int("overallScore"),
            int("discountedCashFlowScore"),
            int("returnOnEquityScore"),
            int("returnOnAssetsScore"),
            int("debtToEquityScore"),
            int("priceToEarningsScore"),
            int("priceToBookScore"),
        ],
        SourceKind::PriceTargets => vec![
            key("symbol"),
            stamp("publishedDate"),
            text("analystName"),
            text("analystCompany"),
            money("priceTarget"),
            money("adjPriceTarget"),
            money("priceWhenPosted"),
            text("newsPublisher"),
            text("newsTitle"),
            text("newsURL"),
        ],
    }
}
