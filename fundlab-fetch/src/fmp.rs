//! Financial Modeling Prep HTTP client.
//!
//! One blocking client per process, shared across the scheduler's worker
//! threads. Every response body is parsed as JSON, reshaped into raw
//! rows, and pushed through the source kind's schema contract before a
//! frame leaves this module.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use fundlab_core::schema::{RawRow, SchemaContract, SourceKind};

use crate::provider::{EntityFetcher, FetchError};

const DEFAULT_RETRY_AFTER_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum FmpConfigError {
    #[error("read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Client configuration, loadable from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FmpConfig {
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Reporting period for financial statements: "annual" or "quarter".
    #[serde(default = "default_period")]
    pub period: String,

    /// Maximum number of statements per symbol.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Inclusive start date (YYYY-MM-DD) for dated history endpoints.
    #[serde(default)]
    pub from: Option<String>,

    /// Inclusive end date (YYYY-MM-DD) for dated history endpoints.
    #[serde(default)]
    pub to: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://financialmodelingprep.com".to_string()
}

fn default_period() -> String {
    "annual".to_string()
}

fn default_limit() -> u32 {
    30
}

fn default_timeout_secs() -> u64 {
    30
}

impl FmpConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        FmpConfig {
            api_key: api_key.into(),
            base_url: default_base_url(),
            period: default_period(),
            limit: default_limit(),
            from: None,
            to: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn from_file(path: &Path) -> Result<FmpConfig, FmpConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Blocking FMP client. Cloneable and shareable across worker threads.
#[derive(Clone)]
pub struct FmpClient {
    config: FmpConfig,
    http: reqwest::blocking::Client,
}

impl FmpClient {
    pub fn new(config: FmpConfig) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build HTTP client");
        FmpClient { config, http }
    }

    /// Endpoint URL for one (kind, symbol) pair. Statements share the
    /// period/limit query; history endpoints take the optional date
    /// range; profiles take neither.
    fn endpoint_url(&self, kind: SourceKind, symbol: &str) -> String {
        let base = &self.config.base_url;
        let key = &self.config.api_key;
        match kind {
            SourceKind::IncomeStatements
            | SourceKind::BalanceSheets
            | SourceKind::CashflowStatements
            | SourceKind::KeyMetrics => {
                let path = match kind {
                    SourceKind::IncomeStatements => "income-statement",
                    SourceKind::BalanceSheets => "balance-sheet-statement",
                    SourceKind::CashflowStatements => "cash-flow-statement",
                    _ => "key-metrics",
                };
                format!(
                    "{base}/api/v3/{path}/{symbol}?period={}&limit={}&apikey={key}",
                    self.config.period, self.config.limit
                )
            }
            SourceKind::Prices => format!(
                "{base}/api/v3/historical-price-full/{symbol}?{}apikey={key}",
                self.date_range_query()
            ),
            SourceKind::MarketCaps => format!(
                "{base}/api/v3/historical-market-capitalization/{symbol}?{}apikey={key}",
                self.date_range_query()
            ),
            SourceKind::CompanyProfiles => {
                format!("{base}/api/v3/profile/{symbol}?apikey={key}")
            }
            SourceKind::Ratings => format!(
                "{base}/stable/ratings-historical?symbol={symbol}&limit={}&apikey={key}",
                self.config.limit
            ),
            SourceKind::PriceTargets => {
                format!("{base}/api/v4/price-target/?symbol={symbol}&apikey={key}")
            }
        }
    }

    fn date_range_query(&self) -> String {
        let mut query = String::new();
        if let Some(from) = &self.config.from {
            query.push_str(&format!("from={from}&"));
        }
        if let Some(to) = &self.config.to {
            query.push_str(&format!("to={to}&"));
        }
        query
    }

    fn get_json(&self, url: &str, symbol: &str) -> Result<Value, FetchError> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| FetchError::NetworkUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&response, symbol));
        }

        response
            .json::<Value>()
            .map_err(|e| FetchError::ResponseFormatChanged(e.to_string()))
    }

    /// All symbols FMP reports as actively traded.
    pub fn tradable_symbols(&self) -> Result<Vec<String>, FetchError> {
        let url = format!(
            "{}/api/v3/available-traded/list?apikey={}",
            self.config.base_url, self.config.api_key
        );
        let payload = self.get_json(&url, "available-traded")?;
        symbol_list(payload)
    }

    /// Symbols listed on one exchange, e.g. "NASDAQ".
    pub fn exchange_symbols(&self, exchange: &str) -> Result<Vec<String>, FetchError> {
        let url = format!(
            "{}/api/v3/symbol/{exchange}?apikey={}",
            self.config.base_url, self.config.api_key
        );
        let payload = self.get_json(&url, exchange)?;
        symbol_list(payload)
    }
}

impl EntityFetcher for FmpClient {
    fn name(&self) -> &str {
        "financialmodelingprep"
    }

    fn fetch(&self, kind: SourceKind, symbol: &str) -> Result<polars::prelude::DataFrame, FetchError> {
        let url = self.endpoint_url(kind, symbol);
        let payload = self.get_json(&url, symbol)?;
        let rows = rows_from_payload(kind, symbol, payload)?;
        let frame = SchemaContract::for_kind(kind).validate(&rows)?;
        Ok(frame)
    }
}

fn status_error(response: &reqwest::blocking::Response, symbol: &str) -> FetchError {
    let status = response.status();
    match status.as_u16() {
        429 => {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            FetchError::RateLimited { retry_after_secs }
        }
        401 | 403 => FetchError::AuthenticationRequired(format!("HTTP {}", status.as_u16())),
        404 => FetchError::SymbolNotFound {
            symbol: symbol.to_string(),
        },
        code => FetchError::Http {
            status: code,
            symbol: symbol.to_string(),
        },
    }
}

/// Reshape one endpoint payload into raw rows for schema validation.
///
/// Most endpoints return a flat JSON array of row objects. The price
/// history endpoint wraps its rows in a `historical` array and omits the
/// symbol from each entry, so the symbol is injected per row; a payload
/// with no `historical` key means no price history exists and maps to
/// zero rows.
pub fn rows_from_payload(
    kind: SourceKind,
    symbol: &str,
    payload: Value,
) -> Result<Vec<RawRow>, FetchError> {
    match (kind, payload) {
        (SourceKind::Prices, Value::Object(mut wrapper)) => {
            let entries = match wrapper.remove("historical") {
                Some(Value::Array(entries)) => entries,
                Some(other) => {
                    return Err(FetchError::ResponseFormatChanged(format!(
                        "expected 'historical' array, got {other}"
                    )))
                }
                None => Vec::new(),
            };
            entries
                .into_iter()
                .map(|entry| match entry {
                    Value::Object(mut row) => {
                        row.insert("symbol".to_string(), Value::String(symbol.to_string()));
                        Ok(row)
                    }
                    other => Err(FetchError::ResponseFormatChanged(format!(
                        "expected price row object, got {other}"
                    ))),
                })
                .collect()
        }
        (_, Value::Array(entries)) => entries
            .into_iter()
            .map(|entry| match entry {
                Value::Object(row) => Ok(row),
                other => Err(FetchError::ResponseFormatChanged(format!(
                    "expected row object, got {other}"
                ))),
            })
            .collect(),
        (_, other) => Err(FetchError::ResponseFormatChanged(format!(
            "expected JSON array, got {other}"
        ))),
    }
}

fn symbol_list(payload: Value) -> Result<Vec<String>, FetchError> {
    match payload {
        Value::Array(entries) => Ok(entries
            .into_iter()
            .filter_map(|entry| {
                entry
                    .get("symbol")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect()),
        other => Err(FetchError::ResponseFormatChanged(format!(
            "expected symbol list array, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> FmpClient {
        FmpClient::new(FmpConfig::new("test-key"))
    }

    #[test]
    fn statement_urls_carry_period_and_limit() {
        let url = client().endpoint_url(SourceKind::IncomeStatements, "AAPL");
        assert!(url.contains("/api/v3/income-statement/AAPL?"));
        assert!(url.contains("period=annual"));
        assert!(url.contains("limit=30"));
        assert!(url.contains("apikey=test-key"));
    }

    #[test]
    fn history_urls_carry_date_range_when_configured() {
        let mut config = FmpConfig::new("k");
        config.from = Some("2020-01-01".into());
        config.to = Some("2021-01-01".into());
        let url = FmpClient::new(config).endpoint_url(SourceKind::Prices, "MSFT");
        assert!(url.contains("/api/v3/historical-price-full/MSFT?"));
        assert!(url.contains("from=2020-01-01"));
        assert!(url.contains("to=2021-01-01"));
    }

    #[test]
    fn rating_and_target_urls_use_query_symbol() {
        let ratings = client().endpoint_url(SourceKind::Ratings, "NVDA");
        assert!(ratings.contains("/stable/ratings-historical?symbol=NVDA"));
        let targets = client().endpoint_url(SourceKind::PriceTargets, "NVDA");
        assert!(targets.contains("/api/v4/price-target/?symbol=NVDA"));
    }

    #[test]
    fn price_payload_unwraps_historical_and_injects_symbol() {
        let payload = json!({
            "symbol": "AAPL",
            "historical": [
                {"date": "2020-01-02", "close": 75.1},
                {"date": "2020-01-03", "close": 74.4},
            ]
        });
        let rows = rows_from_payload(SourceKind::Prices, "AAPL", payload).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["symbol"], json!("AAPL"));
        assert_eq!(rows[1]["close"], json!(74.4));
    }

    #[test]
    fn price_payload_without_history_is_empty() {
        let payload = json!({"symbol": "NEWCO"});
        let rows = rows_from_payload(SourceKind::Prices, "NEWCO", payload).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn flat_array_payload_passes_through() {
        let payload = json!([{"symbol": "AAPL", "date": "2023-12-31", "revenue": 1.0}]);
        let rows = rows_from_payload(SourceKind::IncomeStatements, "AAPL", payload).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn non_array_payload_is_format_drift() {
        let payload = json!({"Error Message": "Invalid API KEY"});
        let err = rows_from_payload(SourceKind::IncomeStatements, "AAPL", payload).unwrap_err();
        assert!(matches!(err, FetchError::ResponseFormatChanged(_)));
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: FmpConfig = toml::from_str(r#"api_key = "k""#).unwrap();
        assert_eq!(config.base_url, "https://financialmodelingprep.com");
        assert_eq!(config.period, "annual");
        assert_eq!(config.limit, 30);
        assert_eq!(config.timeout_secs, 30);
        assert!(config.from.is_none());
    }

    #[test]
    fn config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fmp.toml");
        std::fs::write(&path, "api_key = \"k\"\nperiod = \"quarter\"\nlimit = 8\n").unwrap();

        let config = FmpConfig::from_file(&path).unwrap();
        assert_eq!(config.api_key, "k");
        assert_eq!(config.period, "quarter");
        assert_eq!(config.limit, 8);
    }

    #[test]
    fn symbol_list_extracts_symbols() {
        let payload = json!([
            {"symbol": "AAPL", "name": "Apple"},
            {"symbol": "MSFT", "name": "Microsoft"},
            {"name": "no symbol field"},
        ]);
        assert_eq!(symbol_list(payload).unwrap(), vec!["AAPL", "MSFT"]);
    }
}
