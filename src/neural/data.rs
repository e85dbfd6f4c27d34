// projeto: lstmpetr4
// file: src/neural/data.rs
// Daily close price series and the market data providers that produce them

use chrono::{DateTime, NaiveDate, NaiveTime};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::neural::utils::TrainingError;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request for {ticker} failed: {source}")]
    Http {
        ticker: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Provider answered {status} for {ticker}")]
    Status { ticker: String, status: u16 },

    #[error("Ticker not found: {0}")]
    TickerNotFound(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Daily closing prices for one ticker, in date order once cleaned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub ticker: String,
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<String>, points: Vec<PricePoint>) -> Self {
        PriceSeries { ticker: ticker.into(), points }
    }

    /// Builds a series of consecutive calendar days starting at `start`.
    pub fn from_closes(ticker: impl Into<String>, start: NaiveDate, closes: &[f64]) -> Self {
        let points = start
            .iter_days()
            .zip(closes.iter())
            .map(|(date, &close)| PricePoint { date, close })
            .collect();
        PriceSeries::new(ticker, points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    /// Drops non-finite or non-positive closes and requires strictly increasing dates.
    pub fn cleaned(self) -> Result<Self, TrainingError> {
        let total = self.points.len();
        let points: Vec<PricePoint> = self.points
            .into_iter()
            .filter(|p| p.close.is_finite() && p.close > 0.0)
            .collect();

        let dropped = total - points.len();
        if dropped > 0 {
            warn!("⚠️ [Data] Dropped {} invalid closes for {}", dropped, self.ticker);
        }

        if let Some(pair) = points.windows(2).find(|w| w[1].date <= w[0].date) {
            return Err(TrainingError::DataProcessing(format!(
                "Dates for {} are not strictly increasing: {} followed by {}",
                self.ticker, pair[0].date, pair[1].date
            )));
        }

        Ok(PriceSeries { ticker: self.ticker, points })
    }
}

/// Source of daily closes. `end` is exclusive.
pub trait MarketDataProvider: Send + Sync {
    fn fetch_closes(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries, ProviderError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooChartError>,
}

#[derive(Debug, Deserialize)]
struct YahooChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    meta: Option<YahooMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
    adjclose: Option<Vec<YahooAdjClose>>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    close: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct YahooAdjClose {
    adjclose: Option<Vec<Option<f64>>>,
}

/// Yahoo Finance chart API client. Prefers adjusted closes when present.
pub struct YahooFinanceProvider {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl YahooFinanceProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://query1.finance.yahoo.com";

    /// Must be called outside of an async runtime.
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url(Self::DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("Mozilla/5.0")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| ProviderError::Http { ticker: String::new(), source })?;

        Ok(YahooFinanceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn chart_url(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> String {
        let period1 = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let period2 = end.and_time(NaiveTime::MIN).and_utc().timestamp();
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d&events=history",
            self.base_url, ticker, period1, period2
        )
    }
}

impl MarketDataProvider for YahooFinanceProvider {
    fn fetch_closes(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries, ProviderError> {
        let url = self.chart_url(ticker, start, end);
        info!("📥 [Yahoo] Fetching {} from {} to {}", ticker, start, end);
        debug!("GET {}", url);

        let response = self.client
            .get(&url)
            .send()
            .map_err(|source| ProviderError::Http { ticker: ticker.to_string(), source })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::TickerNotFound(ticker.to_string()));
        }
        if !status.is_success() {
            return Err(ProviderError::Status { ticker: ticker.to_string(), status: status.as_u16() });
        }

        let body = response
            .text()
            .map_err(|source| ProviderError::Http { ticker: ticker.to_string(), source })?;
        let series = parse_chart(ticker, &body)?;

        info!("✅ [Yahoo] {} closes received for {}", series.len(), ticker);
        Ok(series)
    }

    fn name(&self) -> &str {
        "yahoo"
    }
}

fn parse_chart(ticker: &str, body: &str) -> Result<PriceSeries, ProviderError> {
    let response: YahooChartResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;

    if let Some(error) = response.chart.error {
        if error.code.eq_ignore_ascii_case("not found") {
            return Err(ProviderError::TickerNotFound(ticker.to_string()));
        }
        return Err(ProviderError::Malformed(format!("{}: {}", error.code, error.description)));
    }

    let result = response.chart.result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| ProviderError::TickerNotFound(ticker.to_string()))?;

    // no trading days in range
    let Some(timestamps) = result.timestamp else {
        return Ok(PriceSeries::new(ticker, Vec::new()));
    };

    let offset = result.meta.and_then(|m| m.gmtoffset).unwrap_or(0);
    let adjusted = result.indicators.adjclose
        .and_then(|a| a.into_iter().next())
        .and_then(|a| a.adjclose);
    let closes = match adjusted {
        Some(adj) => adj,
        None => result.indicators.quote
            .into_iter()
            .next()
            .and_then(|q| q.close)
            .ok_or_else(|| ProviderError::Malformed("missing close quotes".to_string()))?,
    };

    let mut points = Vec::with_capacity(timestamps.len());
    for (ts, close) in timestamps.iter().zip(closes.iter()) {
        let Some(close) = close else {
            continue;
        };
        let date = DateTime::from_timestamp(ts + offset, 0)
            .ok_or_else(|| ProviderError::Malformed(format!("invalid timestamp {}", ts)))?
            .date_naive();
        points.push(PricePoint { date, close: *close });
    }

    Ok(PriceSeries::new(ticker, points))
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date")]
    date: NaiveDate,
    #[serde(alias = "Close")]
    close: f64,
}

/// Reads `date,close` rows from a local file. The ticker is taken on trust.
pub struct CsvProvider {
    path: PathBuf,
}

impl CsvProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        CsvProvider { path: path.as_ref().to_path_buf() }
    }
}

impl MarketDataProvider for CsvProvider {
    fn fetch_closes(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries, ProviderError> {
        info!("📥 [CSV] Loading {} from {}", ticker, self.path.display());

        let file = std::fs::File::open(&self.path)
            .map_err(|source| ProviderError::Io { path: self.path.clone(), source })?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut points = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            let row = row?;
            if row.date >= start && row.date < end {
                points.push(PricePoint { date: row.date, close: row.close });
            }
        }

        Ok(PriceSeries::new(ticker, points))
    }

    fn name(&self) -> &str {
        "csv"
    }
}

/// Serves a fixed series, filtered by the requested range.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    series: PriceSeries,
}

impl StaticProvider {
    pub fn new(series: PriceSeries) -> Self {
        StaticProvider { series }
    }
}

impl MarketDataProvider for StaticProvider {
    fn fetch_closes(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries, ProviderError> {
        if ticker != self.series.ticker {
            return Err(ProviderError::TickerNotFound(ticker.to_string()));
        }
        let points = self.series.points
            .iter()
            .filter(|p| p.date >= start && p.date < end)
            .copied()
            .collect();
        Ok(PriceSeries::new(ticker, points))
    }

    fn name(&self) -> &str {
        "static"
    }
}
