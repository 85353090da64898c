//! HTTP client for the exchange REST API.
//!
//! Provides the instrument catalog and paginated historical klines. Used
//! for initial population only; live data arrives over the stream.

use crate::catalog::{select_perpetual_usdt, ExchangeInfo};
use crate::error::{RegistryError, RegistryResult};
use chrono::Utc;
use klmon_core::{Kline, Symbol, Timeframe};
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exchange cap on rows per kline request.
pub const MAX_KLINES_PER_REQUEST: usize = 1500;

/// Source of catalog and historical data.
pub trait MarketDataSource: Send + Sync + 'static {
    /// Symbols eligible for monitoring.
    fn fetch_tradable_symbols(&self) -> impl Future<Output = RegistryResult<Vec<Symbol>>> + Send;

    /// The most recent `limit` klines of a series, oldest first.
    fn fetch_recent_klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: usize,
    ) -> impl Future<Output = RegistryResult<Vec<Kline>>> + Send;
}

/// Raw kline row: `[openTime, o, h, l, c, v, closeTime, q, n, V, Q, ignore]`.
#[derive(Debug, Deserialize)]
struct RestKlineRow(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    String,
    String,
    #[allow(dead_code)] serde_json::Value,
);

impl RestKlineRow {
    fn into_kline(self) -> RegistryResult<Kline> {
        let kline = Kline {
            open_time: self.0,
            open: parse_num(&self.1)?,
            high: parse_num(&self.2)?,
            low: parse_num(&self.3)?,
            close: parse_num(&self.4)?,
            volume: parse_num(&self.5)?,
            close_time: self.6,
            quote_volume: parse_num(&self.7)?,
            trades: self.8,
            taker_buy_base_volume: parse_num(&self.9)?,
            taker_buy_quote_volume: parse_num(&self.10)?,
        };
        kline.validate()?;
        Ok(kline)
    }
}

fn parse_num(value: &str) -> RegistryResult<f64> {
    value
        .parse()
        .map_err(|_| RegistryError::Parse(format!("not a number: {value:?}")))
}

fn parse_rows(body: &str) -> RegistryResult<Vec<Kline>> {
    let rows: Vec<RestKlineRow> =
        serde_json::from_str(body).map_err(|e| RegistryError::Parse(e.to_string()))?;
    rows.into_iter().map(RestKlineRow::into_kline).collect()
}

/// Fetch a time range page by page.
///
/// Each call to `fetch_page(start, end, limit)` returns up to `limit` rows
/// starting at `start`. The cursor advances to the last row's close time
/// plus one; the loop stops on a short page or once the cursor reaches
/// `end_ms`. The first page error is returned.
pub async fn paginate<F, Fut>(
    start_ms: i64,
    end_ms: i64,
    limit: usize,
    mut fetch_page: F,
) -> RegistryResult<Vec<Kline>>
where
    F: FnMut(i64, i64, usize) -> Fut,
    Fut: Future<Output = RegistryResult<Vec<Kline>>>,
{
    let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
    let mut cursor = start_ms;
    let mut klines = Vec::new();

    while cursor < end_ms {
        let page = fetch_page(cursor, end_ms, limit).await?;
        let rows = page.len();
        let Some(next) = page.last().map(|k| k.close_time + 1) else {
            break;
        };
        klines.extend(page);

        if rows < limit || next <= cursor {
            break;
        }
        cursor = next;
    }

    Ok(klines)
}

/// Client for the exchange REST API.
pub struct MarketDataClient {
    /// HTTP client.
    client: Client,
    /// REST base URL (e.g., "https://fapi.binance.com").
    base_url: String,
}

impl MarketDataClient {
    /// Create a new client.
    pub fn new(base_url: impl Into<String>) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| RegistryError::Request(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> RegistryResult<String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| RegistryError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RegistryError::Request(format!("Failed to read body: {e}")))?;
        if !status.is_success() {
            return Err(RegistryError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Fetch the instrument catalog.
    pub async fn fetch_exchange_info(&self) -> RegistryResult<ExchangeInfo> {
        let body = self.get("/fapi/v1/exchangeInfo", &[]).await?;
        serde_json::from_str(&body).map_err(|e| RegistryError::Parse(e.to_string()))
    }

    /// Fetch one page of klines.
    pub async fn fetch_klines_page(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> RegistryResult<Vec<Kline>> {
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.to_string()),
            ("limit", limit.to_string()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_ms.to_string()),
        ];
        let body = self.get("/fapi/v1/klines", &query).await?;
        let klines = parse_rows(&body)?;
        debug!(
            symbol = %symbol,
            timeframe = %timeframe,
            start_ms,
            rows = klines.len(),
            "Fetched kline page"
        );
        Ok(klines)
    }

    /// Fetch every kline in `[start_ms, end_ms]`.
    pub async fn fetch_klines_range(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> RegistryResult<Vec<Kline>> {
        paginate(start_ms, end_ms, limit, |start, end, limit| {
            self.fetch_klines_page(symbol, timeframe, start, end, limit)
        })
        .await
    }
}

impl MarketDataSource for MarketDataClient {
    async fn fetch_tradable_symbols(&self) -> RegistryResult<Vec<Symbol>> {
        let info = self.fetch_exchange_info().await?;
        let symbols = select_perpetual_usdt(&info);
        info!(
            catalog = info.symbols.len(),
            selected = symbols.len(),
            "Resolved tradable symbols"
        );
        Ok(symbols)
    }

    async fn fetch_recent_klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: usize,
    ) -> RegistryResult<Vec<Kline>> {
        let end_ms = Utc::now().timestamp_millis();
        let start_ms = end_ms - timeframe.as_millis() * limit as i64;
        let mut klines = self
            .fetch_klines_range(symbol, timeframe, start_ms, end_ms, limit)
            .await?;
        if klines.len() > limit {
            klines.drain(..klines.len() - limit);
        }
        Ok(klines)
    }
}
