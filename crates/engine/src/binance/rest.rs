use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use common::{MarketData, ProviderError, RawCandle, Timeframe};

pub const BASE_URL: &str = "https://api.binance.com";

/// Binance's upper bound on `limit` for `/api/v3/klines`.
const MAX_KLINES: usize = 1000;

/// Binance error code for "too many requests".
const TOO_MANY_REQUESTS_CODE: i64 = -1003;

/// How a timeframe is requested from Binance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlineRoute {
    /// Binance serves this interval directly.
    Native(&'static str),
    /// Fetch `1h` klines and aggregate `hours` of them per candle.
    Aggregated { hours: u32 },
}

impl KlineRoute {
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        match timeframe {
            Timeframe::Daily => KlineRoute::Native("1d"),
            Timeframe::Hours(1) => KlineRoute::Native("1h"),
            Timeframe::Hours(2) => KlineRoute::Native("2h"),
            Timeframe::Hours(4) => KlineRoute::Native("4h"),
            Timeframe::Hours(6) => KlineRoute::Native("6h"),
            Timeframe::Hours(8) => KlineRoute::Native("8h"),
            Timeframe::Hours(12) => KlineRoute::Native("12h"),
            Timeframe::Hours(hours) => KlineRoute::Aggregated { hours },
        }
    }
}

/// Public market-data REST client for Binance spot. No credentials needed.
pub struct BinanceClient {
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            http,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        check_status(resp).await
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Http(e.to_string())
        }
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<RawCandle>, ProviderError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.min(MAX_KLINES).to_string()),
        ];
        debug!(symbol, interval, limit, "Fetching klines from Binance");
        let resp = self.get("/api/v3/klines", &query).await?;
        let rows: Vec<Vec<serde_json::Value>> = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn fetch_candles(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        min_candles: usize,
    ) -> Result<Vec<RawCandle>, ProviderError> {
        match KlineRoute::for_timeframe(timeframe) {
            KlineRoute::Native(interval) => self.klines(instrument, interval, min_candles).await,
            KlineRoute::Aggregated { hours } => {
                // One extra bucket covers a leading partial bucket that gets dropped.
                let limit = (min_candles + 1) * hours as usize;
                let hourly = self.klines(instrument, "1h", limit).await?;
                Ok(aggregate_hourly(&hourly, hours))
            }
        }
    }

    async fn current_price(&self, instrument: &str) -> Result<f64, ProviderError> {
        let resp = self
            .get("/api/v3/ticker/price", &[("symbol", instrument.to_string())])
            .await?;
        let ticker: PriceTicker = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        ticker
            .price
            .parse::<f64>()
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

/// Map non-success responses to typed errors; rate limiting gets its own tag.
async fn check_status(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ProviderError::RateLimited { retry_after });
    }

    let body = resp
        .text()
        .await
        .map_err(|e| ProviderError::Http(e.to_string()))?;
    if let Ok(err) = serde_json::from_str::<ApiError>(&body) {
        if err.code == TOO_MANY_REQUESTS_CODE {
            return Err(ProviderError::RateLimited { retry_after: None });
        }
    }
    Err(ProviderError::Exchange(format!("HTTP {status}: {body}")))
}

/// `[open_time_ms, "open", "high", "low", "close", "volume", close_time_ms, ...]`
fn parse_kline(row: &[serde_json::Value]) -> Result<RawCandle, ProviderError> {
    let open_time_ms = row
        .first()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ProviderError::Decode(format!("kline without open time: {row:?}")))?;

    Ok(RawCandle {
        start_secs: open_time_ms.div_euclid(1000),
        open: number_at(row, 1)?,
        high: number_at(row, 2)?,
        low: number_at(row, 3)?,
        close: number_at(row, 4)?,
        volume: number_at(row, 5)?,
    })
}

/// Binance sends prices as strings; accept plain numbers too.
fn number_at(row: &[serde_json::Value], idx: usize) -> Result<f64, ProviderError> {
    let value = row
        .get(idx)
        .ok_or_else(|| ProviderError::Decode(format!("kline missing field {idx}")))?;
    match value {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| ProviderError::Decode(format!("field {idx} '{s}': {e}"))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ProviderError::Decode(format!("field {idx} not representable"))),
        other => Err(ProviderError::Decode(format!("field {idx} has type {other}"))),
    }
}

/// Fold hourly candles into epoch-aligned `hours`-hour candles.
///
/// A leading bucket that does not start on its boundary is incomplete history
/// and is dropped; the trailing bucket may be partial because it is still
/// forming.
pub fn aggregate_hourly(hourly: &[RawCandle], hours: u32) -> Vec<RawCandle> {
    let period = i64::from(hours.max(1)) * 3600;

    let mut by_start: BTreeMap<i64, RawCandle> = BTreeMap::new();
    for c in hourly {
        by_start.insert(c.start_secs, *c);
    }

    let mut buckets: Vec<(i64, RawCandle)> = Vec::new();
    for c in by_start.into_values() {
        let bucket = c.start_secs - c.start_secs.rem_euclid(period);
        match buckets.last_mut() {
            Some((b, agg)) if *b == bucket => {
                agg.high = agg.high.max(c.high);
                agg.low = agg.low.min(c.low);
                agg.close = c.close;
                agg.volume += c.volume;
            }
            _ => buckets.push((bucket, c)),
        }
    }

    if let Some((bucket, first)) = buckets.first() {
        if first.start_secs != *bucket {
            buckets.remove(0);
        }
    }

    buckets
        .into_iter()
        .map(|(bucket, agg)| RawCandle {
            start_secs: bucket,
            ..agg
        })
        .collect()
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PriceTicker {
    price: String,
}

#[derive(Deserialize)]
struct ApiError {
    code: i64,
}
