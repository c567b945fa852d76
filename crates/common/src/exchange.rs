use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{DeliveryError, ProviderError, RawCandle, Timeframe};

/// Abstraction over the market-data provider.
///
/// `BinanceClient` in `crates/engine` implements this for production. The
/// trailing candle may still be forming; callers re-derive completeness from
/// candle boundaries instead of trusting any provider flag.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Fetch at least `min_candles` recent candles, oldest first where possible.
    async fn fetch_candles(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        min_candles: usize,
    ) -> Result<Vec<RawCandle>, ProviderError>;

    /// Get the latest traded price for an instrument.
    async fn current_price(&self, instrument: &str) -> Result<f64, ProviderError>;
}

/// Delivery channel for formatted alert text.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), DeliveryError>;
}

/// Source of wall-clock time and sleeping for the poll loop.
#[async_trait]
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// `Utc::now` plus `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
