use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A candle batch that cannot be evaluated. Aborts one key for one cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("candle batch is empty")]
    Empty,

    #[error("candle at {start} has invalid {field}: {value}")]
    InvalidPrice {
        field: &'static str,
        value: f64,
        start: DateTime<Utc>,
    },

    #[error("candle timestamp out of range: {0}")]
    InvalidTimestamp(i64),

    #[error("need {needed} candles, got {got}")]
    InsufficientCandles { needed: usize, got: usize },
}

/// Failure reported by the market-data collaborator.
///
/// Rate limiting is classified where the response is decoded, so callers
/// branch on `RateLimited` instead of inspecting error text.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

/// Notification transport failure. Alerts are fire-and-log; nothing retries these.
#[derive(Debug, Clone, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Startup failures: unreadable or invalid configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
