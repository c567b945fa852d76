use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::DataError;

/// Candle record as returned by a market-data provider, before normalization.
/// `start_secs` is the provider-supplied open time in seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawCandle {
    pub start_secs: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Fixed candle window. Boundary math treats `Daily` as 24 hours; it only
/// differs from `Hours(24)` in how the market-data client routes the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    Hours(u32),
    Daily,
}

impl Timeframe {
    pub fn hours(&self) -> u32 {
        match self {
            Timeframe::Hours(h) => *h,
            Timeframe::Daily => 24,
        }
    }

    pub fn seconds(&self) -> i64 {
        i64::from(self.hours()) * 3600
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.hours()))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Hours(h) => write!(f, "{h}h"),
            Timeframe::Daily => write!(f, "1d"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    /// Accepts `"<n>h"` with n > 0, or `"1d"` for the daily variant.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "1d" {
            return Ok(Timeframe::Daily);
        }
        let hours = s
            .strip_suffix('h')
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| format!("invalid timeframe '{s}', expected e.g. '4h' or '1d'"))?;
        if hours == 0 {
            return Err("timeframe must be at least 1 hour".to_string());
        }
        Ok(Timeframe::Hours(hours))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

/// One OHLC aggregate over `[start, end)`. Immutable once built; `new` enforces
/// `end = start + timeframe` and strictly positive, finite prices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl Candle {
    pub fn new(
        start: DateTime<Utc>,
        timeframe: Timeframe,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, DataError> {
        for (field, value) in [("open", open), ("high", high), ("low", low), ("close", close)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(DataError::InvalidPrice { field, value, start });
            }
        }
        if !volume.is_finite() {
            return Err(DataError::InvalidPrice {
                field: "volume",
                value: volume,
                start,
            });
        }
        Ok(Self {
            start,
            end: start + timeframe.duration(),
            open,
            high,
            low,
            close,
            volume,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Bearish candle: close strictly below open.
    pub fn is_down(&self) -> bool {
        self.close < self.open
    }
}

/// Which candles a detector window is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleSource {
    /// The raw tail, including a still-open last candle.
    #[default]
    Forming,
    /// Only candles whose end has passed.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    Streak,
    PreClose,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Streak => write!(f, "streak"),
            AlertKind::PreClose => write!(f, "pre-close"),
        }
    }
}

/// Identifies one line of alert state. `discriminator` is the run length for
/// streak alerts and the lead time in minutes for pre-close alerts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub kind: AlertKind,
    pub discriminator: u32,
}

impl AlertKey {
    pub fn streak(instrument: impl Into<String>, timeframe: Timeframe, run_length: usize) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe,
            kind: AlertKind::Streak,
            discriminator: u32::try_from(run_length).unwrap_or(u32::MAX),
        }
    }

    pub fn pre_close(instrument: impl Into<String>, timeframe: Timeframe, lead_minutes: u32) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe,
            kind: AlertKind::PreClose,
            discriminator: lead_minutes,
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.instrument, self.timeframe, self.kind, self.discriminator
        )
    }
}

/// Run state of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    #[default]
    Starting,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Starting => write!(f, "starting"),
            MonitorState::Running => write!(f, "running"),
            MonitorState::Paused => write!(f, "paused"),
            MonitorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Commands sent to the monitor via its command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    Pause,
    Resume,
    Shutdown,
}

/// Snapshot published by the monitor after every cycle, read by `/status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub backoff_minutes: u64,
    pub tracked_alerts: usize,
    pub alerts_sent: u64,
}
