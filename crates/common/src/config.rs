use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CandleSource, Error, Result, Timeframe};

/// Process configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_token: String,
    /// Alert recipients; also the only users allowed to issue commands.
    pub telegram_chat_ids: Vec<i64>,

    // Market data
    pub binance_base_url: Option<String>,

    // Watch list file path
    pub watch_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let telegram_chat_ids = required_env("TELEGRAM_CHAT_IDS")
            .split(',')
            .map(|s| {
                s.trim().parse::<i64>().unwrap_or_else(|_| {
                    panic!("TELEGRAM_CHAT_IDS contains non-numeric ID: '{}'", s.trim())
                })
            })
            .collect();

        Config {
            telegram_token: required_env("TELEGRAM_TOKEN"),
            telegram_chat_ids,
            binance_base_url: optional_env("BINANCE_BASE_URL"),
            watch_config_path: optional_env("WATCH_CONFIG_PATH")
                .unwrap_or_else(|| "config/watch.toml".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// One pre-close lead time and its tolerance band, both in minutes.
/// An alert may fire while `lead - tolerance <= minutes_to_close <= lead + tolerance`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PreCloseOffset {
    pub lead_minutes: u32,
    pub tolerance_minutes: u32,
}

impl PreCloseOffset {
    pub fn contains(&self, minutes_to_close: f64) -> bool {
        let lead = f64::from(self.lead_minutes);
        let tol = f64::from(self.tolerance_minutes);
        (lead - tol..=lead + tol).contains(&minutes_to_close)
    }
}

/// Watch list and alert tuning (TOML).
///
/// Example `config/watch.toml`:
/// ```toml
/// instruments = ["BTCUSDT", "ETHUSDT"]
/// timeframes = ["1h", "4h", "1d"]
/// run_lengths = [3, 4, 5]
/// cooldown_minutes = 120
///
/// [[pre_close]]
/// lead_minutes = 60
/// tolerance_minutes = 5
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    pub instruments: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub run_lengths: Vec<usize>,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
    #[serde(default = "default_pre_close")]
    pub pre_close: Vec<PreCloseOffset>,
    #[serde(default = "default_poll_interval_minutes")]
    pub poll_interval_minutes: u64,
    /// Pause between consecutive provider calls inside one cycle.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_backoff_floor_minutes")]
    pub backoff_floor_minutes: u64,
    /// Offer only the longest matching run length to the scheduler.
    #[serde(default)]
    pub report_longest_only: bool,
    #[serde(default = "default_streak_candles")]
    pub streak_candles: CandleSource,
    #[serde(default)]
    pub pre_close_candles: CandleSource,
    /// Quote the provider's live price in alerts instead of the last close.
    #[serde(default)]
    pub live_price: bool,
}

fn default_cooldown_minutes() -> u64 {
    120
}

fn default_pre_close() -> Vec<PreCloseOffset> {
    vec![
        PreCloseOffset { lead_minutes: 60, tolerance_minutes: 5 },
        PreCloseOffset { lead_minutes: 5, tolerance_minutes: 2 },
    ]
}

fn default_poll_interval_minutes() -> u64 {
    1
}

fn default_request_delay_ms() -> u64 {
    500
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_backoff_floor_minutes() -> u64 {
    15
}

fn default_streak_candles() -> CandleSource {
    CandleSource::Closed
}

impl WatchConfig {
    /// Load from a TOML file. Exits process on error.
    pub fn load(path: &str) -> Self {
        Self::from_path(path).unwrap_or_else(|e| panic!("Invalid watch config at '{path}': {e}"))
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let cfg: WatchConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instruments.is_empty() {
            return Err(Error::Config("at least one instrument is required".into()));
        }
        if self.timeframes.is_empty() {
            return Err(Error::Config("at least one timeframe is required".into()));
        }
        if self.timeframes.iter().any(|tf| tf.hours() == 0) {
            return Err(Error::Config("timeframes must be at least 1 hour".into()));
        }
        if self.run_lengths.is_empty() || self.run_lengths.contains(&0) {
            return Err(Error::Config("run_lengths must be non-empty and >= 1".into()));
        }
        if self.poll_interval_minutes == 0 {
            return Err(Error::Config("poll_interval_minutes must be >= 1".into()));
        }
        // A band narrower than the poll interval can be skipped entirely.
        for offset in &self.pre_close {
            if offset.lead_minutes == 0 || offset.tolerance_minutes >= offset.lead_minutes {
                return Err(Error::Config(format!(
                    "pre-close band {}±{} min must end before the candle closes",
                    offset.lead_minutes, offset.tolerance_minutes
                )));
            }
            if u64::from(offset.tolerance_minutes) * 2 <= self.poll_interval_minutes {
                return Err(Error::Config(format!(
                    "pre-close band {}±{} min is not wider than the {} min poll interval",
                    offset.lead_minutes, offset.tolerance_minutes, self.poll_interval_minutes
                )));
            }
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_minutes * 60)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes * 60)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn backoff_floor(&self) -> Duration {
        Duration::from_secs(self.backoff_floor_minutes * 60)
    }

    /// Candles requested per fetch: enough for the longest run plus slack.
    pub fn min_candles(&self) -> usize {
        let longest = self.run_lengths.iter().copied().max().unwrap_or(0);
        (longest + 2).max(10)
    }
}
