use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use tracing::trace;

use common::{Candle, CandleSource, DataError, RawCandle, Timeframe};

use crate::clock;

/// Time-ordered candles for one (instrument, timeframe) pair.
///
/// Rebuilt from raw provider output on every poll and never mutated; starts
/// are strictly increasing and unique.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeries {
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Normalize a raw batch: attach UTC instants, sort by start, and collapse
    /// duplicate starts so the last occurrence wins (a re-fetched forming
    /// candle supersedes the earlier copy).
    pub fn build(raw: &[RawCandle], timeframe: Timeframe) -> Result<Self, DataError> {
        if raw.is_empty() {
            return Err(DataError::Empty);
        }

        let mut by_start: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
        for r in raw {
            let start = Utc
                .timestamp_opt(r.start_secs, 0)
                .single()
                .ok_or(DataError::InvalidTimestamp(r.start_secs))?;
            let candle = Candle::new(start, timeframe, r.open, r.high, r.low, r.close, r.volume)?;
            if by_start.insert(start, candle).is_some() {
                trace!(start = %start, "Duplicate candle start, keeping the later copy");
            }
        }

        Ok(Self {
            timeframe,
            candles: by_start.into_values().collect(),
        })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Leading candles that are complete at `now`.
    pub fn completed(&self, now: DateTime<Utc>) -> &[Candle] {
        let n = self
            .candles
            .iter()
            .take_while(|c| clock::is_complete(c, now))
            .count();
        &self.candles[..n]
    }

    /// Candles a detector should look at for the given source.
    pub fn view(&self, source: CandleSource, now: DateTime<Utc>) -> &[Candle] {
        match source {
            CandleSource::Forming => &self.candles,
            CandleSource::Closed => self.completed(now),
        }
    }
}
