use chrono::{DateTime, Utc};
use tracing::debug;

use common::{AlertKey, CandleSource, PreCloseOffset, WatchConfig};
use detector::{clock, detect_window, CandleSeries, Detection};

use crate::AlertScheduler;

/// Which patterns to look for and how, derived from the watch config.
#[derive(Debug, Clone)]
pub struct EvaluationPolicy {
    pub run_lengths: Vec<usize>,
    pub pre_close: Vec<PreCloseOffset>,
    pub report_longest_only: bool,
    pub streak_candles: CandleSource,
    pub pre_close_candles: CandleSource,
}

impl From<&WatchConfig> for EvaluationPolicy {
    fn from(cfg: &WatchConfig) -> Self {
        Self {
            run_lengths: cfg.run_lengths.clone(),
            pre_close: cfg.pre_close.clone(),
            report_longest_only: cfg.report_longest_only,
            streak_candles: cfg.streak_candles,
            pre_close_candles: cfg.pre_close_candles,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertBody {
    Streak { detection: Detection },
    PreClose { lead_minutes: u32, target_end: DateTime<Utc> },
}

/// A decided, ready-to-send notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub key: AlertKey,
    pub body: AlertBody,
    /// Price quoted in the message: last close unless replaced by a live quote.
    pub price: f64,
    pub evaluated_at: DateTime<Utc>,
}

impl Alert {
    pub fn render(&self) -> String {
        crate::message::render(self)
    }
}

/// Run both state machines for one (instrument, timeframe) series.
///
/// Reads and mutates scheduler state for this pair only; the returned alerts
/// are already recorded as sent.
pub fn evaluate(
    scheduler: &mut AlertScheduler,
    policy: &EvaluationPolicy,
    instrument: &str,
    series: &CandleSeries,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = evaluate_streaks(scheduler, policy, instrument, series, now);
    alerts.extend(evaluate_pre_close(scheduler, policy, instrument, series, now));
    alerts
}

fn evaluate_streaks(
    scheduler: &mut AlertScheduler,
    policy: &EvaluationPolicy,
    instrument: &str,
    series: &CandleSeries,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let timeframe = series.timeframe();
    let candles = series.view(policy.streak_candles, now);

    let Some(last) = candles.last() else {
        debug!(instrument, timeframe = %timeframe, "No candles to check for streaks");
        return Vec::new();
    };
    let last_complete = clock::is_complete(last, now);

    let mut matches: Vec<Detection> = policy
        .run_lengths
        .iter()
        .filter_map(|&k| match detect_window(candles, k) {
            Ok(d) => Some(d),
            Err(e) => {
                debug!(instrument, timeframe = %timeframe, run_length = k, error = %e, "Skipping run length");
                None
            }
        })
        .filter(|d| d.matched)
        .collect();

    if policy.report_longest_only {
        if let Some(longest) = matches.iter().copied().max_by_key(|d| d.run_length) {
            matches = vec![longest];
        }
    }

    matches
        .into_iter()
        .filter_map(|detection| {
            let key = AlertKey::streak(instrument, timeframe, detection.run_length);
            scheduler
                .offer_streak(&key, &detection, last_complete, now)
                .then(|| Alert {
                    key,
                    body: AlertBody::Streak { detection },
                    price: detection.end_price,
                    evaluated_at: now,
                })
        })
        .collect()
}

fn evaluate_pre_close(
    scheduler: &mut AlertScheduler,
    policy: &EvaluationPolicy,
    instrument: &str,
    series: &CandleSeries,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let timeframe = series.timeframe();
    let candles = series.view(policy.pre_close_candles, now);

    // Exactly the last two candles, even when a longer run is visible.
    let Ok(pair) = detect_window(candles, 2) else {
        return Vec::new();
    };
    if !pair.matched {
        return Vec::new();
    }

    let target_end = clock::next_candle_end(now, timeframe);
    debug!(
        instrument,
        timeframe = %timeframe,
        target_end = %target_end,
        "Two bearish candles ahead of close"
    );

    policy
        .pre_close
        .iter()
        .filter_map(|offset| {
            let key = AlertKey::pre_close(instrument, timeframe, offset.lead_minutes);
            scheduler
                .offer_pre_close(&key, offset, target_end, now)
                .then(|| Alert {
                    key,
                    body: AlertBody::PreClose {
                        lead_minutes: offset.lead_minutes,
                        target_end,
                    },
                    price: pair.end_price,
                    evaluated_at: now,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};
    use common::{AlertKind, RawCandle, Timeframe};

    use super::*;

    const H: i64 = 3600;

    fn policy() -> EvaluationPolicy {
        EvaluationPolicy {
            run_lengths: vec![3, 4, 5],
            pre_close: vec![
                PreCloseOffset { lead_minutes: 60, tolerance_minutes: 5 },
                PreCloseOffset { lead_minutes: 5, tolerance_minutes: 2 },
            ],
            report_longest_only: false,
            streak_candles: CandleSource::Forming,
            pre_close_candles: CandleSource::Forming,
        }
    }

    /// Hourly candles starting at hour `first_hour`; `true` marks a bearish candle.
    fn series(first_hour: i64, pattern: &[bool]) -> CandleSeries {
        let raw: Vec<RawCandle> = pattern
            .iter()
            .enumerate()
            .map(|(i, &down)| {
                let (open, close) = if down { (100.0, 95.0) } else { (95.0, 100.0) };
                RawCandle {
                    start_secs: (first_hour + i as i64) * H,
                    open,
                    high: 101.0,
                    low: 94.0,
                    close,
                    volume: 1.0,
                }
            })
            .collect();
        CandleSeries::build(&raw, Timeframe::Hours(1)).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn scheduler() -> AlertScheduler {
        AlertScheduler::new(Duration::from_secs(7200))
    }

    fn streak_lengths(alerts: &[Alert]) -> Vec<u32> {
        alerts
            .iter()
            .filter(|a| a.key.kind == AlertKind::Streak)
            .map(|a| a.key.discriminator)
            .collect()
    }

    #[test]
    fn completed_streak_fires_each_matching_run_length() {
        // Hours 100..104, bullish then four bearish, all closed by 105:10.
        let s = series(100, &[false, true, true, true, true]);
        let mut sched = scheduler();
        let alerts = evaluate(&mut sched, &policy(), "BTCUSDT", &s, at(105 * H + 600));
        assert_eq!(streak_lengths(&alerts), vec![3, 4]);
    }

    #[test]
    fn longest_only_reports_a_single_run() {
        let s = series(100, &[true, true, true, true, true]);
        let mut sched = scheduler();
        let p = EvaluationPolicy { report_longest_only: true, ..policy() };
        let alerts = evaluate(&mut sched, &p, "BTCUSDT", &s, at(105 * H + 600));
        assert_eq!(streak_lengths(&alerts), vec![5]);
    }

    #[test]
    fn forming_last_candle_blocks_confirmation() {
        let s = series(100, &[true, true, true]);
        let mut sched = scheduler();
        // Candle 102 closes at 103:00.
        let alerts = evaluate(&mut sched, &policy(), "BTCUSDT", &s, at(102 * H + 1800));
        assert!(streak_lengths(&alerts).is_empty());
        assert!(sched.state(&AlertKey::streak("BTCUSDT", Timeframe::Hours(1), 3)).is_none());
    }

    #[test]
    fn closed_source_confirms_run_behind_forming_candle() {
        // 100..102 bearish and closed, 103 forming and bullish.
        let s = series(100, &[true, true, true, false]);
        let mut sched = scheduler();
        let p = EvaluationPolicy { streak_candles: CandleSource::Closed, ..policy() };
        let alerts = evaluate(&mut sched, &p, "BTCUSDT", &s, at(103 * H + 600));
        assert_eq!(streak_lengths(&alerts), vec![3]);
    }

    #[test]
    fn repeated_evaluation_inside_cooldown_is_silent() {
        let s = series(100, &[true, true, true]);
        let mut sched = scheduler();
        let now = at(103 * H + 60);
        assert_eq!(streak_lengths(&evaluate(&mut sched, &policy(), "X", &s, now)), vec![3]);
        let later = now + TimeDelta::minutes(5);
        assert!(streak_lengths(&evaluate(&mut sched, &policy(), "X", &s, later)).is_empty());
    }

    #[test]
    fn pre_close_fires_once_then_rearms_on_next_candle() {
        let mut sched = scheduler();
        let p = EvaluationPolicy { run_lengths: vec![3], ..policy() };

        // Now is inside candle 101 (forming); next candle closes at 103:00.
        // Polls at 101:55..101:59 are 65..61 minutes out, inside the 60±5 band.
        let s = series(100, &[true, true]);
        let mut fired = 0;
        for minute in 55..60 {
            let now = at(101 * H) + TimeDelta::minutes(minute);
            fired += evaluate(&mut sched, &p, "BTCUSDT", &s, now)
                .iter()
                .filter(|a| a.key.kind == AlertKind::PreClose && a.key.discriminator == 60)
                .count();
        }
        assert_eq!(fired, 1);

        // One candle later the target moves to 104:00 and the key re-arms.
        let s = series(100, &[true, true, true]);
        let now = at(102 * H + 59 * 60);
        let alerts = evaluate(&mut sched, &p, "BTCUSDT", &s, now);
        assert!(alerts.iter().any(|a| matches!(
            a.body,
            AlertBody::PreClose { lead_minutes: 60, target_end } if target_end == at(104 * H)
        )));
    }

    #[test]
    fn pre_close_needs_last_two_bearish() {
        let mut sched = scheduler();
        let s = series(100, &[true, false]);
        let now = at(101 * H) + TimeDelta::minutes(60);
        assert!(evaluate(&mut sched, &policy(), "BTCUSDT", &s, now).is_empty());
    }

    #[test]
    fn pre_close_closed_source_ignores_forming_candle() {
        let mut sched = scheduler();
        let p = EvaluationPolicy { pre_close_candles: CandleSource::Closed, ..policy() };
        // 100, 101 closed and bearish; 102 forming and bullish.
        let s = series(100, &[true, true, false]);
        let now = at(102 * H) + TimeDelta::minutes(58);
        let alerts = evaluate(&mut sched, &p, "BTCUSDT", &s, now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].key.kind, AlertKind::PreClose);
    }
}
