//! Candle boundary arithmetic anchored to the Unix epoch.
//!
//! Boundaries depend only on `now` and the window length, never on process
//! start time or on what the provider last returned, so two calls at the same
//! instant agree and restarts see the same candles. Windows that do not divide
//! 24 hours still line up because the math counts absolute hours since the
//! epoch, not hour-of-day.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use common::{Candle, Timeframe};

/// Start of the `period`-second bucket containing `now`.
fn floor_to(now: DateTime<Utc>, period_secs: i64) -> DateTime<Utc> {
    let into_bucket = now.timestamp().rem_euclid(period_secs);
    now - TimeDelta::seconds(into_bucket)
        - TimeDelta::nanoseconds(i64::from(now.timestamp_subsec_nanos()))
}

/// Half-open interval `[start, end)` of the candle containing `now`.
pub fn candle_bounds(now: DateTime<Utc>, timeframe: Timeframe) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = floor_to(now, timeframe.seconds());
    (start, start + timeframe.duration())
}

/// Close instant of the candle after the one containing `now`.
pub fn next_candle_end(now: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let (_, end) = candle_bounds(now, timeframe);
    end + timeframe.duration()
}

/// A candle is complete once its end has been reached. Provider-supplied
/// "closed" flags are deliberately not consulted.
pub fn is_complete(candle: &Candle, now: DateTime<Utc>) -> bool {
    now >= candle.end()
}

/// Start of the UTC hour containing `now`.
pub fn hour_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    floor_to(now, 3600)
}

/// First epoch-aligned multiple of `interval` strictly after `now`.
pub fn next_aligned(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let secs = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX).max(1);
    floor_to(now, secs) + TimeDelta::seconds(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_hour(h: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(h * 3600, 0).unwrap()
    }

    #[test]
    fn four_hour_starts_follow_hours_since_epoch() {
        for (h, expected) in [(0, 0), (3, 0), (4, 4), (7, 4), (8, 8)] {
            let (start, end) = candle_bounds(at_hour(h), Timeframe::Hours(4));
            assert_eq!(start, at_hour(expected), "hour {h}");
            assert_eq!(end, at_hour(expected + 4), "hour {h}");
        }
    }

    #[test]
    fn end_instant_belongs_to_next_candle() {
        let tf = Timeframe::Hours(4);
        let (_, end) = candle_bounds(at_hour(5), tf);
        let (next_start, _) = candle_bounds(end, tf);
        assert_eq!(next_start, end);
    }

    #[test]
    fn sub_second_precision_is_truncated() {
        let now = at_hour(9) + TimeDelta::milliseconds(1500) + TimeDelta::minutes(17);
        let (start, _) = candle_bounds(now, Timeframe::Hours(1));
        assert_eq!(start, at_hour(9));
    }

    #[test]
    fn non_divisor_of_24_uses_absolute_hours() {
        // 2024-01-01T00:00Z is hour 473_352; 473_352 % 5 == 2.
        let midnight = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (start, end) = candle_bounds(midnight, Timeframe::Hours(5));
        assert_eq!(start, midnight - TimeDelta::hours(2));
        assert_eq!(end, midnight + TimeDelta::hours(3));
    }

    #[test]
    fn daily_aligns_to_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 13, 45, 0).unwrap();
        let (start, end) = candle_bounds(now, Timeframe::Daily);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 5, 18, 0, 0, 0).unwrap());
    }

    #[test]
    fn next_candle_end_is_one_window_past_current_end() {
        let now = at_hour(10) + TimeDelta::minutes(30);
        assert_eq!(next_candle_end(now, Timeframe::Hours(4)), at_hour(16));
        assert_eq!(next_candle_end(now, Timeframe::Hours(1)), at_hour(12));
    }

    #[test]
    fn completeness_is_derived_from_end() {
        let candle =
            Candle::new(at_hour(4), Timeframe::Hours(4), 10.0, 10.0, 9.0, 9.5, 1.0).unwrap();
        assert!(!is_complete(&candle, at_hour(7)));
        assert!(is_complete(&candle, at_hour(8)));
        assert!(is_complete(&candle, at_hour(9)));
    }

    #[test]
    fn next_aligned_is_strictly_after_now() {
        let five = Duration::from_secs(300);
        let on_boundary = at_hour(2);
        assert_eq!(next_aligned(on_boundary, five), at_hour(2) + TimeDelta::minutes(5));
        let mid = at_hour(2) + TimeDelta::seconds(61);
        assert_eq!(next_aligned(mid, five), at_hour(2) + TimeDelta::minutes(5));
    }
}
