use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use common::{RawCandle, Timeframe};
use detector::{clock, detect, CandleSeries};

fn bearish_batch(opens: &[f64], drops: &[f64]) -> Vec<RawCandle> {
    opens
        .iter()
        .zip(drops)
        .enumerate()
        .map(|(i, (&open, &drop))| {
            let close = open * (1.0 - drop);
            RawCandle {
                start_secs: 1_700_000_000 - 1_700_000_000 % 3600 + i as i64 * 3600,
                open,
                high: open,
                low: close,
                close,
                volume: 1.0,
            }
        })
        .collect()
}

proptest! {
    /// Two instants inside the same aligned window always agree on its bounds.
    #[test]
    fn instants_in_one_window_share_bounds(
        hours in 1u32..=48,
        window_index in 0i64..200_000,
        a in 0.0f64..1.0,
        b in 0.0f64..1.0,
    ) {
        let tf = Timeframe::Hours(hours);
        let base = window_index * tf.seconds();
        let offset = |f: f64| ((f * tf.seconds() as f64) as i64).min(tf.seconds() - 1);
        let now1 = Utc.timestamp_opt(base + offset(a), 0).unwrap();
        let now2 = Utc.timestamp_opt(base + offset(b), 0).unwrap();

        let bounds = clock::candle_bounds(now1, tf);
        prop_assert_eq!(bounds, clock::candle_bounds(now2, tf));
        prop_assert!(bounds.0 <= now1 && now1 < bounds.1);
        prop_assert_eq!(bounds.0.timestamp(), base);
    }

    /// An all-bearish window matches; making any one candle non-bearish breaks it.
    #[test]
    fn flipping_any_candle_breaks_the_run(
        opens in prop::collection::vec(1.0f64..100_000.0, 1..10),
        drops in prop::collection::vec(0.001f64..0.5, 10),
        flip in 0usize..10,
        rise in 0.0f64..0.5,
    ) {
        let k = opens.len();
        let mut batch = bearish_batch(&opens, &drops[..k]);
        let series = CandleSeries::build(&batch, Timeframe::Hours(1)).unwrap();
        let d = detect(&series, k).unwrap();
        prop_assert!(d.matched);
        prop_assert!(d.drop_percent > 0.0);

        let idx = flip % k;
        batch[idx].close = batch[idx].open * (1.0 + rise);
        batch[idx].high = batch[idx].close;
        let series = CandleSeries::build(&batch, Timeframe::Hours(1)).unwrap();
        prop_assert!(!detect(&series, k).unwrap().matched);
    }
}
