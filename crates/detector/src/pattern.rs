use chrono::{DateTime, Utc};

use common::{Candle, DataError};

use crate::CandleSeries;

/// Outcome of checking the last `run_length` candles for a bearish run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub matched: bool,
    pub run_length: usize,
    /// Open of the first candle in the window.
    pub start_price: f64,
    /// Close of the last candle in the window.
    pub end_price: f64,
    /// `(start_price - end_price) / start_price * 100` when matched, else 0.
    pub drop_percent: f64,
    /// End instant of the last candle in the window.
    pub last_end: DateTime<Utc>,
}

/// Check whether the last `run_length` candles of the series are all down.
pub fn detect(series: &CandleSeries, run_length: usize) -> Result<Detection, DataError> {
    detect_window(series.candles(), run_length)
}

/// Same as [`detect`] over an arbitrary ordered slice.
pub fn detect_window(candles: &[Candle], run_length: usize) -> Result<Detection, DataError> {
    if run_length == 0 || candles.len() < run_length {
        return Err(DataError::InsufficientCandles {
            needed: run_length.max(1),
            got: candles.len(),
        });
    }

    let window = &candles[candles.len() - run_length..];
    let first = &window[0];
    let last = &window[run_length - 1];
    let matched = window.iter().all(Candle::is_down);

    let start_price = first.open();
    let end_price = last.close();
    let drop_percent = if matched {
        (start_price - end_price) / start_price * 100.0
    } else {
        0.0
    };

    Ok(Detection {
        matched,
        run_length,
        start_price,
        end_price,
        drop_percent,
        last_end: last.end(),
    })
}
