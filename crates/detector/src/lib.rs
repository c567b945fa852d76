//! Pure candle logic: epoch-aligned boundaries, series normalization and
//! consecutive-bearish detection. Nothing here performs I/O or holds state.

pub mod clock;
pub mod pattern;
pub mod series;

pub use pattern::{detect, detect_window, Detection};
pub use series::CandleSeries;
