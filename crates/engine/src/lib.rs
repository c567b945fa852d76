pub mod backoff;
pub mod binance;
pub mod monitor;

pub use backoff::Backoff;
pub use binance::BinanceClient;
pub use monitor::{CycleReport, Monitor, MonitorHandle};
