pub mod config;
pub mod error;
pub mod exchange;
pub mod types;

pub use config::{Config, PreCloseOffset, WatchConfig};
pub use error::{DataError, DeliveryError, Error, ProviderError, Result};
pub use exchange::{MarketData, Notifier, SystemClock, TimeSource};
pub use types::*;
