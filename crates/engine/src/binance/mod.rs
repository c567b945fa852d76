pub mod rest;

pub use rest::{BinanceClient, KlineRoute, BASE_URL};
