use std::time::Duration;

use common::{MarketData, ProviderError, Timeframe};
use engine::BinanceClient;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const H_MS: i64 = 3_600_000;

fn kline(open_time_ms: i64, open: &str, close: &str) -> serde_json::Value {
    serde_json::json!([
        open_time_ms, open, "110.0", "90.0", close, "12.5",
        open_time_ms + H_MS - 1, "0", 10, "0", "0", "0"
    ])
}

async fn client(server: &MockServer) -> BinanceClient {
    BinanceClient::new(server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn native_interval_is_requested_and_parsed() {
    let server = MockServer::start().await;
    let base = 1_700_000_000_000i64 / (4 * H_MS) * (4 * H_MS);
    let body = serde_json::json!([
        kline(base, "100.0", "95.0"),
        kline(base + 4 * H_MS, "95.0", "97.5"),
    ]);

    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("interval", "4h"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let candles = client(&server)
        .await
        .fetch_candles("BTCUSDT", Timeframe::Hours(4), 10)
        .await
        .unwrap();

    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].start_secs, base / 1000);
    assert_eq!(candles[0].open, 100.0);
    assert_eq!(candles[0].close, 95.0);
    assert_eq!(candles[1].close, 97.5);
}

#[tokio::test]
async fn daily_routes_to_1d() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .and(query_param("interval", "1d"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let candles = client(&server)
        .await
        .fetch_candles("ETHUSDT", Timeframe::Daily, 10)
        .await
        .unwrap();
    assert!(candles.is_empty());
}

#[tokio::test]
async fn non_native_interval_is_aggregated_from_hourly() {
    let server = MockServer::start().await;
    let base = 1_700_000_000_000i64 / (3 * H_MS) * (3 * H_MS);
    let body = serde_json::json!([
        kline(base, "100.0", "99.0"),
        kline(base + H_MS, "99.0", "98.0"),
        kline(base + 2 * H_MS, "98.0", "97.0"),
        kline(base + 3 * H_MS, "97.0", "96.0"),
    ]);

    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .and(query_param("interval", "1h"))
        .and(query_param("limit", "33"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let candles = client(&server)
        .await
        .fetch_candles("BTCUSDT", Timeframe::Hours(3), 10)
        .await
        .unwrap();

    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].start_secs, base / 1000);
    assert_eq!(candles[0].open, 100.0);
    assert_eq!(candles[0].close, 97.0);
    assert_eq!(candles[0].volume, 37.5);
    assert_eq!(candles[1].start_secs, (base + 3 * H_MS) / 1000);
}

#[tokio::test]
async fn http_429_is_rate_limited_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .fetch_candles("BTCUSDT", Timeframe::Hours(1), 10)
        .await
        .unwrap_err();

    assert!(err.is_rate_limited(), "got {err:?}");
    assert!(matches!(
        err,
        ProviderError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(30)
    ));
}

#[tokio::test]
async fn too_many_requests_code_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "code": -1003,
            "msg": "Too many requests; current limit is 1200 request weight per 1 MINUTE."
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .fetch_candles("BTCUSDT", Timeframe::Hours(1), 10)
        .await
        .unwrap_err();
    assert!(err.is_rate_limited(), "got {err:?}");
}

#[tokio::test]
async fn other_api_errors_are_not_rate_limits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "code": -1121,
            "msg": "Invalid symbol."
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .fetch_candles("NOPE", Timeframe::Hours(1), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Exchange(ref m) if m.contains("Invalid symbol")), "got {err:?}");
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = BinanceClient::new(server.uri(), Duration::from_millis(200)).unwrap();
    let err = client
        .fetch_candles("BTCUSDT", Timeframe::Hours(1), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn current_price_parses_ticker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .and(query_param("symbol", "BTCUSDT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "symbol": "BTCUSDT",
            "price": "64250.10000000"
        })))
        .mount(&server)
        .await;

    let price = client(&server).await.current_price("BTCUSDT").await.unwrap();
    assert!((price - 64_250.1).abs() < 1e-9);
}
