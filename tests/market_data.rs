use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use mockito::{Matcher, Server};
use quant_scout::config::DataProviderConfig;
use quant_scout::market_data::providers::build_providers;
use quant_scout::market_data::{CacheKey, InMemorySeriesCache, MarketDataFetcher, PriceProvider, SeriesCache};
use quant_scout::model::{FetchError, PriceBar, ProviderError};
use quant_scout::retry::RetryPolicy;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn bars(n: u64) -> Vec<PriceBar> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + i as f64;
            PriceBar {
                date: start + Days::new(i),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

/// Fails with a retryable error until `failures` calls have been made.
struct FlakyProvider {
    calls: AtomicU32,
    failures: u32,
    rows: u64,
}

impl FlakyProvider {
    fn new(failures: u32, rows: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures,
            rows,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceProvider for FlakyProvider {
    fn id(&self) -> &str {
        "flaky"
    }

    async fn fetch_raw(&self, _symbol: &str, _lookback_days: u32) -> Result<Vec<PriceBar>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(ProviderError::HttpStatus(503));
        }
        Ok(bars(self.rows))
    }
}

struct NotFoundProvider(&'static str);

#[async_trait]
impl PriceProvider for NotFoundProvider {
    fn id(&self) -> &str {
        self.0
    }

    async fn fetch_raw(&self, symbol: &str, _lookback_days: u32) -> Result<Vec<PriceBar>, ProviderError> {
        Err(ProviderError::SymbolNotFound(symbol.to_string()))
    }
}

/// Returns rows with a repeated date.
struct DuplicateRowsProvider;

#[async_trait]
impl PriceProvider for DuplicateRowsProvider {
    fn id(&self) -> &str {
        "duplicates"
    }

    async fn fetch_raw(&self, _symbol: &str, _lookback_days: u32) -> Result<Vec<PriceBar>, ProviderError> {
        let mut rows = bars(5);
        rows.push(rows[2].clone());
        Ok(rows)
    }
}

/// Never answers within the request timeout.
struct HangingProvider;

#[async_trait]
impl PriceProvider for HangingProvider {
    fn id(&self) -> &str {
        "hanging"
    }

    async fn fetch_raw(&self, _symbol: &str, _lookback_days: u32) -> Result<Vec<PriceBar>, ProviderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

/// Answers after a delay, counting calls.
struct SlowProvider {
    calls: AtomicU32,
    delay: Duration,
}

#[async_trait]
impl PriceProvider for SlowProvider {
    fn id(&self) -> &str {
        "slow"
    }

    async fn fetch_raw(&self, _symbol: &str, _lookback_days: u32) -> Result<Vec<PriceBar>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(bars(120))
    }
}

fn fetcher(providers: Vec<Arc<dyn PriceProvider>>, attempts: u32) -> MarketDataFetcher {
    MarketDataFetcher::new(
        providers,
        Arc::new(InMemorySeriesCache::new(Duration::from_secs(300))),
        RetryPolicy::immediate(attempts),
        365,
    )
}

#[tokio::test]
async fn transient_failures_are_retried_on_the_same_provider() {
    let flaky = FlakyProvider::new(2, 30);
    let fetcher = fetcher(vec![flaky.clone()], 3);

    let series = fetcher.fetch("spy", 30).await.unwrap();

    assert_eq!(flaky.calls(), 3);
    assert_eq!(series.symbol, "SPY");
    assert_eq!(series.source, "flaky");
    assert_eq!(series.len(), 30);
}

#[tokio::test]
async fn series_is_trimmed_to_the_lookback() {
    let fetcher = fetcher(vec![FlakyProvider::new(0, 120)], 1);
    let series = fetcher.fetch("SPY", 90).await.unwrap();
    assert_eq!(series.len(), 90);
    // most recent bars are kept
    assert_eq!(series.last().unwrap().close, 219.0);
}

#[tokio::test]
async fn second_fetch_is_served_from_cache() {
    let flaky = FlakyProvider::new(0, 30);
    let fetcher = fetcher(vec![flaky.clone()], 1);

    let first = fetcher.fetch("SPY", 30).await.unwrap();
    let second = fetcher.fetch(" spy ", 30).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(flaky.calls(), 1);

    fetcher.cache().invalidate(&CacheKey::new("SPY", 30));
    fetcher.fetch("SPY", 30).await.unwrap();
    assert_eq!(flaky.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn parallel_fetches_of_one_key_share_a_provider_call() {
    let slow = Arc::new(SlowProvider {
        calls: AtomicU32::new(0),
        delay: Duration::from_millis(300),
    });
    let fetcher = fetcher(vec![slow.clone()], 1);

    let (a, b, c) = tokio::join!(
        fetcher.fetch("QQQ", 90),
        fetcher.fetch("qqq", 90),
        fetcher.fetch("QQQ", 90)
    );
    assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(c.unwrap().len(), 90);

    // a different window is a different key
    let (d, e) = tokio::join!(fetcher.fetch("QQQ", 60), fetcher.fetch("SPY", 90));
    assert!(d.is_ok() && e.is_ok());
    assert_eq!(slow.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn falls_through_to_next_provider() {
    let backup = FlakyProvider::new(0, 40);
    let fetcher = fetcher(
        vec![Arc::new(DuplicateRowsProvider), Arc::new(NotFoundProvider("empty")), backup.clone()],
        2,
    );

    let series = fetcher.fetch("510300", 40).await.unwrap();
    assert_eq!(series.source, "flaky");
    assert_eq!(backup.calls(), 1);
}

#[tokio::test]
async fn unknown_everywhere_is_an_invalid_symbol() {
    let fetcher = fetcher(
        vec![Arc::new(NotFoundProvider("a")), Arc::new(NotFoundProvider("b"))],
        3,
    );
    let err = fetcher.fetch("FAKE_SYMBOL", 30).await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidSymbol(ref s) if s == "FAKE_SYMBOL"));
}

#[tokio::test]
async fn mixed_failures_are_data_unavailable() {
    let fetcher = fetcher(
        vec![Arc::new(NotFoundProvider("a")), FlakyProvider::new(10, 30)],
        2,
    );
    match fetcher.fetch("SPY", 30).await.unwrap_err() {
        FetchError::DataUnavailable { symbol, failures } => {
            assert_eq!(symbol, "SPY");
            assert_eq!(failures.len(), 2);
            assert!(failures[1].starts_with("flaky:"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn hanging_provider_times_out() {
    let fetcher = fetcher(vec![Arc::new(HangingProvider)], 2);
    let err = fetcher.fetch("SPY", 30).await.unwrap_err();
    match err {
        FetchError::DataUnavailable { failures, .. } => {
            assert!(failures[0].contains("timed out"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn lookback_outside_window_is_rejected() {
    let fetcher = fetcher(vec![FlakyProvider::new(0, 10)], 1);
    assert!(matches!(
        fetcher.fetch("SPY", 0).await,
        Err(FetchError::InvalidWindow { requested: 0, max: 365 })
    ));
    assert!(matches!(
        fetcher.fetch("SPY", 366).await,
        Err(FetchError::InvalidWindow { requested: 366, .. })
    ));
    assert!(matches!(
        fetcher.fetch("   ", 30).await,
        Err(FetchError::InvalidSymbol(_))
    ));
}

#[test]
fn zero_ttl_cache_stores_nothing() {
    let cache = InMemorySeriesCache::with_ttl_secs(0);
    cache.put(
        CacheKey::new("SPY", 30),
        quant_scout::model::PriceSeries {
            symbol: "SPY".into(),
            bars: bars(3),
            source: "test".into(),
        },
    );
    assert!(cache.is_empty());
}

fn provider_config(kind: &str, base_url: &str) -> DataProviderConfig {
    let mut cfg = DataProviderConfig::of_kind(kind);
    cfg.base_url = Some(base_url.to_string());
    cfg
}

#[tokio::test]
async fn eastmoney_klines_over_http() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/qt/stock/kline/get")
        .match_query(Matcher::UrlEncoded("secid".into(), "1.510300".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"rc":0,"data":{"code":"510300","name":"沪深300ETF","klines":[
                "2024-05-07,3.655,3.662,3.680,3.640,6100000,2230000000.0",
                "2024-05-06,3.601,3.655,3.670,3.590,8123456,2950000000.0"]}}"#,
        )
        .create_async()
        .await;

    let providers = build_providers(&[provider_config("eastmoney", &server.url())]).unwrap();
    let fetcher = fetcher(providers, 1);
    let series = fetcher.fetch("510300", 30).await.unwrap();

    mock.assert_async().await;
    assert_eq!(series.source, "eastmoney");
    assert_eq!(series.len(), 2);
    assert_eq!(series.bars[0].date, NaiveDate::from_ymd_opt(2024, 5, 6).unwrap());
    assert_eq!(series.bars[1].close, 3.662);
}

#[tokio::test]
async fn eastmoney_null_data_means_unknown_symbol() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/qt/stock/kline/get")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"rc":0,"data":null}"#)
        .create_async()
        .await;

    let providers = build_providers(&[provider_config("eastmoney", &server.url())]).unwrap();
    let err = fetcher(providers, 3).fetch("999999", 30).await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidSymbol(_)));
}

#[tokio::test]
async fn yahoo_server_errors_are_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v8/finance/chart/SPY")
        .match_query(Matcher::Any)
        .with_status(502)
        .expect(3)
        .create_async()
        .await;

    let providers = build_providers(&[provider_config("yahoo", &server.url())]).unwrap();
    let err = fetcher(providers, 3).fetch("SPY", 30).await.unwrap_err();

    mock.assert_async().await;
    match err {
        FetchError::DataUnavailable { failures, .. } => assert!(failures[0].contains("502")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn yahoo_404_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v8/finance/chart/FAKE_SYMBOL")
        .match_query(Matcher::Any)
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let providers = build_providers(&[provider_config("yahoo", &server.url())]).unwrap();
    let err = fetcher(providers, 3).fetch("fake_symbol", 30).await.unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, FetchError::InvalidSymbol(_)));
}
