use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use quant_scout::analyzer::{IndicatorConfig, IndicatorEngine};
use quant_scout::llm::{CompletionTransport, LlmAnalyzer, ProviderRegistry};
use quant_scout::market_data::{InMemorySeriesCache, MarketDataFetcher, PriceProvider};
use quant_scout::model::{
    AnalysisError, AnalysisReport, FailureKind, InstrumentKind, InstrumentMeta, LlmError, PriceBar,
    ProviderError, Recommendation, StorageError, TrendStatus,
};
use quant_scout::orchestrator::AnalysisOrchestrator;
use quant_scout::retry::RetryPolicy;
use quant_scout::storage::{ReportStore, SqliteReportStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Steadily rising closes for known symbols; "FAKE_SYMBOL" is unknown.
struct RisingProvider {
    rows: u64,
}

#[async_trait]
impl PriceProvider for RisingProvider {
    fn id(&self) -> &str {
        "fixture"
    }

    async fn fetch_raw(&self, symbol: &str, _lookback_days: u32) -> Result<Vec<PriceBar>, ProviderError> {
        if symbol == "FAKE_SYMBOL" {
            return Err(ProviderError::SymbolNotFound(symbol.to_string()));
        }
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        Ok((0..self.rows)
            .map(|i| {
                let close = 10.0 + i as f64 * 0.1;
                PriceBar {
                    date: start + Days::new(i),
                    open: close - 0.05,
                    high: close + 0.1,
                    low: close - 0.1,
                    close,
                    volume: 50_000.0,
                }
            })
            .collect())
    }
}

/// Answers every request with the same verdict and counts calls.
struct FixedTransport {
    calls: AtomicUsize,
    reply: Result<Value, u16>,
}

impl FixedTransport {
    fn ok(content: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply: Ok(json!({"choices": [{"message": {"role": "assistant", "content": content}}]})),
        })
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply: Err(status),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionTransport for FixedTransport {
    async fn send(&self, _endpoint: &str, _api_key: &str, _body: &Value) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Ok(body) => Ok(body.to_string()),
            Err(status) => Err(LlmError::HttpStatus {
                status: *status,
                body: String::new(),
            }),
        }
    }
}

/// Holds every request far longer than any test waits.
struct StalledTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionTransport for StalledTransport {
    async fn send(&self, _endpoint: &str, _api_key: &str, _body: &Value) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(LlmError::Timeout)
    }
}

struct BrokenStore;

#[async_trait]
impl ReportStore for BrokenStore {
    async fn save(&self, _report: &AnalysisReport, _owner: &str) -> Result<(), StorageError> {
        Err(StorageError::Database(rusqlite::Error::InvalidQuery))
    }
}

const VERDICT: &str = r#"{"score": 78, "recommendation": "buy", "rationale": "Clean uptrend above every average.", "confidence": 0.75}"#;

fn orchestrator(rows: u64, transport: Arc<dyn CompletionTransport>) -> AnalysisOrchestrator {
    let fetcher = MarketDataFetcher::new(
        vec![Arc::new(RisingProvider { rows })],
        Arc::new(InMemorySeriesCache::new(Duration::from_secs(60))),
        RetryPolicy::immediate(2),
        365,
    );
    let profile = ProviderRegistry::builtin()
        .resolve(Some("openai"), "http://llm.invalid/v1")
        .unwrap();
    let analyzer = LlmAnalyzer::new(profile, "gpt-4o-mini", "", RetryPolicy::immediate(2), transport);

    AnalysisOrchestrator::new(fetcher, IndicatorEngine::new(IndicatorConfig::default()), analyzer)
        .with_lookback_days(90)
        .with_owner("tester")
        .with_instruments(vec![InstrumentMeta {
            symbol: "510300".into(),
            name: "沪深300ETF".into(),
            kind: InstrumentKind::Etf,
        }])
}

#[tokio::test]
async fn successful_run_merges_and_persists_the_report() {
    let transport = FixedTransport::ok(VERDICT);
    let store = Arc::new(SqliteReportStore::in_memory().unwrap());
    let orchestrator = orchestrator(120, transport.clone()).with_store(store.clone());

    let report = orchestrator.run_analysis("510300").await.unwrap();

    assert_eq!(report.symbol, "510300");
    assert_eq!(report.name, "沪深300ETF");
    assert_eq!(report.kind, InstrumentKind::Etf);
    assert_eq!(report.data_source, "fixture");
    assert_eq!(report.llm_provider, "openai");
    assert_eq!(report.model, "gpt-4o-mini");
    assert_eq!(report.verdict.score, 78.0);
    assert_eq!(report.verdict.recommendation, Recommendation::Buy);
    assert_eq!(report.indicators.trend, TrendStatus::StrongUptrend);
    assert!(!report.is_low_confidence());
    assert_eq!(transport.calls(), 1);

    let stored = store.recent(10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].owner, "tester");
    assert_eq!(stored[0].report.symbol, report.symbol);
    assert_eq!(stored[0].report.timestamp, report.timestamp);
    assert_eq!(stored[0].report.verdict.recommendation, Recommendation::Buy);
    assert_eq!(stored[0].report.verdict.rationale, report.verdict.rationale);
}

#[tokio::test]
async fn history_is_newest_first() {
    let store = Arc::new(SqliteReportStore::in_memory().unwrap());
    let orchestrator = orchestrator(120, FixedTransport::ok(VERDICT)).with_store(store.clone());

    orchestrator.run_analysis("510300").await.unwrap();
    orchestrator.run_analysis("SPY").await.unwrap();

    let stored = store.recent(10).await.unwrap();
    let symbols: Vec<&str> = stored.iter().map(|s| s.report.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["SPY", "510300"]);

    let spy_only = store.recent_for_symbol("SPY", 10).await.unwrap();
    assert_eq!(spy_only.len(), 1);
    // unknown symbols get bare stock metadata
    assert_eq!(spy_only[0].report.kind, InstrumentKind::Stock);
}

#[tokio::test]
async fn unknown_symbol_fails_before_the_llm_is_consulted() {
    let transport = FixedTransport::ok(VERDICT);
    let err = orchestrator(120, transport.clone())
        .run_analysis("FAKE_SYMBOL")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::InvalidSymbol);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn short_history_is_insufficient_data() {
    let transport = FixedTransport::ok(VERDICT);
    let err = orchestrator(20, transport.clone())
        .run_analysis("510300")
        .await
        .unwrap_err();

    match err {
        AnalysisError::InsufficientData { required, provided } => {
            assert_eq!(required, 60);
            assert_eq!(provided, 20);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn llm_outage_is_a_transport_failure() {
    let transport = FixedTransport::failing(503);
    let err = orchestrator(120, transport.clone())
        .run_analysis("510300")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::LlmTransport);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn unreadable_reply_still_produces_a_flagged_report() {
    let report = orchestrator(120, FixedTransport::ok("no idea"))
        .run_analysis("510300")
        .await
        .unwrap();

    assert!(report.is_low_confidence());
    assert_eq!(report.verdict.score, 50.0);
    assert_eq!(report.verdict.recommendation, Recommendation::Hold);
}

#[tokio::test]
async fn storage_failure_does_not_fail_the_analysis() {
    let orchestrator = orchestrator(120, FixedTransport::ok(VERDICT)).with_store(Arc::new(BrokenStore));
    let report = orchestrator.run_analysis("510300").await.unwrap();
    assert_eq!(report.verdict.score, 78.0);
}

#[tokio::test]
async fn cancelled_token_stops_the_run() {
    let transport = FixedTransport::ok(VERDICT);
    let orchestrator = orchestrator(120, transport.clone());
    let token = CancellationToken::new();
    token.cancel();

    let err = orchestrator
        .run_analysis_cancellable("510300", &token)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Cancelled);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelling_mid_flight_abandons_the_llm_call() {
    let transport = Arc::new(StalledTransport {
        calls: AtomicUsize::new(0),
    });
    let orchestrator = orchestrator(120, transport.clone());
    let token = CancellationToken::new();
    let started = tokio::time::Instant::now();

    let (_, result) = tokio::join!(
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        },
        orchestrator.run_analysis_cancellable("510300", &token)
    );

    assert_eq!(result.unwrap_err().kind(), FailureKind::Cancelled);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn batch_keeps_input_order() {
    let orchestrator = orchestrator(120, FixedTransport::ok(VERDICT)).with_max_concurrent(2);
    let symbols: Vec<String> = ["SPY", "FAKE_SYMBOL", "510300", "QQQ"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let results = orchestrator.run_batch(&symbols, &CancellationToken::new()).await;

    let order: Vec<&str> = results.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(order, vec!["SPY", "FAKE_SYMBOL", "510300", "QQQ"]);
    assert!(results[0].1.is_ok());
    assert_eq!(
        results[1].1.as_ref().unwrap_err().kind(),
        FailureKind::InvalidSymbol
    );
    assert!(results[2].1.is_ok());
    assert!(results[3].1.is_ok());
}
