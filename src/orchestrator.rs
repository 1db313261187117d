// Analysis pipeline: fetch -> indicators -> LLM verdict -> merged report
use crate::analyzer::IndicatorEngine;
use crate::config::AppConfig;
use crate::llm::LlmAnalyzer;
use crate::market_data::MarketDataFetcher;
use crate::model::{AnalysisError, AnalysisReport, ConfigError, FailureKind, InstrumentMeta};
use crate::normalizer::normalize_symbol;
use crate::storage::ReportStore;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    Fetching,
    Computing,
    Consulting,
    Merged,
    Failed(FailureKind),
}

impl AnalysisStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStage::Merged | AnalysisStage::Failed(_))
    }
}

/// Stage bookkeeping for one run; logs every transition.
struct StageTracker<'a> {
    symbol: &'a str,
    stage: AnalysisStage,
}

impl<'a> StageTracker<'a> {
    fn start(symbol: &'a str) -> Self {
        debug!(%symbol, stage = ?AnalysisStage::Fetching, "Analysis started");
        Self {
            symbol,
            stage: AnalysisStage::Fetching,
        }
    }

    fn enter(&mut self, next: AnalysisStage) {
        debug!(symbol = %self.symbol, from = ?self.stage, to = ?next, "Stage transition");
        self.stage = next;
    }

    fn fail(&mut self, err: AnalysisError) -> AnalysisError {
        let failed = AnalysisStage::Failed(err.kind());
        warn!(symbol = %self.symbol, stage = ?self.stage, error = %err, "❌ Analysis failed");
        self.stage = failed;
        err
    }
}

pub struct AnalysisOrchestrator {
    fetcher: MarketDataFetcher,
    engine: IndicatorEngine,
    analyzer: LlmAnalyzer,
    store: Option<Arc<dyn ReportStore>>,
    instruments: HashMap<String, InstrumentMeta>,
    lookback_days: u32,
    owner: String,
    max_concurrent: usize,
}

impl AnalysisOrchestrator {
    pub fn new(fetcher: MarketDataFetcher, engine: IndicatorEngine, analyzer: LlmAnalyzer) -> Self {
        Self {
            fetcher,
            engine,
            analyzer,
            store: None,
            instruments: HashMap::new(),
            lookback_days: 90,
            owner: "default".to_string(),
            max_concurrent: 4,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        store: Option<Arc<dyn ReportStore>>,
    ) -> Result<Self, ConfigError> {
        let fetcher = MarketDataFetcher::from_config(config)?;
        let engine = IndicatorEngine::new(config.indicators.clone());
        let analyzer = LlmAnalyzer::from_config(&config.llm)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let mut orchestrator = Self::new(fetcher, engine, analyzer)
            .with_instruments(config.instruments.clone())
            .with_lookback_days(config.lookback_days)
            .with_owner(&config.owner)
            .with_max_concurrent(config.max_concurrent_analyses);
        orchestrator.store = store;
        Ok(orchestrator)
    }

    pub fn with_store(mut self, store: Arc<dyn ReportStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_instruments(mut self, instruments: Vec<InstrumentMeta>) -> Self {
        self.instruments = instruments
            .into_iter()
            .map(|meta| (normalize_symbol(&meta.symbol), meta))
            .collect();
        self
    }

    pub fn with_lookback_days(mut self, lookback_days: u32) -> Self {
        self.lookback_days = lookback_days;
        self
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = owner.to_string();
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Pool metadata, or a bare stock entry for unknown symbols.
    pub fn instrument(&self, symbol: &str) -> InstrumentMeta {
        let key = normalize_symbol(symbol);
        self.instruments
            .get(&key)
            .cloned()
            .unwrap_or_else(|| InstrumentMeta::unknown(&key))
    }

    pub async fn run_analysis(&self, symbol: &str) -> Result<AnalysisReport, AnalysisError> {
        let meta = self.instrument(symbol);
        self.run_instrument(&meta).await
    }

    pub async fn run_instrument(&self, meta: &InstrumentMeta) -> Result<AnalysisReport, AnalysisError> {
        let mut tracker = StageTracker::start(&meta.symbol);
        info!(symbol = %meta.symbol, name = %meta.name, "🔍 Starting analysis");

        let series = self
            .fetcher
            .fetch(&meta.symbol, self.lookback_days)
            .await
            .map_err(|e| tracker.fail(e.into()))?;

        tracker.enter(AnalysisStage::Computing);
        let snapshot = self
            .engine
            .compute(&series)
            .map_err(|e| tracker.fail(e.into()))?;

        tracker.enter(AnalysisStage::Consulting);
        let verdict = self
            .analyzer
            .analyze(meta, &snapshot)
            .await
            .map_err(|e| tracker.fail(e.into()))?;

        tracker.enter(AnalysisStage::Merged);
        let report = AnalysisReport {
            symbol: series.symbol.clone(),
            name: meta.name.clone(),
            kind: meta.kind,
            timestamp: Utc::now(),
            indicators: snapshot,
            verdict,
            data_source: series.source.clone(),
            llm_provider: self.analyzer.provider_id().to_string(),
            model: self.analyzer.model().to_string(),
        };

        if report.is_low_confidence() {
            warn!(symbol = %report.symbol, "⚠️ Model reply unreadable, report carries the neutral fallback verdict");
        }
        info!(
            symbol = %report.symbol,
            score = report.verdict.score,
            recommendation = %report.verdict.recommendation,
            trend = report.indicators.trend.label(),
            source = %report.data_source,
            "✅ Analysis complete"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&report, &self.owner).await {
                warn!(symbol = %report.symbol, error = %e, "Persistence warning: report not stored");
            }
        }

        Ok(report)
    }

    /// Stops with `Cancelled` as soon as the token fires; in-flight requests are dropped.
    pub async fn run_analysis_cancellable(
        &self,
        symbol: &str,
        token: &CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(%symbol, "Analysis cancelled");
                Err(AnalysisError::Cancelled)
            }
            result = self.run_analysis(symbol) => result,
        }
    }

    /// Runs up to `max_concurrent` analyses at a time; results keep the input order.
    pub async fn run_batch(
        &self,
        symbols: &[String],
        token: &CancellationToken,
    ) -> Vec<(String, Result<AnalysisReport, AnalysisError>)> {
        let mut results: Vec<(usize, String, Result<AnalysisReport, AnalysisError>)> =
            stream::iter(symbols.iter().enumerate())
                .map(|(idx, symbol)| async move {
                    let result = self.run_analysis_cancellable(symbol, token).await;
                    (idx, symbol.clone(), result)
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        results.sort_by_key(|(idx, _, _)| *idx);
        results
            .into_iter()
            .map(|(_, symbol, result)| (symbol, result))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_stages() {
        assert!(AnalysisStage::Merged.is_terminal());
        assert!(AnalysisStage::Failed(FailureKind::Cancelled).is_terminal());
        assert!(!AnalysisStage::Consulting.is_terminal());
    }

    #[test]
    fn tracker_records_failure_kind() {
        let mut tracker = StageTracker::start("SPY");
        tracker.enter(AnalysisStage::Computing);
        let err = tracker.fail(AnalysisError::InsufficientData {
            required: 60,
            provided: 12,
        });
        assert_eq!(
            tracker.stage,
            AnalysisStage::Failed(FailureKind::InsufficientData)
        );
        assert_eq!(err.kind(), FailureKind::InsufficientData);
    }
}
