// Core structs: PriceBar, PriceSeries, IndicatorSnapshot, AnalysisVerdict, AnalysisReport
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Finite, non-negative prices and volume.
    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// Daily bars for one symbol, ascending by date, tagged with the provider that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub bars: Vec<PriceBar>,
    pub source: String,
}

impl PriceSeries {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last(&self) -> Option<&PriceBar> {
        self.bars.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Etf,
    #[default]
    Stock,
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKind::Etf => write!(f, "etf"),
            InstrumentKind::Stock => write!(f, "stock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub kind: InstrumentKind,
}

impl InstrumentMeta {
    /// Metadata for a symbol that is not part of any configured pool.
    pub fn unknown(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            kind: InstrumentKind::Stock,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValues {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper_band: f64,
    pub middle_band: f64,
    pub lower_band: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrendStatus {
    StrongUptrend,
    Uptrend,
    Sideways,
    Downtrend,
    WeakDowntrend,
}

impl TrendStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TrendStatus::StrongUptrend => "strong uptrend",
            TrendStatus::Uptrend => "uptrend",
            TrendStatus::Sideways => "sideways",
            TrendStatus::Downtrend => "downtrend",
            TrendStatus::WeakDowntrend => "weak downtrend",
        }
    }
}

/// Technical indicators evaluated at the last bar of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub as_of: NaiveDate,
    pub last_close: f64,
    /// Close-to-close change of the last bar in percent.
    pub change_pct: Option<f64>,
    pub moving_averages: BTreeMap<usize, f64>,
    pub macd: MacdValues,
    pub bollinger: BollingerBands,
    pub rsi: BTreeMap<usize, f64>,
    pub trend: TrendStatus,
    pub signals: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Recommendation {
    /// Case-insensitive match that ignores spaces, dashes and underscores.
    pub fn from_label(label: &str) -> Option<Self> {
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "strongbuy" => Some(Recommendation::StrongBuy),
            "buy" => Some(Recommendation::Buy),
            "hold" => Some(Recommendation::Hold),
            "sell" => Some(Recommendation::Sell),
            "strongsell" => Some(Recommendation::StrongSell),
            _ => None,
        }
    }

    /// Unrecognized labels collapse to `Hold`.
    pub fn normalize(label: &str) -> Self {
        Self::from_label(label).unwrap_or(Recommendation::Hold)
    }

    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Recommendation::StrongBuy
        } else if score >= 60.0 {
            Recommendation::Buy
        } else if score > 40.0 {
            Recommendation::Hold
        } else if score > 20.0 {
            Recommendation::Sell
        } else {
            Recommendation::StrongSell
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recommendation::StrongBuy => "strongBuy",
            Recommendation::Buy => "buy",
            Recommendation::Hold => "hold",
            Recommendation::Sell => "sell",
            Recommendation::StrongSell => "strongSell",
        };
        write!(f, "{}", s)
    }
}

/// Which parser tier produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictOrigin {
    Strict,
    Extracted,
    Pattern,
    Fallback,
}

impl fmt::Display for VerdictOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerdictOrigin::Strict => "strict",
            VerdictOrigin::Extracted => "extracted",
            VerdictOrigin::Pattern => "pattern",
            VerdictOrigin::Fallback => "fallback",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisVerdict {
    pub score: f64,
    pub recommendation: Recommendation,
    pub rationale: String,
    pub confidence: Option<f64>,
    pub origin: VerdictOrigin,
}

impl AnalysisVerdict {
    pub const SCORE_MIN: f64 = 0.0;
    pub const SCORE_MAX: f64 = 100.0;
    pub const NEUTRAL_SCORE: f64 = 50.0;

    /// Neutral verdict used whenever the model reply cannot be understood.
    pub fn fallback(reason: &str) -> Self {
        Self {
            score: Self::NEUTRAL_SCORE,
            recommendation: Recommendation::Hold,
            rationale: reason.to_string(),
            confidence: None,
            origin: VerdictOrigin::Fallback,
        }
    }

    pub fn clamp_score(score: f64) -> f64 {
        score.clamp(Self::SCORE_MIN, Self::SCORE_MAX)
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == VerdictOrigin::Fallback
    }
}

/// Terminal artifact of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub symbol: String,
    pub name: String,
    pub kind: InstrumentKind,
    pub timestamp: DateTime<Utc>,
    pub indicators: IndicatorSnapshot,
    pub verdict: AnalysisVerdict,
    pub data_source: String,
    pub llm_provider: String,
    pub model: String,
}

impl AnalysisReport {
    pub fn is_low_confidence(&self) -> bool {
        self.verdict.is_fallback()
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("provider returned no rows")]
    Empty,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Transient failures worth another attempt against the same provider.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::Timeout => true,
            ProviderError::HttpStatus(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = err.status() {
            ProviderError::HttpStatus(status.as_u16())
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("lookback of {requested} days is outside 1..={max}")]
    InvalidWindow { requested: u32, max: u32 },

    #[error("market data unavailable for {symbol}: {}", .failures.join("; "))]
    DataUnavailable { symbol: String, failures: Vec<String> },
}

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("insufficient data: {required} bars required, {provided} provided")]
    InsufficientData { required: usize, provided: usize },

    #[error("invalid indicator parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM endpoint not configured: {0}")]
    NotConfigured(String),

    #[error("LLM network error: {0}")]
    Network(String),

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("LLM endpoint failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl LlmError {
    /// Every transport failure, including any non-2xx status, gets another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Network(_) | LlmError::Timeout | LlmError::HttpStatus { .. }
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure class of a terminated analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidSymbol,
    InvalidRequest,
    DataUnavailable,
    InsufficientData,
    LlmTransport,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("symbol not found: {0}")]
    InvalidSymbol(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("market data temporarily unavailable: {0}")]
    DataUnavailable(String),

    #[error("not enough history: {required} bars required, {provided} available")]
    InsufficientData { required: usize, provided: usize },

    #[error("AI analysis service unavailable: {0}")]
    LlmTransport(String),

    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AnalysisError::InvalidSymbol(_) => FailureKind::InvalidSymbol,
            AnalysisError::InvalidRequest(_) => FailureKind::InvalidRequest,
            AnalysisError::DataUnavailable(_) => FailureKind::DataUnavailable,
            AnalysisError::InsufficientData { .. } => FailureKind::InsufficientData,
            AnalysisError::LlmTransport(_) => FailureKind::LlmTransport,
            AnalysisError::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl From<FetchError> for AnalysisError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidSymbol(symbol) => AnalysisError::InvalidSymbol(symbol),
            e @ FetchError::InvalidWindow { .. } => AnalysisError::InvalidRequest(e.to_string()),
            e @ FetchError::DataUnavailable { .. } => AnalysisError::DataUnavailable(e.to_string()),
        }
    }
}

impl From<IndicatorError> for AnalysisError {
    fn from(err: IndicatorError) -> Self {
        match err {
            IndicatorError::InsufficientData { required, provided } => {
                AnalysisError::InsufficientData { required, provided }
            }
            e @ IndicatorError::InvalidParameter(_) => AnalysisError::InvalidRequest(e.to_string()),
        }
    }
}

impl From<LlmError> for AnalysisError {
    fn from(err: LlmError) -> Self {
        AnalysisError::LlmTransport(err.to_string())
    }
}
