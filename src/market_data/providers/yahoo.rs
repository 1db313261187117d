// Yahoo Finance v8 chart API
use crate::market_data::traits::PriceProvider;
use crate::model::{PriceBar, ProviderError};
use crate::normalizer::yahoo_ticker;
use crate::utils::trade_date_from_unix;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(client: Client, base_url: Option<&str>) -> Self {
        Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn chart_url(&self, ticker: &str, lookback_days: u32) -> String {
        let end = Utc::now().timestamp();
        let start = end - calendar_span_days(lookback_days) * 86_400;
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
            self.base_url, ticker, start, end
        )
    }
}

/// Calendar days that cover `lookback_days` trading sessions with room for holidays.
fn calendar_span_days(lookback_days: u32) -> i64 {
    i64::from(lookback_days) * 7 / 5 + 10
}

fn value_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

fn parse_chart(ticker: &str, resp: ChartResponse) -> Result<Vec<PriceBar>, ProviderError> {
    if let Some(err) = resp.chart.error {
        return Err(if err.code.eq_ignore_ascii_case("Not Found") {
            ProviderError::SymbolNotFound(ticker.to_string())
        } else {
            ProviderError::Malformed(format!("{}: {}", err.code, err.description))
        });
    }

    let data = resp
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or(ProviderError::Empty)?;
    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("no quote data".into()))?;
    let offset = data.meta.gmtoffset;

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        // Non-trading days and partial rows come back as nulls
        let (Some(open), Some(high), Some(low), Some(close)) = (
            value_at(&quote.open, i),
            value_at(&quote.high, i),
            value_at(&quote.low, i),
            value_at(&quote.close, i),
        ) else {
            continue;
        };
        let date = trade_date_from_unix(ts, offset)
            .ok_or_else(|| ProviderError::Malformed(format!("invalid timestamp: {}", ts)))?;
        bars.push(PriceBar {
            date,
            open,
            high,
            low,
            close,
            volume: value_at(&quote.volume, i).unwrap_or(0.0),
        });
    }

    if bars.is_empty() {
        return Err(ProviderError::Empty);
    }
    Ok(bars)
}

#[async_trait::async_trait]
impl PriceProvider for YahooProvider {
    fn id(&self) -> &str {
        "yahoo"
    }

    async fn fetch_raw(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let ticker = yahoo_ticker(symbol);
        let url = self.chart_url(&ticker, lookback_days);
        debug!(%symbol, %ticker, "Requesting yahoo chart");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::SymbolNotFound(ticker));
        }
        if !status.is_success() {
            return Err(ProviderError::HttpStatus(status.as_u16()));
        }

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        parse_chart(&ticker, body)
    }
}
