// Eastmoney daily kline API (A shares and mainland ETFs)
use crate::market_data::traits::PriceProvider;
use crate::model::{PriceBar, ProviderError};
use crate::normalizer::eastmoney_secid;
use crate::utils::parse_trade_date;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://push2his.eastmoney.com";

#[derive(Debug, Deserialize)]
struct KlineResponse {
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

pub struct EastmoneyProvider {
    client: Client,
    base_url: String,
}

impl EastmoneyProvider {
    pub fn new(client: Client, base_url: Option<&str>) -> Self {
        Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn build_url(&self, secid: &str, lookback_days: u32) -> String {
        // klt=101 daily bars, fqt=1 forward-adjusted, lmt = number of most recent bars
        format!(
            "{}/api/qt/stock/kline/get?secid={}&fields1=f1,f2,f3,f4,f5,f6\
             &fields2=f51,f52,f53,f54,f55,f56&klt=101&fqt=1&end=20500101&lmt={}",
            self.base_url, secid, lookback_days
        )
    }
}

/// One kline row: "date,open,close,high,low,volume[,...]".
fn parse_kline(row: &str) -> Result<PriceBar, ProviderError> {
    let fields: Vec<&str> = row.split(',').collect();
    if fields.len() < 6 {
        return Err(ProviderError::Malformed(format!("short kline row: {}", row)));
    }
    let date = parse_trade_date(fields[0])
        .ok_or_else(|| ProviderError::Malformed(format!("bad date in kline row: {}", row)))?;
    let num = |idx: usize| -> Result<f64, ProviderError> {
        fields[idx]
            .trim()
            .parse::<f64>()
            .map_err(|_| ProviderError::Malformed(format!("bad number in kline row: {}", row)))
    };
    Ok(PriceBar {
        date,
        open: num(1)?,
        close: num(2)?,
        high: num(3)?,
        low: num(4)?,
        volume: num(5)?,
    })
}

#[async_trait::async_trait]
impl PriceProvider for EastmoneyProvider {
    fn id(&self) -> &str {
        "eastmoney"
    }

    async fn fetch_raw(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let secid = eastmoney_secid(symbol)
            .ok_or_else(|| ProviderError::SymbolNotFound(symbol.to_string()))?;
        let url = self.build_url(&secid, lookback_days);
        debug!(%symbol, %secid, "Requesting eastmoney klines");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::HttpStatus(status.as_u16()));
        }

        let body: KlineResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let data = body
            .data
            .ok_or_else(|| ProviderError::SymbolNotFound(symbol.to_string()))?;
        if data.klines.is_empty() {
            return Err(ProviderError::Empty);
        }

        data.klines.iter().map(|row| parse_kline(row)).collect()
    }
}
