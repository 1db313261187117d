use crate::analyzer::market_indicators::{MarketIndicators, moving_averages};
use crate::analyzer::signals::{self, IndicatorSeries};
use crate::model::{IndicatorError, IndicatorSnapshot, PriceSeries};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ma_periods: Vec<usize>,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub rsi_periods: Vec<usize>,
    /// Fast and slow MA used to classify the trend.
    pub trend_fast_period: usize,
    pub trend_slow_period: usize,
    /// Close within this percentage of the middle band counts as sideways.
    pub sideways_band_pct: f64,
    pub oscillation_lookback: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ma_periods: vec![5, 10, 20, 60],
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_k: 2.0,
            rsi_periods: vec![6, 12, 24],
            trend_fast_period: 20,
            trend_slow_period: 60,
            sideways_band_pct: 0.5,
            oscillation_lookback: 5,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<(), IndicatorError> {
        if self.ma_periods.iter().any(|&p| p == 0) || self.rsi_periods.iter().any(|&p| p == 0) {
            return Err(IndicatorError::InvalidParameter(
                "periods must be greater than zero".into(),
            ));
        }
        if self.macd_fast == 0 || self.macd_signal == 0 || self.macd_fast >= self.macd_slow {
            return Err(IndicatorError::InvalidParameter(format!(
                "MACD periods must satisfy 0 < fast < slow and signal > 0 (got {}/{}/{})",
                self.macd_fast, self.macd_slow, self.macd_signal
            )));
        }
        if self.bollinger_period == 0 || !self.bollinger_k.is_finite() || self.bollinger_k < 0.0 {
            return Err(IndicatorError::InvalidParameter(
                "Bollinger period must be > 0 and k a non-negative number".into(),
            ));
        }
        if self.trend_fast_period == 0 || self.trend_slow_period == 0 {
            return Err(IndicatorError::InvalidParameter(
                "trend periods must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Bars needed before every configured indicator has a value at the last bar.
    pub fn required_window(&self) -> usize {
        let longest_ma = self.ma_periods.iter().copied().max().unwrap_or(0);
        let macd = self.macd_slow + self.macd_signal - 1;
        let longest_rsi = self.rsi_periods.iter().map(|p| p + 1).max().unwrap_or(0);
        longest_ma
            .max(macd)
            .max(self.bollinger_period)
            .max(longest_rsi)
            .max(1)
    }
}

/// Pure indicator computation over a validated price series.
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn required_window(&self) -> usize {
        self.config.required_window()
    }

    pub fn compute(&self, series: &PriceSeries) -> Result<IndicatorSnapshot, IndicatorError> {
        compute(series, &self.config)
    }
}

/// Snapshot at the last bar, or `InsufficientData` when the series is shorter than the required window.
pub fn compute(
    series: &PriceSeries,
    config: &IndicatorConfig,
) -> Result<IndicatorSnapshot, IndicatorError> {
    config.validate()?;

    let required = config.required_window();
    let provided = series.len();
    let insufficient = IndicatorError::InsufficientData { required, provided };
    if provided < required {
        return Err(insufficient);
    }
    let Some(last_bar) = series.last() else {
        return Err(insufficient);
    };

    let closes = series.closes();
    let indicator_series = IndicatorSeries {
        closes: &closes,
        moving_averages: config
            .ma_periods
            .iter()
            .map(|&p| (p, MarketIndicators::sma_series(&closes, p)))
            .collect(),
        macd: MarketIndicators::macd_series(
            &closes,
            config.macd_fast,
            config.macd_slow,
            config.macd_signal,
        ),
        bollinger: MarketIndicators::bollinger_series(
            &closes,
            config.bollinger_period,
            config.bollinger_k,
        ),
        rsi: config
            .rsi_periods
            .iter()
            .map(|&p| (p, MarketIndicators::rsi_series(&closes, p)))
            .collect(),
    };

    let moving_averages = moving_averages(&closes, &config.ma_periods);
    let rsi = latest_values(&indicator_series.rsi);
    let (Some(macd), Some(bollinger)) = (
        indicator_series.macd.last().copied().flatten(),
        indicator_series.bollinger.last().copied().flatten(),
    ) else {
        return Err(insufficient);
    };

    let change_pct = match closes.as_slice() {
        [.., prev, last] if *prev > 0.0 => Some((last - prev) / prev * 100.0),
        _ => None,
    };

    Ok(IndicatorSnapshot {
        as_of: last_bar.date,
        last_close: last_bar.close,
        change_pct,
        moving_averages,
        macd,
        bollinger,
        rsi,
        trend: signals::trend_status(
            &indicator_series,
            config.trend_fast_period,
            config.trend_slow_period,
            config.sideways_band_pct,
        ),
        signals: signals::describe(&indicator_series, config.oscillation_lookback),
    })
}

fn latest_values(series: &BTreeMap<usize, Vec<Option<f64>>>) -> BTreeMap<usize, f64> {
    series
        .iter()
        .filter_map(|(&period, values)| values.last().copied().flatten().map(|v| (period, v)))
        .collect()
}
