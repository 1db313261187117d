// Trend classification and plain-language signal summaries fed to the LLM prompt
use crate::analyzer::market_indicators::MarketIndicators;
use crate::model::{BollingerBands, MacdValues, TrendStatus};
use std::collections::BTreeMap;

/// Full indicator series of one evaluation; the last slot is the snapshot bar.
pub struct IndicatorSeries<'a> {
    pub closes: &'a [f64],
    pub moving_averages: BTreeMap<usize, Vec<Option<f64>>>,
    pub macd: Vec<Option<MacdValues>>,
    pub bollinger: Vec<Option<BollingerBands>>,
    pub rsi: BTreeMap<usize, Vec<Option<f64>>>,
}

impl IndicatorSeries<'_> {
    fn last_two<T: Copy>(values: &[Option<T>]) -> Option<(T, T)> {
        match values {
            [.., Some(prev), Some(cur)] => Some((*prev, *cur)),
            _ => None,
        }
    }

    fn last<T: Copy>(values: &[Option<T>]) -> Option<T> {
        values.last().copied().flatten()
    }
}

/// Close vs the fast MA decides up/down; agreement with the slow MA strengthens it,
/// disagreement or a close hugging the middle band means sideways.
pub fn trend_status(
    series: &IndicatorSeries<'_>,
    fast_period: usize,
    slow_period: usize,
    sideways_band_pct: f64,
) -> TrendStatus {
    let Some(&close) = series.closes.last() else {
        return TrendStatus::Sideways;
    };
    let fast = MarketIndicators::sma_at(series.closes, fast_period, 0);
    let slow = MarketIndicators::sma_at(series.closes, slow_period, 0);

    let mut status = match (fast, slow) {
        (Some(f), Some(s)) if close > f && f > s => TrendStatus::StrongUptrend,
        (Some(f), Some(s)) if close < f && f < s => TrendStatus::WeakDowntrend,
        (Some(_), Some(_)) => TrendStatus::Sideways,
        (Some(f), None) if close > f => TrendStatus::Uptrend,
        (Some(_), None) => TrendStatus::Downtrend,
        (None, _) => TrendStatus::Sideways,
    };

    if let Some(bands) = IndicatorSeries::last(&series.bollinger) {
        let middle = bands.middle_band;
        if middle > 0.0 && ((close - middle).abs() / middle) * 100.0 < sideways_band_pct {
            status = TrendStatus::Sideways;
        }
    }
    status
}

pub fn describe(series: &IndicatorSeries<'_>, oscillation_lookback: usize) -> Vec<String> {
    let mut signals = Vec::new();
    describe_moving_averages(series, &mut signals);
    describe_macd(series, &mut signals);
    describe_bollinger(series, oscillation_lookback, &mut signals);
    describe_rsi(series, &mut signals);
    signals
}

fn describe_moving_averages(series: &IndicatorSeries<'_>, out: &mut Vec<String>) {
    let Some(&close) = series.closes.last() else {
        return;
    };

    for (period, values) in &series.moving_averages {
        if let Some(ma) = IndicatorSeries::last(values) {
            let side = if close > ma { "above" } else { "below" };
            out.push(format!("Close is {} the {}-day moving average.", side, period));
        }
    }

    let periods: Vec<&usize> = series.moving_averages.keys().collect();
    for pair in periods.windows(2) {
        let (short, long) = (*pair[0], *pair[1]);
        let crossed = IndicatorSeries::last_two(&series.moving_averages[&short])
            .zip(IndicatorSeries::last_two(&series.moving_averages[&long]));
        let Some(((s_prev, s_cur), (l_prev, l_cur))) = crossed else {
            continue;
        };
        let text = if s_cur > l_cur && s_prev <= l_prev {
            format!("{}-day MA crossed above the {}-day MA (golden cross, bullish).", short, long)
        } else if s_cur < l_cur && s_prev >= l_prev {
            format!("{}-day MA crossed below the {}-day MA (death cross, bearish).", short, long)
        } else if s_cur > l_cur {
            format!("{}-day MA stays above the {}-day MA; bullish alignment continues.", short, long)
        } else {
            format!("{}-day MA stays below the {}-day MA; bearish alignment continues.", short, long)
        };
        out.push(text);
    }

    if let Some((&period, values)) = series.moving_averages.iter().next_back() {
        if let Some((prev, cur)) = IndicatorSeries::last_two(values) {
            let slope = if cur > prev {
                "rising (constructive longer-term trend)"
            } else if cur < prev {
                "falling (cautious longer-term trend)"
            } else {
                "flat (neutral longer-term trend)"
            };
            out.push(format!("The {}-day moving average is {}.", period, slope));
        }
    }
}

fn describe_macd(series: &IndicatorSeries<'_>, out: &mut Vec<String>) {
    let Some((prev, cur)) = IndicatorSeries::last_two(&series.macd) else {
        return;
    };

    out.push(
        if cur.macd_line > cur.signal_line && prev.macd_line <= prev.signal_line {
            "MACD crossed above its signal line (bullish)."
        } else if cur.macd_line < cur.signal_line && prev.macd_line >= prev.signal_line {
            "MACD crossed below its signal line (bearish)."
        } else if cur.macd_line > cur.signal_line {
            "MACD stays above its signal line."
        } else {
            "MACD stays below its signal line."
        }
        .to_string(),
    );

    out.push(
        if cur.macd_line > 0.0 {
            "MACD is above the zero axis; the market leans strong."
        } else if cur.macd_line < 0.0 {
            "MACD is below the zero axis; the market leans weak."
        } else {
            "MACD sits on the zero axis; the market is neutral."
        }
        .to_string(),
    );

    let (h_prev, h_cur) = (prev.histogram, cur.histogram);
    let histogram = if h_cur > 0.0 {
        if h_cur > h_prev {
            "Positive MACD histogram is expanding; bullish momentum is building."
        } else if h_cur < h_prev {
            "Positive MACD histogram is shrinking; bullish momentum is fading."
        } else {
            "Positive MACD histogram is unchanged."
        }
    } else if h_cur < 0.0 {
        if h_cur < h_prev {
            "Negative MACD histogram is expanding; bearish momentum is building."
        } else if h_cur > h_prev {
            "Negative MACD histogram is shrinking; bearish momentum is fading."
        } else {
            "Negative MACD histogram is unchanged."
        }
    } else {
        "MACD histogram is at zero; buyers and sellers are balanced."
    };
    out.push(histogram.to_string());
}

fn describe_bollinger(series: &IndicatorSeries<'_>, lookback: usize, out: &mut Vec<String>) {
    let (Some(&close), Some(bands)) = (series.closes.last(), IndicatorSeries::last(&series.bollinger))
    else {
        return;
    };

    if close > bands.upper_band {
        out.push("Close broke above the upper Bollinger band; short-term overbought, watch for a pullback.".into());
    } else if close < bands.lower_band {
        out.push("Close fell below the lower Bollinger band; short-term oversold, watch for a rebound.".into());
    } else if close > bands.middle_band {
        out.push("Close is above the middle Bollinger band; the trend leans strong.".into());
    } else if close < bands.middle_band {
        out.push("Close is below the middle Bollinger band; the trend leans weak.".into());
    }

    if middle_band_crossings(series, lookback) >= 2 {
        out.push("Close crossed the middle Bollinger band repeatedly in recent sessions; the market is range-bound.".into());
    }
}

/// Number of close/middle-band crossings between consecutive bars of the last `lookback` bars.
pub fn middle_band_crossings(series: &IndicatorSeries<'_>, lookback: usize) -> usize {
    let n = series.closes.len().min(series.bollinger.len());
    let window = lookback.min(n);
    if window < 2 {
        return 0;
    }
    (n - window + 1..n)
        .filter(|&i| {
            let (Some(prev_band), Some(cur_band)) = (series.bollinger[i - 1], series.bollinger[i])
            else {
                return false;
            };
            let (prev_close, cur_close) = (series.closes[i - 1], series.closes[i]);
            (prev_close <= prev_band.middle_band && cur_close > cur_band.middle_band)
                || (prev_close >= prev_band.middle_band && cur_close < cur_band.middle_band)
        })
        .count()
}

fn describe_rsi(series: &IndicatorSeries<'_>, out: &mut Vec<String>) {
    for (period, values) in &series.rsi {
        if let Some(rsi) = IndicatorSeries::last(values) {
            if rsi >= 70.0 {
                out.push(format!("RSI({}) at {:.1} is in overbought territory.", period, rsi));
            } else if rsi <= 30.0 {
                out.push(format!("RSI({}) at {:.1} is in oversold territory.", period, rsi));
            }
        }
    }
}
