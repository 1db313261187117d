use crate::model::{BollingerBands, MacdValues};
use std::collections::BTreeMap;

/// Series-wise indicator math. Every function returns one slot per input
/// point; slots without enough history are `None`.
pub struct MarketIndicators;

impl MarketIndicators {
    /// Arithmetic mean. A flat window returns its value exactly.
    pub fn mean(window: &[f64]) -> f64 {
        match window.first() {
            None => 0.0,
            Some(&first) if window.iter().all(|&v| v == first) => first,
            Some(_) => window.iter().sum::<f64>() / window.len() as f64,
        }
    }

    /// Population standard deviation; zero for flat windows.
    pub fn population_std_dev(window: &[f64]) -> f64 {
        if window.len() < 2 {
            return 0.0;
        }
        let mean = Self::mean(window);
        let variance =
            window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / window.len() as f64;
        if variance > 0.0 { variance.sqrt() } else { 0.0 }
    }

    /// Calculates the moving average of a slice of data with the given window size.
    pub fn moving_average(data: &[f64], window_size: usize) -> Vec<f64> {
        if window_size == 0 || data.len() < window_size {
            return Vec::new();
        }
        data.windows(window_size).map(Self::mean).collect()
    }

    pub fn sma_series(data: &[f64], period: usize) -> Vec<Option<f64>> {
        let mut result = vec![None; data.len()];
        if period == 0 || data.len() < period {
            return result;
        }
        for (offset, value) in Self::moving_average(data, period).into_iter().enumerate() {
            result[offset + period - 1] = Some(value);
        }
        result
    }

    /// SMA of the window ending `back` bars before the last one.
    pub fn sma_at(data: &[f64], period: usize, back: usize) -> Option<f64> {
        let end = data.len().checked_sub(back)?;
        if period == 0 || end < period {
            return None;
        }
        Some(Self::mean(&data[end - period..end]))
    }

    /// EMA seeded with the SMA of the first `period` points, k = 2 / (period + 1).
    pub fn ema_series(data: &[f64], period: usize) -> Vec<Option<f64>> {
        let mut result = vec![None; data.len()];
        if period == 0 || data.len() < period {
            return result;
        }
        let k = 2.0 / (period as f64 + 1.0);
        let mut prev = Self::mean(&data[..period]);
        result[period - 1] = Some(prev);
        for (i, &price) in data.iter().enumerate().skip(period) {
            prev += k * (price - prev);
            result[i] = Some(prev);
        }
        result
    }

    /// MACD line = EMA(fast) - EMA(slow); signal = EMA(signal) of the MACD line.
    pub fn macd_series(
        data: &[f64],
        fast: usize,
        slow: usize,
        signal: usize,
    ) -> Vec<Option<MacdValues>> {
        let mut result = vec![None; data.len()];
        if fast == 0 || slow == 0 || signal == 0 || data.len() < slow {
            return result;
        }
        let fast_ema = Self::ema_series(data, fast);
        let slow_ema = Self::ema_series(data, slow);

        let start = slow.max(fast) - 1;
        let macd_line: Vec<f64> = (start..data.len())
            .filter_map(|i| match (fast_ema[i], slow_ema[i]) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            })
            .collect();
        let signal_line = Self::ema_series(&macd_line, signal);

        for (offset, (line, sig)) in macd_line.iter().zip(signal_line).enumerate() {
            if let Some(sig) = sig {
                result[start + offset] = Some(MacdValues {
                    macd_line: *line,
                    signal_line: sig,
                    histogram: line - sig,
                });
            }
        }
        result
    }

    /// Middle band = SMA(period); bands = middle ± k·σ (population σ).
    pub fn bollinger(window: &[f64], k: f64) -> BollingerBands {
        let middle = Self::mean(window);
        let sigma = Self::population_std_dev(window);
        if sigma == 0.0 {
            return BollingerBands {
                upper_band: middle,
                middle_band: middle,
                lower_band: middle,
            };
        }
        BollingerBands {
            upper_band: middle + k * sigma,
            middle_band: middle,
            lower_band: middle - k * sigma,
        }
    }

    pub fn bollinger_series(data: &[f64], period: usize, k: f64) -> Vec<Option<BollingerBands>> {
        let mut result = vec![None; data.len()];
        if period == 0 || data.len() < period {
            return result;
        }
        for (offset, window) in data.windows(period).enumerate() {
            result[offset + period - 1] = Some(Self::bollinger(window, k));
        }
        result
    }

    /// RSI with Wilder smoothing (alpha = 1/period) seeded at the first change.
    /// Values start once `period` changes have been observed.
    pub fn rsi_series(data: &[f64], period: usize) -> Vec<Option<f64>> {
        let mut result = vec![None; data.len()];
        if period == 0 || data.len() <= period {
            return result;
        }
        let n = period as f64;
        let mut avg_gain = 0.0;
        let mut avg_loss = 0.0;
        for i in 1..data.len() {
            let delta = data[i] - data[i - 1];
            let gain = delta.max(0.0);
            let loss = (-delta).max(0.0);
            if i == 1 {
                avg_gain = gain;
                avg_loss = loss;
            } else {
                avg_gain += (gain - avg_gain) / n;
                avg_loss += (loss - avg_loss) / n;
            }
            if i >= period {
                result[i] = Some(Self::rsi_from_averages(avg_gain, avg_loss));
            }
        }
        result
    }

    fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
        if avg_gain + avg_loss == 0.0 {
            return 50.0;
        }
        if avg_loss == 0.0 {
            return 100.0;
        }
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}

/// Latest SMA for each period that has enough history; shorter periods are omitted, never padded.
pub fn moving_averages(closes: &[f64], periods: &[usize]) -> BTreeMap<usize, f64> {
    periods
        .iter()
        .filter_map(|&p| MarketIndicators::sma_at(closes, p, 0).map(|v| (p, v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn sma_pads_leading_slots() {
        let sma = MarketIndicators::sma_series(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(sma, vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn ema_seeds_with_sma() {
        let ema = MarketIndicators::ema_series(&[2.0, 4.0, 6.0, 8.0], 3);
        assert_eq!(ema[1], None);
        assert!(approx(ema[2].unwrap(), 4.0));
        // k = 0.5 -> 4 + 0.5 * (8 - 4)
        assert!(approx(ema[3].unwrap(), 6.0));
    }

    #[test]
    fn macd_of_flat_series_is_zero() {
        let data = vec![12.34; 40];
        let macd = MarketIndicators::macd_series(&data, 12, 26, 9);
        assert!(macd[32].is_none());
        let last = macd[39].unwrap();
        assert_eq!(last.macd_line, 0.0);
        assert_eq!(last.signal_line, 0.0);
        assert_eq!(last.histogram, 0.0);
    }

    #[test]
    fn macd_first_value_needs_slow_plus_signal_minus_one() {
        let data: Vec<f64> = (0..34).map(|i| 10.0 + i as f64).collect();
        let macd = MarketIndicators::macd_series(&data, 12, 26, 9);
        assert!(macd[32].is_none());
        assert!(macd[33].is_some());
        assert!(macd[33].unwrap().macd_line > 0.0);
    }

    #[test]
    fn bollinger_uses_population_sigma() {
        let bands = MarketIndicators::bollinger(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 2.0);
        assert!(approx(bands.middle_band, 5.0));
        assert!(approx(bands.upper_band, 9.0));
        assert!(approx(bands.lower_band, 1.0));
    }

    #[test]
    fn flat_window_collapses_bands() {
        let bands = MarketIndicators::bollinger(&[0.1; 20], 2.0);
        assert_eq!(bands.upper_band, 0.1);
        assert_eq!(bands.middle_band, 0.1);
        assert_eq!(bands.lower_band, 0.1);
    }

    #[test]
    fn rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(MarketIndicators::rsi_series(&rising, 6)[19], Some(100.0));

        let flat = vec![3.0; 20];
        assert_eq!(MarketIndicators::rsi_series(&flat, 6)[19], Some(50.0));

        let falling: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(MarketIndicators::rsi_series(&falling, 6)[19], Some(0.0));
    }

    #[test]
    fn rsi_starts_after_period_changes() {
        let data: Vec<f64> = (0..10).map(|i| (i % 3) as f64).collect();
        let rsi = MarketIndicators::rsi_series(&data, 6);
        assert!(rsi[5].is_none());
        assert!(rsi[6].is_some());
    }

    #[test]
    fn moving_averages_omit_short_history() {
        let closes: Vec<f64> = (1..=12).map(|i| i as f64).collect();
        let mas = moving_averages(&closes, &[5, 10, 20]);
        assert_eq!(mas.len(), 2);
        assert!(approx(mas[&5], 10.0));
        assert!(approx(mas[&10], 7.5));
        assert!(!mas.contains_key(&20));
    }
}
