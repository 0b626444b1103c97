/// Return val if it is finite, otherwise return default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(finite_or(sum / period as f64, 0.0));
    }
    result
}

/// Exponential Moving Average
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    // Not enough data for a full SMA seed -- return partial SMA
    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0)];
    }

    // Seed: SMA over the first `period` elements
    let sma_seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    let sma_seed = finite_or(sma_seed, 0.0);

    let mut result = vec![sma_seed];
    for val in &data[period..] {
        let prev = *result.last().unwrap_or(&sma_seed);
        let ema_val = (val - prev) * multiplier + prev;
        result.push(finite_or(ema_val, prev));
    }

    result
}

/// Relative Strength Index using Wilder's smoothing. Latest value only.
pub fn rsi(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = data.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = deltas[..period]
        .iter()
        .map(|d| if *d > 0.0 { *d } else { 0.0 })
        .sum::<f64>()
        / period as f64;
    let mut avg_loss = deltas[..period]
        .iter()
        .map(|d| if *d < 0.0 { -*d } else { 0.0 })
        .sum::<f64>()
        / period as f64;

    for d in &deltas[period..] {
        let gain = if *d > 0.0 { *d } else { 0.0 };
        let loss = if *d < 0.0 { -*d } else { 0.0 };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(finite_or(100.0 - (100.0 / (1.0 + rs)), 50.0))
}

/// MACD line, signal line, histogram. Latest values only.
pub struct MacdResult {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

pub fn macd(data: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal_period == 0 || slow < fast {
        return None;
    }
    if data.len() < slow + signal_period {
        return None;
    }

    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);

    // Align fast EMA to the same start index as the slow EMA
    let offset = slow - fast;
    if offset > ema_fast.len() {
        return None;
    }
    let aligned_fast = &ema_fast[offset..];

    let min_len = aligned_fast.len().min(ema_slow.len());
    let macd_series: Vec<f64> = (0..min_len)
        .map(|i| aligned_fast[i] - ema_slow[i])
        .collect();

    if macd_series.len() < signal_period {
        return None;
    }

    let signal_series = ema(&macd_series, signal_period);
    let macd_line = *macd_series.last()?;
    let signal_line = *signal_series.last()?;

    Some(MacdResult {
        macd_line,
        signal_line,
        histogram: macd_line - signal_line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Helper function to create sample price data
    fn sample_prices() -> Vec<f64> {
        vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ]
    }

    #[test]
    fn test_sma_basic() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&data, 3);

        assert_eq!(result.len(), 3);
        assert!((result[0] - 2.0).abs() < 0.001); // (1+2+3)/3 = 2
        assert!((result[1] - 3.0).abs() < 0.001); // (2+3+4)/3 = 3
        assert!((result[2] - 4.0).abs() < 0.001); // (3+4+5)/3 = 4
    }

    #[test]
    fn test_sma_insufficient_data() {
        let data = vec![1.0, 2.0];
        assert!(sma(&data, 5).is_empty());
    }

    #[test]
    fn test_ema_seeds_with_sma() {
        let data = vec![22.0, 24.0, 23.0, 25.0, 26.0];
        let result = ema(&data, 3);

        let first_sma = (22.0 + 24.0 + 23.0) / 3.0;
        assert!((result[0] - first_sma).abs() < 0.01);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_ema_tracks_uptrend() {
        let data: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let result = ema(&data, 3);
        assert!(result.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_rsi_range_and_direction() {
        let prices = sample_prices();
        let value = rsi(&prices, 14).unwrap();
        assert!((0.0..=100.0).contains(&value));

        // Monotone rise drives RSI to the ceiling.
        let rising: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        assert_eq!(rsi(&rising, 14).unwrap(), 100.0);

        // Monotone fall drives RSI to the floor.
        let falling: Vec<f64> = (1..=30).rev().map(|i| i as f64).collect();
        assert!(rsi(&falling, 14).unwrap() < 1.0);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        assert!(rsi(&[1.0, 2.0, 3.0], 14).is_none());
    }

    #[test]
    fn test_macd_sign_follows_trend() {
        let rising: Vec<f64> = (1..=60).map(|i| i as f64).collect();
        let result = macd(&rising, 12, 26, 9).unwrap();
        assert!(result.macd_line > 0.0);

        let falling: Vec<f64> = (1..=60).rev().map(|i| i as f64).collect();
        let result = macd(&falling, 12, 26, 9).unwrap();
        assert!(result.macd_line < 0.0);
    }

    #[test]
    fn test_macd_needs_slow_plus_signal_candles() {
        let data: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        assert!(macd(&data, 12, 26, 9).is_none());

        let data: Vec<f64> = (1..=35).map(|i| i as f64).collect();
        assert!(macd(&data, 12, 26, 9).is_some());
    }

    #[test]
    fn test_macd_histogram_consistent() {
        let prices: Vec<f64> = (1..=80).map(|i| (i as f64 * 0.3).sin() * 5.0 + 50.0).collect();
        let result = macd(&prices, 12, 26, 9).unwrap();
        assert!((result.histogram - (result.macd_line - result.signal_line)).abs() < 1e-9);
    }
}
