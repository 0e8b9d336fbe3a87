use super::moving_average::calculate_ema_series;

/// MACD line and its signal line at one point of the series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
}

impl Macd {
    pub fn histogram(&self) -> f64 {
        self.line - self.signal
    }
}

/// Calculate MACD for every price in the series
///
/// `line = EMA(fast) - EMA(slow)` and `signal = EMA(line, signal_span)`.
pub fn calculate_macd_series(
    prices: &[f64],
    fast: usize,
    slow: usize,
    signal_span: usize,
) -> Vec<Macd> {
    let ema_fast = calculate_ema_series(prices, fast);
    let ema_slow = calculate_ema_series(prices, slow);

    let lines: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signals = calculate_ema_series(&lines, signal_span);

    lines
        .into_iter()
        .zip(signals)
        .map(|(line, signal)| Macd { line, signal })
        .collect()
}
