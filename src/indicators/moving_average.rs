/// Exponentially weighted mean of a series, one output per input
///
/// Uses bias-adjusted weights: the value at `t` is
/// `sum((1-alpha)^i * x[t-i]) / sum((1-alpha)^i)` over every observation so
/// far. Early values are therefore not dragged towards zero the way a
/// zero-seeded recursive EMA would be.
pub fn ewm_mean(values: &[f64], alpha: f64) -> Vec<f64> {
    let decay = 1.0 - alpha;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    values
        .iter()
        .map(|&value| {
            weighted_sum = value + decay * weighted_sum;
            weight_total = 1.0 + decay * weight_total;
            weighted_sum / weight_total
        })
        .collect()
}

/// Smoothing factor for an EMA of the given span
pub fn span_to_alpha(span: usize) -> f64 {
    2.0 / (span as f64 + 1.0)
}

/// Calculate an Exponential Moving Average series of `prices` at `span`
pub fn calculate_ema_series(prices: &[f64], span: usize) -> Vec<f64> {
    if span == 0 {
        return prices.to_vec();
    }
    ewm_mean(prices, span_to_alpha(span))
}

/// Latest EMA value, if any prices were given
pub fn calculate_ema(prices: &[f64], span: usize) -> Option<f64> {
    calculate_ema_series(prices, span).last().copied()
}
