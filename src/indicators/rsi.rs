use super::moving_average::ewm_mean;

/// Calculate the Relative Strength Index for every price in the series
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Gains and losses are smoothed Wilder-style (alpha = 1/period) and a
/// value is only produced once `period` price changes have been observed.
/// The output is aligned with `prices`; entries without enough history, or
/// where neither gains nor losses occurred, are `None`. Values are rounded
/// to 2 decimals.
pub fn calculate_rsi_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; prices.len()];
    if period == 0 || prices.len() < 2 {
        return series;
    }

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);

    // Calculate price changes
    for window in prices.windows(2) {
        let change = window[1] - window[0];
        gains.push(change.max(0.0));
        losses.push(change.min(0.0).abs());
    }

    let alpha = 1.0 / period as f64;
    let avg_gains = ewm_mean(&gains, alpha);
    let avg_losses = ewm_mean(&losses, alpha);

    for (i, (&avg_gain, &avg_loss)) in avg_gains.iter().zip(avg_losses.iter()).enumerate() {
        let observations = i + 1;
        if observations < period {
            continue;
        }
        series[i + 1] = rsi_from_averages(avg_gain, avg_loss);
    }

    series
}

/// RSI of the most recent price
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    calculate_rsi_series(prices, period).last().copied().flatten()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return None; // flat market, RSI undefined
        }
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    let rsi = 100.0 - (100.0 / (1.0 + rs));

    Some((rsi * 100.0).round() / 100.0)
}
