use serde::{Deserialize, Serialize};

use super::SignalStrategy;
use crate::indicators::{calculate_macd_series, calculate_rsi_series, Macd};
use crate::models::{Candle, Signal};

pub const RSI_OVERSOLD: f64 = 30.0;
pub const RSI_OVERBOUGHT: f64 = 70.0;

/// RSI + MACD confirmation strategy
///
/// Goes long when the market is oversold and MACD has crossed above its
/// signal line, short when overbought and MACD is below its signal line.
/// Indicators are read on the last fully closed candle; the newest candle
/// is still forming and is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalParams {
    pub rsi_length: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_signal: usize,
}

impl Default for TechnicalParams {
    fn default() -> Self {
        Self {
            rsi_length: 14,
            ema_fast: 12,
            ema_slow: 26,
            ema_signal: 9,
        }
    }
}

impl TechnicalParams {
    /// Extract closes from candles
    fn extract_closes(candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| c.close).collect()
    }

    /// Apply the threshold rule; inequalities are strict
    pub fn decide(rsi: f64, macd: Macd) -> Signal {
        if rsi < RSI_OVERSOLD && macd.line > macd.signal {
            Signal::Long
        } else if rsi > RSI_OVERBOUGHT && macd.line < macd.signal {
            Signal::Short
        } else {
            Signal::Neutral
        }
    }
}

impl SignalStrategy for TechnicalParams {
    fn evaluate(&self, candles: &[Candle]) -> Signal {
        if candles.len() < self.min_candles_required() {
            tracing::debug!(
                candles = candles.len(),
                required = self.min_candles_required(),
                "Not enough candles for technical signal"
            );
            return Signal::Neutral;
        }

        let closes = Self::extract_closes(candles);
        let decision_idx = closes.len() - 2;

        let rsi = match calculate_rsi_series(&closes, self.rsi_length)[decision_idx] {
            Some(rsi) => rsi,
            None => return Signal::Neutral,
        };
        let macd = calculate_macd_series(&closes, self.ema_fast, self.ema_slow, self.ema_signal)
            [decision_idx];

        tracing::debug!(
            rsi = rsi,
            macd_line = macd.line,
            macd_signal = macd.signal,
            "Technical indicators"
        );

        Self::decide(rsi, macd)
    }

    fn name(&self) -> &str {
        "Technical"
    }

    fn min_candles_required(&self) -> usize {
        // rsi_length changes up to the closed candle, plus the forming one
        self.rsi_length + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                bucket_start_ms: i as i64 * 60_000,
                open: close,
                high: close,
                low: close,
                close,
                volume: 10.0,
            })
            .collect()
    }

    fn fast_params() -> TechnicalParams {
        TechnicalParams {
            rsi_length: 2,
            ema_fast: 2,
            ema_slow: 4,
            ema_signal: 2,
        }
    }

    #[test]
    fn test_rsi_boundaries_are_strict() {
        let bullish = Macd {
            line: 1.0,
            signal: 0.0,
        };
        let bearish = Macd {
            line: -1.0,
            signal: 0.0,
        };

        assert_eq!(TechnicalParams::decide(30.0, bullish), Signal::Neutral);
        assert_eq!(TechnicalParams::decide(29.99, bullish), Signal::Long);
        assert_eq!(TechnicalParams::decide(70.0, bearish), Signal::Neutral);
        assert_eq!(TechnicalParams::decide(70.01, bearish), Signal::Short);
    }

    #[test]
    fn test_requires_macd_confirmation() {
        let flat = Macd {
            line: 0.5,
            signal: 0.5,
        };
        assert_eq!(TechnicalParams::decide(10.0, flat), Signal::Neutral);
        assert_eq!(TechnicalParams::decide(90.0, flat), Signal::Neutral);

        let bearish = Macd {
            line: -1.0,
            signal: 0.0,
        };
        assert_eq!(TechnicalParams::decide(10.0, bearish), Signal::Neutral);
    }

    #[test]
    fn test_insufficient_data_is_neutral() {
        let params = TechnicalParams::default();
        let candles = create_test_candles(&[100.0, 101.0, 102.0]);
        assert_eq!(params.evaluate(&candles), Signal::Neutral);
    }

    #[test]
    fn test_long_on_oversold_bounce() {
        // steady decline, then a small bounce on the last closed candle
        let mut closes: Vec<f64> = (0..16).map(|i| 100.0 - i as f64).collect();
        closes.push(85.2);
        closes.push(85.2); // forming candle

        let candles = create_test_candles(&closes);
        assert_eq!(fast_params().evaluate(&candles), Signal::Long);
    }

    #[test]
    fn test_short_on_overbought_dip() {
        let mut closes: Vec<f64> = (0..16).map(|i| 100.0 + i as f64).collect();
        closes.push(114.8);
        closes.push(114.8);

        let candles = create_test_candles(&closes);
        assert_eq!(fast_params().evaluate(&candles), Signal::Short);
    }

    #[test]
    fn test_steady_trends_stay_neutral() {
        // RSI is extreme but MACD never confirms against the trend
        let up: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = (0..40).map(|i| 200.0 - i as f64).collect();

        let params = TechnicalParams::default();
        assert_eq!(params.evaluate(&create_test_candles(&up)), Signal::Neutral);
        assert_eq!(params.evaluate(&create_test_candles(&down)), Signal::Neutral);
    }

    #[test]
    fn test_forming_candle_is_ignored() {
        let mut closes: Vec<f64> = (0..16).map(|i| 100.0 - i as f64).collect();
        closes.push(85.2);
        closes.push(10.0); // wild forming candle must not change the decision

        let candles = create_test_candles(&closes);
        assert_eq!(fast_params().evaluate(&candles), Signal::Long);
    }

    #[test]
    fn test_min_candles_required() {
        assert_eq!(TechnicalParams::default().min_candles_required(), 16);
    }
}
