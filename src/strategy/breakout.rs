use serde::{Deserialize, Serialize};

use super::SignalStrategy;
use crate::models::{Candle, Signal};

/// Range breakout confirmed by volume
///
/// Compares the last fully closed candle (the bucket that just completed)
/// against the one before it: a close beyond the previous candle's high
/// (low) on more than `min_volume` is a long (short) breakout. The newest
/// candle of the history is still forming and is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutParams {
    pub min_volume: f64,
}

impl SignalStrategy for BreakoutParams {
    fn evaluate(&self, candles: &[Candle]) -> Signal {
        let (previous, latest) = match candles {
            [.., previous, latest, _forming] => (previous, latest),
            _ => return Signal::Neutral,
        };

        let enough_volume = latest.volume > self.min_volume;

        if latest.close > previous.high && enough_volume {
            Signal::Long
        } else if latest.close < previous.low && enough_volume {
            Signal::Short
        } else {
            Signal::Neutral
        }
    }

    fn name(&self) -> &str {
        "Breakout"
    }

    fn min_candles_required(&self) -> usize {
        // two closed candles plus the forming one
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            bucket_start_ms: 0,
            open: close,
            high,
            low,
            close,
            volume,
        }
    }

    fn range_candle() -> Candle {
        candle(10.0, 8.0, 9.0, 3.0)
    }

    /// Bucket opened by a single tick
    fn forming_candle(price: f64) -> Candle {
        candle(price, price, price, 0.1)
    }

    fn history(completed: Candle) -> Vec<Candle> {
        vec![range_candle(), completed, forming_candle(10.4)]
    }

    #[test]
    fn test_long_breakout_with_volume() {
        let params = BreakoutParams { min_volume: 5.0 };
        let candles = history(candle(10.5, 10.5, 10.5, 6.0));
        assert_eq!(params.evaluate(&candles), Signal::Long);
    }

    #[test]
    fn test_breakout_without_volume_is_neutral() {
        let params = BreakoutParams { min_volume: 5.0 };
        let candles = history(candle(10.5, 10.5, 10.5, 4.0));
        assert_eq!(params.evaluate(&candles), Signal::Neutral);

        // volume must be strictly greater
        let candles = history(candle(10.5, 10.5, 10.5, 5.0));
        assert_eq!(params.evaluate(&candles), Signal::Neutral);
    }

    #[test]
    fn test_short_breakdown() {
        let params = BreakoutParams { min_volume: 5.0 };
        let candles = history(candle(7.5, 7.5, 7.5, 6.0));
        assert_eq!(params.evaluate(&candles), Signal::Short);
    }

    #[test]
    fn test_close_inside_range_is_neutral() {
        let params = BreakoutParams { min_volume: 5.0 };
        let candles = history(candle(10.0, 8.0, 10.0, 60.0));
        assert_eq!(params.evaluate(&candles), Signal::Neutral);
    }

    #[test]
    fn test_forming_candle_is_ignored() {
        let params = BreakoutParams { min_volume: 5.0 };

        // A freshly opened bucket with a big first tick is not a breakout yet
        let candles = vec![range_candle(), candle(10.5, 10.5, 10.5, 6.0)];
        assert_eq!(params.evaluate(&candles), Signal::Neutral);

        // Nor does a quiet forming candle cancel a completed breakout
        let mut candles = history(candle(10.5, 10.5, 10.5, 6.0));
        *candles.last_mut().unwrap() = forming_candle(7.0);
        assert_eq!(params.evaluate(&candles), Signal::Long);
    }

    #[test]
    fn test_needs_two_closed_candles() {
        let params = BreakoutParams { min_volume: 0.0 };
        assert_eq!(params.min_candles_required(), 3);
        assert_eq!(
            params.evaluate(&[range_candle(), forming_candle(11.0)]),
            Signal::Neutral
        );
        assert_eq!(params.evaluate(&[range_candle()]), Signal::Neutral);
        assert_eq!(params.evaluate(&[]), Signal::Neutral);
    }
}
