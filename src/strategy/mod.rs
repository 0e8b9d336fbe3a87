// Signal generation module
pub mod breakout;
pub mod technical;

pub use breakout::BreakoutParams;
pub use technical::TechnicalParams;

use serde::{Deserialize, Serialize};

use crate::models::{Candle, Signal};

/// Capability shared by every strategy variant
pub trait SignalStrategy: Send + Sync {
    /// Evaluate the candle history (oldest first) into a trade signal
    fn evaluate(&self, candles: &[Candle]) -> Signal;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}

/// Strategy selected for a runner, with its parameters
///
/// Only evaluated when a new candle opens, never on intra-candle ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignalEngine {
    Technical(TechnicalParams),
    Breakout(BreakoutParams),
}

impl SignalEngine {
    fn inner(&self) -> &dyn SignalStrategy {
        match self {
            SignalEngine::Technical(params) => params,
            SignalEngine::Breakout(params) => params,
        }
    }
}

impl SignalStrategy for SignalEngine {
    fn evaluate(&self, candles: &[Candle]) -> Signal {
        self.inner().evaluate(candles)
    }

    fn name(&self) -> &str {
        self.inner().name()
    }

    fn min_candles_required(&self) -> usize {
        self.inner().min_candles_required()
    }
}
