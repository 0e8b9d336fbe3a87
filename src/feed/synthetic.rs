use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, Tick, Timeframe};

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketScenario {
    /// Slow upward drift with noise
    Uptrend,
    /// Slow downward drift with noise
    Downtrend,
    /// Mean-reverting chop around the start price
    Sideways,
    /// Large swings in both directions
    Volatile,
}

/// Seeded random-walk tick generator
///
/// Used by the paper exchange to produce both a candle history and the
/// live tick stream that continues from it.
pub struct SyntheticTickGenerator {
    rng: StdRng,
    scenario: MarketScenario,
    anchor_price: f64,
    price: f64,
    base_size: f64,
}

impl SyntheticTickGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64, start_price: f64, scenario: MarketScenario) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            scenario,
            anchor_price: start_price,
            price: start_price,
            base_size: 1.0,
        }
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    /// Advance the walk by one step and return the new price
    fn step(&mut self) -> f64 {
        let change_pct = match self.scenario {
            MarketScenario::Uptrend => 0.0002 + self.rng.gen_range(-0.001..0.001),
            MarketScenario::Downtrend => -0.0002 + self.rng.gen_range(-0.001..0.001),
            MarketScenario::Sideways => {
                // Pull back towards the anchor
                let deviation = (self.price - self.anchor_price) / self.anchor_price;
                -deviation * 0.05 + self.rng.gen_range(-0.001..0.001)
            }
            MarketScenario::Volatile => self.rng.gen_range(-0.005..0.005),
        };

        self.price = (self.price * (1.0 + change_pct)).max(f64::EPSILON);
        self.price
    }

    /// Next live tick stamped at `timestamp_ms`
    pub fn next_tick(&mut self, timestamp_ms: i64) -> Tick {
        let price = self.step();
        let size = self.base_size * self.rng.gen_range(0.0..2.0);
        Tick::new(price, size, timestamp_ms)
    }

    /// Generate `count` consecutive candles whose last bucket starts at
    /// `last_bucket_start_ms`
    ///
    /// # Returns
    /// Candles oldest first; the walk continues from the last close.
    pub fn history(
        &mut self,
        timeframe: Timeframe,
        last_bucket_start_ms: i64,
        count: usize,
    ) -> Vec<Candle> {
        let width = timeframe.width_ms();
        let first_start = last_bucket_start_ms - (count as i64 - 1) * width;

        (0..count as i64)
            .map(|i| {
                let open = self.price;
                let mut candle = Candle::from_tick(first_start + i * width, open, 0.0);
                for _ in 0..6 {
                    let price = self.step();
                    candle.high = candle.high.max(price);
                    candle.low = candle.low.min(price);
                    candle.close = price;
                    candle.volume += self.base_size * self.rng.gen_range(0.0..2.0);
                }
                candle
            })
            .collect()
    }
}
