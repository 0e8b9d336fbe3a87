use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::{Candle, Tick, Timeframe};

/// Tick timestamps further behind the wall clock than this are reported
pub const MAX_CLOCK_SKEW_MS: i64 = 2_000;

/// Outcome of feeding one tick to the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketEvent {
    /// Tick updated the forming candle
    SameBucket,
    /// Tick opened a new candle, after `gap_count` flat filler candles
    NewBucket { gap_count: usize },
}

impl BucketEvent {
    pub fn is_new_bucket(&self) -> bool {
        matches!(self, BucketEvent::NewBucket { .. })
    }
}

/// Builds the candle history of one (instrument, timeframe) pair from ticks
///
/// The history is seeded from historical candles and only ever grows. The
/// newest candle is the one still forming.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    symbol: String,
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl CandleAggregator {
    /// Create an aggregator seeded with `history` (oldest first)
    ///
    /// An empty history is a configuration defect and is rejected.
    pub fn new(symbol: &str, timeframe: Timeframe, history: Vec<Candle>) -> Result<Self> {
        if history.is_empty() {
            return Err(Error::EmptyHistory {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }

        Ok(Self {
            symbol: symbol.to_string(),
            timeframe,
            candles: history,
        })
    }

    /// Fold a live tick into the history
    pub fn process(&mut self, tick: &Tick) -> BucketEvent {
        if let Some(skew) = clock_skew_ms(Utc::now().timestamp_millis(), tick.timestamp_ms) {
            tracing::warn!(
                symbol = %self.symbol,
                skew_ms = skew,
                "Milliseconds of difference between the current time and the trade time"
            );
        }

        let width = self.timeframe.width_ms();
        let last = self.last_candle_mut();
        let bucket_start = last.bucket_start_ms;

        // Same bucket (right-open boundary)
        if tick.timestamp_ms < bucket_start + width {
            last.close = tick.price;
            last.volume += tick.size;
            last.high = last.high.max(tick.price);
            last.low = last.low.min(tick.price);
            return BucketEvent::SameBucket;
        }

        // Missing bucket(s): forward-fill with flat candles at the last close
        let mut gap_count = 0;
        if tick.timestamp_ms >= bucket_start + 2 * width {
            gap_count = ((tick.timestamp_ms - bucket_start) / width - 1) as usize;
            let fill_price = last.close;

            tracing::info!(
                symbol = %self.symbol,
                timeframe = %self.timeframe,
                missing = gap_count,
                tick_ts = tick.timestamp_ms,
                last_bucket = bucket_start,
                "Filling missing candles"
            );

            for i in 1..=gap_count as i64 {
                self.candles
                    .push(Candle::flat(bucket_start + i * width, fill_price));
            }
        }

        let new_start = bucket_start + (gap_count as i64 + 1) * width;
        self.candles
            .push(Candle::from_tick(new_start, tick.price, tick.size));

        tracing::debug!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            bucket_start = new_start,
            "New candle"
        );

        BucketEvent::NewBucket { gap_count }
    }

    fn last_candle_mut(&mut self) -> &mut Candle {
        self.candles
            .last_mut()
            .expect("candle history is seeded at construction and never shrinks")
    }

    /// Full history, oldest first
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Close of the forming candle
    pub fn last_close(&self) -> f64 {
        self.candles.last().map(|c| c.close).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

/// How far `tick_ts` lags `now_ms`, if that lag is worth reporting
pub fn clock_skew_ms(now_ms: i64, tick_ts: i64) -> Option<i64> {
    let diff = now_ms - tick_ts;
    (diff >= MAX_CLOCK_SKEW_MS).then_some(diff)
}
