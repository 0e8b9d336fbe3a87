// Tick-to-order execution: candle building, strategy runners and order lifecycle
pub mod candle_aggregator;
pub mod engine;
pub mod order_manager;
pub mod order_poller;
pub mod runner;
pub mod strategy_log;

pub use candle_aggregator::{BucketEvent, CandleAggregator};
pub use engine::Engine;
pub use order_manager::{quantize_to_lot, OrderLifecycleManager, RiskParams};
pub use order_poller::{EntryPoll, PollConfig};
pub use runner::{RunnerEvent, RunnerHandle, RunnerState, StrategyRunner};
pub use strategy_log::{LogEntry, StrategyLog};
