use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::StrategyConfig;
use crate::error::{Error, Result};
use crate::execution::candle_aggregator::CandleAggregator;
use crate::execution::order_manager::OrderLifecycleManager;
use crate::execution::order_poller::PollConfig;
use crate::execution::strategy_log::StrategyLog;
use crate::gateway::ExchangeGateway;
use crate::models::{Candle, Contract, OrderStatus, Signal, Tick, Timeframe, Trade, TradeStatus};
use crate::strategy::{SignalEngine, SignalStrategy};

const MAILBOX_CAPACITY: usize = 1024;

/// Message consumed by a runner task, in arrival order
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Tick(Tick),
    /// Entry order reported filled by its poll task
    EntryFilled { trade_id: Uuid, status: OrderStatus },
    /// Entry order canceled or rejected by the venue
    EntryAbandoned { trade_id: Uuid, status: OrderStatus },
    /// Poll budget spent without a terminal state
    PollExhausted { trade_id: Uuid, attempts: u32 },
    Shutdown,
}

/// Position state of a runner; at most one trade is ever active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    PendingEntry { trade_id: Uuid },
    OpenPosition { trade_id: Uuid },
}

/// One strategy running on one (contract, timeframe) pair
///
/// Ticks, fill reports and shutdown all arrive through a single mailbox and
/// are handled one at a time, so the trade list and the runner state are
/// only ever touched from this task.
pub struct StrategyRunner {
    aggregator: CandleAggregator,
    engine: SignalEngine,
    orders: OrderLifecycleManager,
    trades: Vec<Trade>,
    state: RunnerState,
    log: StrategyLog,
    // Released by `spawn` and `run`; owners and pollers keep the mailbox open
    events_tx: Option<mpsc::Sender<RunnerEvent>>,
    events_rx: mpsc::Receiver<RunnerEvent>,
}

impl StrategyRunner {
    /// Create a runner seeded with `history` (oldest first)
    pub fn new(
        config: &StrategyConfig,
        contract: Arc<Contract>,
        history: Vec<Candle>,
        gateway: Arc<dyn ExchangeGateway>,
        poll: PollConfig,
    ) -> Result<Self> {
        let aggregator = CandleAggregator::new(&contract.symbol, config.timeframe, history)?;
        let log = StrategyLog::new(&format!(
            "{} {} {}",
            config.strategy.name(),
            contract.symbol,
            config.timeframe
        ));
        let (events_tx, events_rx) = mpsc::channel(MAILBOX_CAPACITY);

        let orders = OrderLifecycleManager::new(
            gateway,
            contract,
            config.risk(),
            poll,
            events_tx.downgrade(),
            log.clone(),
        );

        Ok(Self {
            aggregator,
            engine: config.strategy.clone(),
            orders,
            trades: Vec::new(),
            state: RunnerState::Idle,
            log,
            events_tx: Some(events_tx),
            events_rx,
        })
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn log(&self) -> &StrategyLog {
        &self.log
    }

    pub fn candles(&self) -> &[Candle] {
        self.aggregator.candles()
    }

    pub fn symbol(&self) -> &str {
        self.aggregator.symbol()
    }

    pub fn timeframe(&self) -> Timeframe {
        self.aggregator.timeframe()
    }

    /// Trade currently counting against the one-position limit
    pub fn active_trade(&self) -> Option<&Trade> {
        self.trades.iter().find(|t| t.is_active())
    }

    /// Wait for the next mailbox message
    pub async fn next_event(&mut self) -> Option<RunnerEvent> {
        self.events_rx.recv().await
    }

    /// Handle one mailbox message
    ///
    /// # Returns
    /// `false` once the runner should stop
    pub async fn handle_event(&mut self, event: RunnerEvent) -> bool {
        match event {
            RunnerEvent::Tick(tick) => self.process_tick(tick).await,
            RunnerEvent::EntryFilled { trade_id, status } => {
                if let Some(trade) = pending_trade_mut(&mut self.trades, trade_id) {
                    self.orders.apply_fill(trade, &status);
                    self.state = RunnerState::OpenPosition { trade_id };
                }
            }
            RunnerEvent::EntryAbandoned { trade_id, status } => {
                if let Some(trade) = pending_trade_mut(&mut self.trades, trade_id) {
                    self.orders.abandon(trade, &status);
                    self.state = RunnerState::Idle;
                }
            }
            RunnerEvent::PollExhausted { trade_id, attempts } => {
                // The trade stays pending; nothing here can tell whether it filled
                self.orders.cancel_poll(trade_id);
                tracing::error!(
                    symbol = %self.aggregator.symbol(),
                    trade_id = %trade_id,
                    attempts = attempts,
                    "Entry order left pending"
                );
            }
            RunnerEvent::Shutdown => return false,
        }
        true
    }

    /// Fold one tick into the candle history, manage exits and act on signals
    pub async fn process_tick(&mut self, tick: Tick) {
        let event = self.aggregator.process(&tick);
        let close = self.aggregator.last_close();

        for trade in self
            .trades
            .iter_mut()
            .filter(|t| t.status == TradeStatus::Open)
        {
            trade.pnl = trade.pnl_at(close);

            let Some(reason) = self.orders.check_exit(trade, close) else {
                continue;
            };
            if self.orders.exit(trade, close, reason).await {
                self.state = RunnerState::Idle;
            }
        }

        if !event.is_new_bucket() || self.state != RunnerState::Idle {
            return;
        }

        let signal = self.engine.evaluate(self.aggregator.candles());
        if signal == Signal::Neutral {
            return;
        }

        self.log.info(format!(
            "{:?} signal on {} {}",
            signal,
            self.aggregator.symbol(),
            self.aggregator.timeframe()
        ));

        if let Some(trade) = self.orders.open(signal, close).await {
            self.state = match trade.status {
                TradeStatus::Open => RunnerState::OpenPosition { trade_id: trade.id },
                _ => RunnerState::PendingEntry { trade_id: trade.id },
            };
            self.trades.push(trade);
        }
    }

    /// Consume the mailbox until shutdown or until every sender is gone
    ///
    /// # Returns
    /// Every trade this runner opened, oldest first
    pub async fn run(mut self) -> Vec<Trade> {
        self.log.info(format!(
            "Runner started with {} candles of history",
            self.aggregator.len()
        ));
        self.events_tx = None;

        while let Some(event) = self.events_rx.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }

        self.orders.shutdown();
        self.log.info("Runner stopped");
        std::mem::take(&mut self.trades)
    }

    /// Move the runner onto its own task
    ///
    /// The handle owns the mailbox: once it and every tick route are
    /// dropped, the runner stops by itself.
    pub fn spawn(mut self) -> Result<RunnerHandle> {
        let name = self.log.source().to_string();
        let tx = self
            .events_tx
            .take()
            .ok_or_else(|| Error::ChannelClosed(name.clone()))?;
        Ok(RunnerHandle {
            name,
            tx,
            join: tokio::spawn(self.run()),
        })
    }
}

fn pending_trade_mut(trades: &mut [Trade], trade_id: Uuid) -> Option<&mut Trade> {
    trades
        .iter_mut()
        .find(|t| t.id == trade_id && t.status == TradeStatus::PendingEntry)
}

/// Owner side of a spawned runner
pub struct RunnerHandle {
    name: String,
    tx: mpsc::Sender<RunnerEvent>,
    join: JoinHandle<Vec<Trade>>,
}

impl RunnerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sender(&self) -> mpsc::Sender<RunnerEvent> {
        self.tx.clone()
    }

    pub async fn send_tick(&self, tick: Tick) -> Result<()> {
        self.tx
            .send(RunnerEvent::Tick(tick))
            .await
            .map_err(|_| Error::ChannelClosed(self.name.clone()))
    }

    /// Stop the runner after the messages already queued
    ///
    /// # Returns
    /// The runner's trade history
    pub async fn shutdown(self) -> Result<Vec<Trade>> {
        // Already stopped runners still return their history below
        let _ = self.tx.send(RunnerEvent::Shutdown).await;
        self.join
            .await
            .map_err(|e| Error::ChannelClosed(format!("{}: {}", self.name, e)))
    }
}
