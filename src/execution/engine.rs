use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::StrategyConfig;
use crate::error::{Error, Result};
use crate::execution::order_poller::PollConfig;
use crate::execution::runner::{RunnerEvent, RunnerHandle, StrategyRunner};
use crate::execution::strategy_log::{LogEntry, StrategyLog};
use crate::feed::MarketDataFeed;
use crate::gateway::ExchangeGateway;
use crate::models::Trade;

/// Hosts the strategy runners and routes feed ticks into their mailboxes
pub struct Engine {
    gateway: Arc<dyn ExchangeGateway>,
    feed: Arc<dyn MarketDataFeed>,
    poll: PollConfig,
    runners: Vec<RunnerHandle>,
    logs: Vec<StrategyLog>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        feed: Arc<dyn MarketDataFeed>,
        poll: PollConfig,
    ) -> Self {
        Self {
            gateway,
            feed,
            poll,
            runners: Vec::new(),
            logs: Vec::new(),
            forwarders: Vec::new(),
        }
    }

    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    /// Activate every configured strategy
    ///
    /// Each runner is seeded from the gateway's candle history, then every
    /// symbol is subscribed once and its ticks fanned out to the runners
    /// trading it. If any strategy fails to activate, the runners already
    /// started are stopped again before the error is returned.
    pub async fn start(&mut self, strategies: &[StrategyConfig]) -> Result<()> {
        let result = self.activate(strategies).await;
        if let Err(e) = &result {
            tracing::error!("Strategy activation failed: {}", e);
            self.stop_all().await;
        }
        result
    }

    async fn activate(&mut self, strategies: &[StrategyConfig]) -> Result<()> {
        let contracts = self.gateway.get_contracts().await?;
        let mut routes: HashMap<String, Vec<mpsc::Sender<RunnerEvent>>> = HashMap::new();

        for config in strategies {
            let contract = contracts
                .get(&config.symbol)
                .cloned()
                .ok_or_else(|| Error::UnknownSymbol(config.symbol.clone()))?;

            let history = self
                .gateway
                .get_historical_candles(&contract, config.timeframe)
                .await?;

            let runner = StrategyRunner::new(
                config,
                contract,
                history,
                self.gateway.clone(),
                self.poll,
            )?;

            tracing::info!(
                symbol = %config.symbol,
                timeframe = %config.timeframe,
                strategy = %runner.log().source(),
                candles = runner.candles().len(),
                "Strategy activated"
            );

            self.logs.push(runner.log().clone());
            let handle = runner.spawn()?;
            routes
                .entry(config.symbol.clone())
                .or_default()
                .push(handle.sender());
            self.runners.push(handle);
        }

        for (symbol, senders) in routes {
            let contract = contracts
                .get(&symbol)
                .ok_or_else(|| Error::UnknownSymbol(symbol.clone()))?;
            let ticks = self.feed.subscribe(contract).await?;
            self.forwarders
                .push(tokio::spawn(forward_ticks(symbol, ticks, senders)));
        }

        Ok(())
    }

    /// Stop the forwarders and every runner, keeping going past failures
    ///
    /// # Returns
    /// The collected trades and the first runner failure, if any
    async fn stop_all(&mut self) -> (Vec<Trade>, Option<Error>) {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }

        let mut trades = Vec::new();
        let mut first_error = None;
        for runner in std::mem::take(&mut self.runners) {
            let name = runner.name().to_string();
            match runner.shutdown().await {
                Ok(history) => {
                    tracing::info!(strategy = %name, trades = history.len(), "Strategy stopped");
                    trades.extend(history);
                }
                Err(e) => {
                    tracing::error!(strategy = %name, "Runner failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        (trades, first_error)
    }

    /// Log entries not yet shown, across all runners
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        let mut entries: Vec<LogEntry> = self
            .logs
            .iter()
            .flat_map(|log| log.take_undisplayed())
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    /// Stop the feed, then every runner and its poll tasks
    ///
    /// # Returns
    /// All trades, grouped by runner in activation order, or the first
    /// runner failure once every runner has been stopped
    pub async fn shutdown(mut self) -> Result<Vec<Trade>> {
        match self.stop_all().await {
            (_, Some(e)) => Err(e),
            (trades, None) => Ok(trades),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Runners stop on their own once their handles and routes are gone
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

async fn forward_ticks(
    symbol: String,
    mut ticks: mpsc::Receiver<crate::models::Tick>,
    mut senders: Vec<mpsc::Sender<RunnerEvent>>,
) {
    while let Some(tick) = ticks.recv().await {
        let mut live = Vec::with_capacity(senders.len());
        for sender in senders {
            if sender.send(RunnerEvent::Tick(tick)).await.is_ok() {
                live.push(sender);
            }
        }
        senders = live;

        if senders.is_empty() {
            break;
        }
    }

    tracing::debug!(symbol = %symbol, "Tick forwarding stopped");
}
