use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::execution::runner::RunnerEvent;
use crate::execution::strategy_log::StrategyLog;
use crate::gateway::ExchangeGateway;
use crate::models::{Contract, OrderState};

/// Entry order polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            max_attempts: 30,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        // tokio intervals panic on a zero period
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Everything a poll task needs to watch one entry order
pub struct EntryPoll {
    pub gateway: Arc<dyn ExchangeGateway>,
    pub contract: Arc<Contract>,
    pub trade_id: Uuid,
    pub order_id: String,
    pub config: PollConfig,
    pub events: mpsc::WeakSender<RunnerEvent>,
    pub log: StrategyLog,
}

impl EntryPoll {
    /// Poll the order until it reaches a terminal state or the budget runs out
    ///
    /// The task never touches the trade itself: every outcome is sent back
    /// into the runner mailbox. Abort the returned handle to cancel.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval());
        // The first tick completes immediately
        ticker.tick().await;

        for attempt in 1..=self.config.max_attempts {
            ticker.tick().await;

            let status = match self
                .gateway
                .get_order_status(&self.contract, &self.order_id)
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(
                        symbol = %self.contract.symbol,
                        order_id = %self.order_id,
                        attempt = attempt,
                        "Order status request failed: {}",
                        e
                    );
                    continue;
                }
            };

            let event = match status.state {
                OrderState::Filled => RunnerEvent::EntryFilled {
                    trade_id: self.trade_id,
                    status,
                },
                OrderState::Canceled | OrderState::Rejected => RunnerEvent::EntryAbandoned {
                    trade_id: self.trade_id,
                    status,
                },
                OrderState::New | OrderState::PartiallyFilled => {
                    tracing::debug!(
                        symbol = %self.contract.symbol,
                        order_id = %self.order_id,
                        attempt = attempt,
                        state = ?status.state,
                        "Entry order still pending"
                    );
                    continue;
                }
            };

            self.report(event).await;
            return;
        }

        self.log.error(format!(
            "Entry order {} on {} not filled after {} status checks",
            self.order_id, self.contract.symbol, self.config.max_attempts
        ));
        self.report(RunnerEvent::PollExhausted {
            trade_id: self.trade_id,
            attempts: self.config.max_attempts,
        })
        .await;
    }

    async fn report(&self, event: RunnerEvent) {
        // A closed mailbox means the runner is gone
        if let Some(events) = self.events.upgrade() {
            let _ = events.send(event).await;
        }
    }
}
