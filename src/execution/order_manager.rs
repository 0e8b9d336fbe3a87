use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::execution::order_poller::{EntryPoll, PollConfig};
use crate::execution::runner::RunnerEvent;
use crate::execution::strategy_log::StrategyLog;
use crate::gateway::ExchangeGateway;
use crate::models::{
    Contract, ExitReason, MarketKind, OrderSide, OrderState, OrderStatus, OrderType, PositionSide,
    Signal, Trade, TradeStatus,
};

/// Position sizing and exit thresholds of one strategy, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    pub balance_pct: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
}

/// Round `raw` to the nearest multiple of `lot_size`
///
/// Done in decimal arithmetic so the result is an exact multiple.
///
/// # Returns
/// `None` when the inputs are not representable or the size rounds to zero
pub fn quantize_to_lot(raw: f64, lot_size: f64) -> Option<Decimal> {
    let raw = Decimal::from_str(&raw.to_string()).ok()?;
    let lot = Decimal::from_str(&lot_size.to_string()).ok()?;
    if lot <= Decimal::ZERO {
        return None;
    }

    let quantity = ((raw / lot).round() * lot).normalize();
    (quantity > Decimal::ZERO).then_some(quantity)
}

/// Turns signals into orders and owns every in-flight entry poll of a runner
pub struct OrderLifecycleManager {
    gateway: Arc<dyn ExchangeGateway>,
    contract: Arc<Contract>,
    risk: RiskParams,
    poll: PollConfig,
    strategy_tag: String,
    pollers: HashMap<Uuid, JoinHandle<()>>,
    // Weak so the mailbox closes once the runner's owners are gone
    events: mpsc::WeakSender<RunnerEvent>,
    log: StrategyLog,
}

impl OrderLifecycleManager {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        contract: Arc<Contract>,
        risk: RiskParams,
        poll: PollConfig,
        events: mpsc::WeakSender<RunnerEvent>,
        log: StrategyLog,
    ) -> Self {
        Self {
            gateway,
            contract,
            risk,
            poll,
            strategy_tag: log.source().to_string(),
            pollers: HashMap::new(),
            events,
            log,
        }
    }

    pub fn contract(&self) -> &Arc<Contract> {
        &self.contract
    }

    /// Number of entry orders still being polled
    pub fn active_polls(&self) -> usize {
        self.pollers.len()
    }

    /// Compute the order size for `balance_pct` of the free settlement balance
    ///
    /// # Arguments
    /// * `free_balance` - Free amount of the quote asset
    /// * `price` - Close of the candle the signal fired on
    ///
    /// # Returns
    /// Lot-aligned quantity, or `None` (logged) if nothing can be bought
    pub fn size_position(&self, free_balance: f64, price: f64) -> Option<Decimal> {
        if free_balance <= 0.0 {
            self.log.warn(format!(
                "No {} balance available to trade {}",
                self.contract.quote_asset, self.contract.symbol
            ));
            return None;
        }
        if price <= 0.0 {
            self.log.warn(format!(
                "Cannot size {} at non-positive price {}",
                self.contract.symbol, price
            ));
            return None;
        }

        let raw = free_balance * self.risk.balance_pct / 100.0 / price;
        let quantity = quantize_to_lot(raw, self.contract.lot_size);

        match quantity {
            Some(quantity) => {
                tracing::debug!(
                    symbol = %self.contract.symbol,
                    free_balance = free_balance,
                    raw = raw,
                    quantity = %quantity,
                    "Position sized"
                );
                Some(quantity)
            }
            None => {
                self.log.warn(format!(
                    "Position size for {} rounds to zero (raw {:.8}, lot {})",
                    self.contract.symbol, raw, self.contract.lot_size
                ));
                None
            }
        }
    }

    /// Submit the entry order for a signal
    ///
    /// # Returns
    /// The new trade, `Open` if the venue filled it immediately and
    /// `PendingEntry` (with a poll task running) otherwise. `None` when
    /// no order went out or the venue refused it.
    pub async fn open(&mut self, signal: Signal, last_close: f64) -> Option<Trade> {
        let side = match signal {
            Signal::Long => PositionSide::Long,
            Signal::Short => PositionSide::Short,
            Signal::Neutral => return None,
        };

        if side == PositionSide::Short && self.contract.market_kind == MarketKind::Spot {
            self.log.warn(format!(
                "Short signal on {} ignored: spot markets cannot be shorted",
                self.contract.symbol
            ));
            return None;
        }

        let balances = match self.gateway.get_balances().await {
            Ok(balances) => balances,
            Err(e) => {
                self.log
                    .error(format!("Could not fetch balances for sizing: {}", e));
                return None;
            }
        };
        let free = balances
            .get(&self.contract.quote_asset)
            .map(|b| b.free)
            .unwrap_or(0.0);

        let quantity = self.size_position(free, last_close)?.to_f64()?;
        let order_side = side.entry_order_side();

        let status = match self
            .gateway
            .place_order(&self.contract, OrderType::Market, quantity, order_side)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                self.log.error(format!(
                    "{} order for {} {} failed: {}",
                    order_side, quantity, self.contract.symbol, e
                ));
                return None;
            }
        };

        let mut trade = Trade::new(
            &self.contract,
            &self.strategy_tag,
            side,
            &status.order_id,
            Utc::now().timestamp_millis(),
        );
        trade.quantity = quantity;

        match status.state {
            OrderState::Filled => {
                trade.entry_price = Some(status.avg_price);
                trade.quantity = status.executed_qty;
                trade.status = TradeStatus::Open;
                self.log.info(format!(
                    "{} {} {} filled at {}",
                    order_side, trade.quantity, self.contract.symbol, status.avg_price
                ));
            }
            OrderState::Canceled | OrderState::Rejected => {
                self.log.warn(format!(
                    "{} order {} for {} was {:?}",
                    order_side, status.order_id, self.contract.symbol, status.state
                ));
                return None;
            }
            OrderState::New | OrderState::PartiallyFilled => {
                self.log.info(format!(
                    "{} order {} for {} {} submitted, waiting for fill",
                    order_side, status.order_id, quantity, self.contract.symbol
                ));
                let handle = EntryPoll {
                    gateway: self.gateway.clone(),
                    contract: self.contract.clone(),
                    trade_id: trade.id,
                    order_id: status.order_id.clone(),
                    config: self.poll,
                    events: self.events.clone(),
                    log: self.log.clone(),
                }
                .spawn();
                self.pollers.insert(trade.id, handle);
            }
        }

        Some(trade)
    }

    /// Record a fill reported by the poll task
    pub fn apply_fill(&mut self, trade: &mut Trade, status: &OrderStatus) {
        self.cancel_poll(trade.id);

        trade.entry_price = Some(status.avg_price);
        if status.executed_qty > 0.0 {
            trade.quantity = status.executed_qty;
        }
        trade.status = TradeStatus::Open;

        self.log.info(format!(
            "Entry order {} for {} filled at {} ({})",
            status.order_id, trade.symbol, status.avg_price, trade.quantity
        ));
    }

    /// Close a trade whose entry order the venue canceled or rejected
    pub fn abandon(&mut self, trade: &mut Trade, status: &OrderStatus) {
        self.cancel_poll(trade.id);

        trade.status = TradeStatus::Closed;
        trade.pnl = 0.0;
        trade.exit_reason = Some(ExitReason::EntryCanceled);

        self.log.warn(format!(
            "Entry order {} for {} ended {:?}, trade dropped",
            status.order_id, trade.symbol, status.state
        ));
    }

    /// Which exit threshold, if any, `price` crosses for an open trade
    ///
    /// Stop loss wins when both would fire.
    pub fn check_exit(&self, trade: &Trade, price: f64) -> Option<ExitReason> {
        if trade.status != TradeStatus::Open {
            return None;
        }
        let entry = trade.entry_price?;

        let sl = self.risk.stop_loss / 100.0;
        let tp = self.risk.take_profit / 100.0;

        let (stop_hit, target_hit) = match trade.side {
            PositionSide::Long => (price <= entry * (1.0 - sl), price >= entry * (1.0 + tp)),
            PositionSide::Short => (price >= entry * (1.0 + sl), price <= entry * (1.0 - tp)),
        };

        if stop_hit {
            Some(ExitReason::StopLoss)
        } else if target_hit {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }

    /// Flatten an open trade with an opposite-side market order
    ///
    /// # Returns
    /// `true` once the exit is confirmed and the trade is `Closed`. On
    /// failure the trade stays `Open` and the exit is retried next tick.
    pub async fn exit(&mut self, trade: &mut Trade, price: f64, reason: ExitReason) -> bool {
        let exit_side = trade.side.exit_order_side();
        let mut quantity = trade.quantity;

        // Spot positions can only sell what the account actually holds
        if self.contract.market_kind == MarketKind::Spot && exit_side == OrderSide::Sell {
            let balances = match self.gateway.get_balances().await {
                Ok(balances) => balances,
                Err(e) => {
                    self.log
                        .error(format!("Could not fetch balances for exit: {}", e));
                    return false;
                }
            };
            let free_base = balances
                .get(&self.contract.base_asset)
                .map(|b| b.free)
                .unwrap_or(0.0);
            quantity = quantity.min(free_base);

            if quantity <= 0.0 {
                self.log.error(format!(
                    "No {} left to sell for {} exit",
                    self.contract.base_asset, trade.symbol
                ));
                return false;
            }
        }

        let status = match self
            .gateway
            .place_order(&self.contract, OrderType::Market, quantity, exit_side)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                self.log.error(format!(
                    "{} exit order for {} failed: {}",
                    reason, trade.symbol, e
                ));
                return false;
            }
        };

        if matches!(status.state, OrderState::Rejected | OrderState::Canceled) {
            self.log.error(format!(
                "{} exit order {} for {} was {:?}",
                reason, status.order_id, trade.symbol, status.state
            ));
            return false;
        }

        let exit_price = if status.avg_price > 0.0 {
            status.avg_price
        } else {
            price
        };

        // The spot clamp may have trimmed the size
        trade.quantity = quantity;
        trade.pnl = trade.pnl_at(exit_price);
        trade.exit_price = Some(exit_price);
        trade.exit_reason = Some(reason);
        trade.status = TradeStatus::Closed;
        self.cancel_poll(trade.id);

        self.log.info(format!(
            "{} for {} {} at {} | PnL: {:.4}",
            reason, trade.side, trade.symbol, exit_price, trade.pnl
        ));

        true
    }

    /// Stop the poll task of a trade, if one is running
    pub fn cancel_poll(&mut self, trade_id: Uuid) {
        if let Some(handle) = self.pollers.remove(&trade_id) {
            handle.abort();
        }
    }

    /// Abort every poll task
    pub fn shutdown(&mut self) {
        for (trade_id, handle) in self.pollers.drain() {
            tracing::debug!(trade_id = %trade_id, "Aborting entry poll");
            handle.abort();
        }
    }
}

impl Drop for OrderLifecycleManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
