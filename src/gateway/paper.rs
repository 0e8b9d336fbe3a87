use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use super::ExchangeGateway;
use crate::error::{Error, Result};
use crate::feed::{MarketDataFeed, MarketScenario, SyntheticTickGenerator};
use crate::models::{
    Balance, Candle, Contract, OrderSide, OrderState, OrderStatus, OrderType, Tick, Timeframe,
};

/// How the paper exchange answers market orders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillBehavior {
    /// Filled in the `place_order` response
    Immediate,
    /// Reported `New` until the order has been polled this many times
    AfterPolls(u32),
    /// Stays `New` forever
    Never,
    /// Canceled by the venue after this many polls
    CancelAfterPolls(u32),
}

/// Order as recorded by the paper exchange
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
}

#[derive(Debug)]
struct PaperOrder {
    placed: PlacedOrder,
    polls: u32,
    status: OrderStatus,
}

#[derive(Debug, Default)]
struct PaperState {
    balances: HashMap<String, Balance>,
    marks: HashMap<String, f64>,
    orders: HashMap<String, PaperOrder>,
    order_log: Vec<PlacedOrder>,
    next_order_id: u64,
    next_seed: u64,
    fail_orders: bool,
}

/// In-memory exchange for paper trading and tests
///
/// Holds balances, settles market orders at the latest mark price and,
/// as a `MarketDataFeed`, streams synthetic ticks that move that mark.
pub struct PaperExchange {
    contracts: HashMap<String, Arc<Contract>>,
    state: Arc<Mutex<PaperState>>,
    fill_behavior: FillBehavior,
    scenario: MarketScenario,
    history_len: usize,
    tick_interval: Duration,
}

impl PaperExchange {
    pub fn new(fill_behavior: FillBehavior) -> Self {
        Self {
            contracts: HashMap::new(),
            state: Arc::new(Mutex::new(PaperState::default())),
            fill_behavior,
            scenario: MarketScenario::Sideways,
            history_len: 100,
            tick_interval: Duration::from_millis(500),
        }
    }

    /// List a contract with its starting mark price
    pub fn with_contract(mut self, contract: Contract, start_price: f64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.marks.insert(contract.symbol.clone(), start_price);
        }
        self.contracts
            .insert(contract.symbol.clone(), Arc::new(contract));
        self
    }

    pub fn with_balance(self, asset: &str, free: f64) -> Self {
        self.set_balance(asset, free);
        self
    }

    pub fn with_scenario(mut self, scenario: MarketScenario, seed: u64) -> Self {
        self.scenario = scenario;
        if let Ok(mut state) = self.state.lock() {
            state.next_seed = seed;
        }
        self
    }

    pub fn with_history_len(mut self, history_len: usize) -> Self {
        self.history_len = history_len.max(1);
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperState>> {
        self.state
            .lock()
            .map_err(|e| Error::Gateway(format!("paper state poisoned: {}", e)))
    }

    pub fn set_balance(&self, asset: &str, free: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.balances.insert(
                asset.to_string(),
                Balance {
                    free,
                    locked: 0.0,
                },
            );
        }
    }

    pub fn set_mark_price(&self, symbol: &str, price: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.marks.insert(symbol.to_string(), price);
        }
    }

    /// Make every following `place_order` fail like a transport error
    pub fn set_fail_orders(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_orders = fail;
        }
    }

    /// Every order submitted so far, oldest first
    pub fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.state
            .lock()
            .map(|state| state.order_log.clone())
            .unwrap_or_default()
    }

    pub fn balance(&self, asset: &str) -> Balance {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.balances.get(asset).copied())
            .unwrap_or_default()
    }

    fn contract(&self, symbol: &str) -> Result<&Arc<Contract>> {
        self.contracts
            .get(symbol)
            .ok_or_else(|| Error::UnknownSymbol(symbol.to_string()))
    }
}

impl PaperState {
    /// Move balances for a fill at `price`; `None` if funds are short
    fn settle(&mut self, contract: &Contract, side: OrderSide, quantity: f64, price: f64) -> Option<()> {
        let notional = quantity * price;
        let quote = self.balances.get(&contract.quote_asset).copied().unwrap_or_default();
        let base = self.balances.get(&contract.base_asset).copied().unwrap_or_default();

        let (new_quote, new_base) = match side {
            OrderSide::Buy => (quote.free - notional, base.free + quantity),
            OrderSide::Sell => (quote.free + notional, base.free - quantity),
        };

        if new_quote < 0.0 {
            return None;
        }
        // Spot venues cannot sell what they do not hold
        if new_base < 0.0 && contract.market_kind == crate::models::MarketKind::Spot {
            return None;
        }

        self.balances.insert(
            contract.quote_asset.clone(),
            Balance {
                free: new_quote,
                ..quote
            },
        );
        self.balances.insert(
            contract.base_asset.clone(),
            Balance {
                free: new_base,
                ..base
            },
        );
        Some(())
    }

    fn fill(&mut self, contract: &Contract, order_id: &str) -> Option<OrderStatus> {
        let price = self.marks.get(&contract.symbol).copied()?;
        let (side, quantity) = {
            let order = self.orders.get(order_id)?;
            (order.placed.side, order.placed.quantity)
        };

        let settled = self.settle(contract, side, quantity, price);
        let order = self.orders.get_mut(order_id)?;
        order.status = match settled {
            Some(()) => OrderStatus {
                order_id: order_id.to_string(),
                state: OrderState::Filled,
                avg_price: price,
                executed_qty: quantity,
            },
            None => OrderStatus {
                order_id: order_id.to_string(),
                state: OrderState::Rejected,
                avg_price: 0.0,
                executed_qty: 0.0,
            },
        };
        Some(order.status.clone())
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn get_contracts(&self) -> Result<HashMap<String, Arc<Contract>>> {
        Ok(self.contracts.clone())
    }

    async fn get_balances(&self) -> Result<HashMap<String, Balance>> {
        Ok(self.lock()?.balances.clone())
    }

    async fn get_historical_candles(
        &self,
        contract: &Contract,
        timeframe: Timeframe,
    ) -> Result<Vec<Candle>> {
        let mut state = self.lock()?;
        let start_price = state
            .marks
            .get(&contract.symbol)
            .copied()
            .ok_or_else(|| Error::UnknownSymbol(contract.symbol.clone()))?;

        let seed = state.next_seed;
        state.next_seed += 1;

        let width = timeframe.width_ms();
        let now = Utc::now().timestamp_millis();
        let current_bucket = now - now.rem_euclid(width);

        let mut generator = SyntheticTickGenerator::new(seed, start_price, self.scenario);
        let candles = generator.history(timeframe, current_bucket, self.history_len);
        state.marks.insert(contract.symbol.clone(), generator.price());

        Ok(candles)
    }

    async fn place_order(
        &self,
        contract: &Contract,
        _order_type: OrderType,
        quantity: f64,
        side: OrderSide,
    ) -> Result<OrderStatus> {
        self.contract(&contract.symbol)?;
        let mut state = self.lock()?;

        if state.fail_orders {
            return Err(Error::Gateway("connection refused".to_string()));
        }

        state.next_order_id += 1;
        let order_id = state.next_order_id.to_string();
        let placed = PlacedOrder {
            order_id: order_id.clone(),
            symbol: contract.symbol.clone(),
            side,
            quantity,
        };
        state.order_log.push(placed.clone());
        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                placed,
                polls: 0,
                status: OrderStatus {
                    order_id: order_id.clone(),
                    state: OrderState::New,
                    avg_price: 0.0,
                    executed_qty: 0.0,
                },
            },
        );

        tracing::debug!(
            symbol = %contract.symbol,
            side = %side,
            quantity = quantity,
            order_id = %order_id,
            "Paper order placed"
        );

        match self.fill_behavior {
            FillBehavior::Immediate => state
                .fill(contract, &order_id)
                .ok_or_else(|| Error::Gateway(format!("no mark price for {}", contract.symbol))),
            _ => Ok(state.orders[&order_id].status.clone()),
        }
    }

    async fn get_order_status(&self, contract: &Contract, order_id: &str) -> Result<OrderStatus> {
        let mut state = self.lock()?;
        let (polls, status) = {
            let order = state
                .orders
                .get_mut(order_id)
                .ok_or_else(|| Error::Gateway(format!("unknown order {}", order_id)))?;
            order.polls += 1;
            (order.polls, order.status.clone())
        };

        if status.state.is_terminal() {
            return Ok(status);
        }

        match self.fill_behavior {
            FillBehavior::AfterPolls(n) if polls >= n => state
                .fill(contract, order_id)
                .ok_or_else(|| Error::Gateway(format!("no mark price for {}", contract.symbol))),
            FillBehavior::CancelAfterPolls(n) if polls >= n => {
                let order = state
                    .orders
                    .get_mut(order_id)
                    .ok_or_else(|| Error::Gateway(format!("unknown order {}", order_id)))?;
                order.status.state = OrderState::Canceled;
                Ok(order.status.clone())
            }
            _ => Ok(status),
        }
    }
}

#[async_trait]
impl MarketDataFeed for PaperExchange {
    async fn subscribe(&self, contract: &Contract) -> Result<mpsc::Receiver<Tick>> {
        let (start_price, seed) = {
            let mut state = self.lock()?;
            let price = state
                .marks
                .get(&contract.symbol)
                .copied()
                .ok_or_else(|| Error::UnknownSymbol(contract.symbol.clone()))?;
            state.next_seed += 1;
            (price, state.next_seed)
        };

        let (tx, rx) = mpsc::channel(1024);
        let state = self.state.clone();
        let symbol = contract.symbol.clone();
        let scenario = self.scenario;
        let tick_interval = self.tick_interval;

        tokio::spawn(async move {
            let mut generator = SyntheticTickGenerator::new(seed, start_price, scenario);
            let mut ticker = tokio::time::interval(tick_interval);

            loop {
                ticker.tick().await;
                let tick = generator.next_tick(Utc::now().timestamp_millis());

                if let Ok(mut state) = state.lock() {
                    state.marks.insert(symbol.clone(), tick.price);
                }

                if tx.send(tick).await.is_err() {
                    tracing::debug!(symbol = %symbol, "Paper feed subscriber gone");
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketKind;

    fn spot() -> Contract {
        Contract::new("BTCUSDT", "BTC", "USDT", 0.01, 0.001, MarketKind::Spot)
    }

    fn exchange(fill: FillBehavior) -> PaperExchange {
        PaperExchange::new(fill)
            .with_contract(spot(), 100.0)
            .with_balance("USDT", 1_000.0)
    }

    #[tokio::test]
    async fn test_immediate_fill_settles_balances() {
        let ex = exchange(FillBehavior::Immediate);
        let status = ex
            .place_order(&spot(), OrderType::Market, 2.0, OrderSide::Buy)
            .await
            .unwrap();

        assert_eq!(status.state, OrderState::Filled);
        assert_eq!(status.avg_price, 100.0);
        assert_eq!(status.executed_qty, 2.0);
        assert_eq!(ex.balance("USDT").free, 800.0);
        assert_eq!(ex.balance("BTC").free, 2.0);
    }

    #[tokio::test]
    async fn test_delayed_fill_after_polls() {
        let ex = exchange(FillBehavior::AfterPolls(2));
        let status = ex
            .place_order(&spot(), OrderType::Market, 1.0, OrderSide::Buy)
            .await
            .unwrap();
        assert_eq!(status.state, OrderState::New);

        let first = ex.get_order_status(&spot(), &status.order_id).await.unwrap();
        assert_eq!(first.state, OrderState::New);

        ex.set_mark_price("BTCUSDT", 101.0);
        let second = ex.get_order_status(&spot(), &status.order_id).await.unwrap();
        assert_eq!(second.state, OrderState::Filled);
        assert_eq!(second.avg_price, 101.0);
    }

    #[tokio::test]
    async fn test_spot_oversell_rejected() {
        let ex = exchange(FillBehavior::Immediate);
        let status = ex
            .place_order(&spot(), OrderType::Market, 1.0, OrderSide::Sell)
            .await
            .unwrap();
        assert_eq!(status.state, OrderState::Rejected);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let ex = exchange(FillBehavior::Immediate);
        ex.set_fail_orders(true);
        let result = ex
            .place_order(&spot(), OrderType::Market, 1.0, OrderSide::Buy)
            .await;
        assert!(matches!(result, Err(Error::Gateway(_))));
        assert!(ex.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_history_ends_at_current_bucket() {
        let ex = exchange(FillBehavior::Immediate).with_history_len(20);
        let candles = ex
            .get_historical_candles(&spot(), Timeframe::M1)
            .await
            .unwrap();

        assert_eq!(candles.len(), 20);
        let now = Utc::now().timestamp_millis();
        let last = candles.last().unwrap();
        assert!(last.bucket_start_ms <= now);
        assert!(now - last.bucket_start_ms < 2 * 60_000);
    }

    #[tokio::test]
    async fn test_feed_streams_ticks() {
        let ex = exchange(FillBehavior::Immediate).with_tick_interval(Duration::from_millis(1));
        let mut rx = ex.subscribe(&spot()).await.unwrap();

        let tick = rx.recv().await.unwrap();
        assert!(tick.price > 0.0);
    }
}
