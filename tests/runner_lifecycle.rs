use async_trait::async_trait;
use autotrader::config::StrategyConfig;
use autotrader::execution::{Engine, PollConfig};
use autotrader::feed::ChannelFeed;
use autotrader::gateway::ExchangeGateway;
use autotrader::strategy::BreakoutParams;
use autotrader::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

const MINUTE: i64 = 60_000;

/// Gateway that answers entry polls from a script and settles exits at a set
/// price and state
struct ScriptedGateway {
    contract: Arc<Contract>,
    history: Vec<Candle>,
    poll_script: Mutex<VecDeque<OrderState>>,
    placed: Mutex<Vec<(OrderSide, f64)>>,
    exit_price: Mutex<f64>,
    exit_state: Mutex<OrderState>,
}

impl ScriptedGateway {
    fn new(script: &[OrderState]) -> Self {
        Self {
            contract: Arc::new(Contract::new(
                "ETHUSDT",
                "ETH",
                "USDT",
                0.01,
                0.0001,
                MarketKind::Margin,
            )),
            history: vec![Candle {
                bucket_start_ms: 0,
                open: 9.0,
                high: 10.0,
                low: 8.0,
                close: 9.0,
                volume: 1.0,
            }],
            poll_script: Mutex::new(script.iter().copied().collect()),
            placed: Mutex::new(Vec::new()),
            exit_price: Mutex::new(0.0),
            exit_state: Mutex::new(OrderState::Filled),
        }
    }

    fn placed(&self) -> Vec<(OrderSide, f64)> {
        self.placed.lock().unwrap().clone()
    }

    fn set_exit_price(&self, price: f64) {
        *self.exit_price.lock().unwrap() = price;
    }

    fn set_exit_state(&self, state: OrderState) {
        *self.exit_state.lock().unwrap() = state;
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedGateway {
    async fn get_contracts(&self) -> Result<HashMap<String, Arc<Contract>>> {
        Ok(HashMap::from([(
            self.contract.symbol.clone(),
            self.contract.clone(),
        )]))
    }

    async fn get_balances(&self) -> Result<HashMap<String, Balance>> {
        Ok(HashMap::from([(
            "USDT".to_string(),
            Balance {
                free: 1_000.0,
                locked: 0.0,
            },
        )]))
    }

    async fn get_historical_candles(
        &self,
        _contract: &Contract,
        _timeframe: Timeframe,
    ) -> Result<Vec<Candle>> {
        Ok(self.history.clone())
    }

    async fn place_order(
        &self,
        _contract: &Contract,
        _order_type: OrderType,
        quantity: f64,
        side: OrderSide,
    ) -> Result<OrderStatus> {
        let mut placed = self.placed.lock().unwrap();
        placed.push((side, quantity));

        // Entries stay pending for the poll script; exits settle at once
        if side == OrderSide::Buy {
            return Ok(OrderStatus {
                order_id: format!("entry-{}", placed.len()),
                state: OrderState::New,
                avg_price: 0.0,
                executed_qty: 0.0,
            });
        }
        let state = *self.exit_state.lock().unwrap();
        let filled = state == OrderState::Filled;
        Ok(OrderStatus {
            order_id: format!("exit-{}", placed.len()),
            state,
            avg_price: if filled {
                *self.exit_price.lock().unwrap()
            } else {
                0.0
            },
            executed_qty: if filled { quantity } else { 0.0 },
        })
    }

    async fn get_order_status(&self, _contract: &Contract, order_id: &str) -> Result<OrderStatus> {
        let state = self
            .poll_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OrderState::New);

        let filled = state == OrderState::Filled;
        Ok(OrderStatus {
            order_id: order_id.to_string(),
            state,
            avg_price: if filled { 10.0 } else { 0.0 },
            executed_qty: if filled { 10.0 } else { 0.0 },
        })
    }
}

fn breakout() -> StrategyConfig {
    StrategyConfig {
        symbol: "ETHUSDT".to_string(),
        timeframe: Timeframe::M1,
        balance_pct: 10.0,
        take_profit: 5.0,
        stop_loss: 2.0,
        strategy: SignalEngine::Breakout(BreakoutParams { min_volume: 5.0 }),
    }
}

fn fast_poll() -> PollConfig {
    PollConfig {
        interval_ms: 1,
        max_attempts: 20,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Complete bucket `bucket` with one tick, then open the next bucket so the
/// completed candle is evaluated
async fn close_bucket(feed: &ChannelFeed, bucket: i64, price: f64, volume: f64) {
    assert_ok!(feed.publish("ETHUSDT", Tick::new(price, volume, bucket * MINUTE)).await);
    assert_ok!(
        feed.publish("ETHUSDT", Tick::new(price, 0.1, (bucket + 1) * MINUTE))
            .await
    );
}

#[tokio::test]
async fn test_delayed_fill_then_take_profit() {
    let _ = tracing_subscriber::fmt::try_init();

    let gateway = Arc::new(ScriptedGateway::new(&[
        OrderState::New,
        OrderState::PartiallyFilled,
        OrderState::Filled,
    ]));
    let feed = Arc::new(ChannelFeed::new());
    let mut engine = Engine::new(gateway.clone(), feed.clone(), fast_poll());
    assert_ok!(engine.start(&[breakout()]).await);

    // Breakout: bucket 1 closes at 10.5 above the seeded high of 10 on volume 6
    close_bucket(&feed, 1, 10.5, 6.0).await;
    settle().await;

    // Fill came in at 10.0; 10.6 clears the 5% target
    gateway.set_exit_price(10.6);
    assert_ok!(feed.publish("ETHUSDT", Tick::new(10.6, 1.0, 2 * MINUTE + 1_000)).await);
    settle().await;

    let trades = assert_ok!(engine.shutdown().await);
    assert_eq!(trades.len(), 1);

    let trade = &trades[0];
    assert_eq!(trade.status, TradeStatus::Closed);
    assert_eq!(trade.entry_price, Some(10.0));
    assert_eq!(trade.quantity, 10.0);
    assert_eq!(trade.exit_reason, Some(ExitReason::TakeProfit));
    assert!((trade.pnl - 6.0).abs() < 1e-9);

    let placed = gateway.placed();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[0].0, OrderSide::Buy);
    assert_eq!(placed[1], (OrderSide::Sell, 10.0));
}

#[tokio::test]
async fn test_rejected_entry_frees_runner() {
    let gateway = Arc::new(ScriptedGateway::new(&[OrderState::New, OrderState::Rejected]));
    let feed = Arc::new(ChannelFeed::new());
    let mut engine = Engine::new(gateway.clone(), feed.clone(), fast_poll());
    assert_ok!(engine.start(&[breakout()]).await);

    close_bucket(&feed, 1, 10.5, 6.0).await;
    settle().await;

    // Runner is idle again, so the next breakout submits a new entry:
    // bucket 3 closes at 11.0 above bucket 2's high of 10.5
    close_bucket(&feed, 3, 11.0, 6.0).await;
    settle().await;

    let trades = assert_ok!(engine.shutdown().await);
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].status, TradeStatus::Closed);
    assert_eq!(trades[0].exit_reason, Some(ExitReason::EntryCanceled));
    assert_eq!(trades[0].pnl, 0.0);
    assert!(trades[1].is_active());
    assert_eq!(gateway.placed().len(), 2);
}

#[tokio::test]
async fn test_exhausted_poll_keeps_trade_pending() {
    let gateway = Arc::new(ScriptedGateway::new(&[]));
    let feed = Arc::new(ChannelFeed::new());
    let mut engine = Engine::new(
        gateway.clone(),
        feed.clone(),
        PollConfig {
            interval_ms: 1,
            max_attempts: 3,
        },
    );
    assert_ok!(engine.start(&[breakout()]).await);

    close_bucket(&feed, 1, 10.5, 6.0).await;
    settle().await;
    close_bucket(&feed, 3, 12.0, 9.0).await;
    settle().await;

    let trades = assert_ok!(engine.shutdown().await);
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::PendingEntry);
    assert_eq!(trades[0].entry_price, None);
    assert_eq!(gateway.placed().len(), 1);
}

#[tokio::test]
async fn test_canceled_exit_keeps_position_open() {
    let gateway = Arc::new(ScriptedGateway::new(&[OrderState::Filled]));
    let feed = Arc::new(ChannelFeed::new());
    let mut engine = Engine::new(gateway.clone(), feed.clone(), fast_poll());
    assert_ok!(engine.start(&[breakout()]).await);

    close_bucket(&feed, 1, 10.5, 6.0).await;
    settle().await;

    // Take profit fires, but the venue cancels the exit order
    gateway.set_exit_price(10.6);
    gateway.set_exit_state(OrderState::Canceled);
    assert_ok!(feed.publish("ETHUSDT", Tick::new(10.6, 1.0, 2 * MINUTE + 1_000)).await);
    settle().await;

    // Retried on the next tick once the venue fills it
    gateway.set_exit_state(OrderState::Filled);
    assert_ok!(feed.publish("ETHUSDT", Tick::new(10.6, 1.0, 2 * MINUTE + 2_000)).await);
    settle().await;

    let logs = engine.drain_logs();
    assert!(logs.iter().any(|e| e.message.contains("was Canceled")));

    let trades = assert_ok!(engine.shutdown().await);
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Closed);
    assert_eq!(trades[0].exit_reason, Some(ExitReason::TakeProfit));
    assert!((trades[0].pnl - 6.0).abs() < 1e-9);

    let placed = gateway.placed();
    assert_eq!(placed.len(), 3);
    assert_eq!(placed[1], (OrderSide::Sell, 10.0));
    assert_eq!(placed[2], (OrderSide::Sell, 10.0));
}

#[tokio::test]
async fn test_canceled_exit_alone_never_closes() {
    let gateway = Arc::new(ScriptedGateway::new(&[OrderState::Filled]));
    gateway.set_exit_state(OrderState::Canceled);
    let feed = Arc::new(ChannelFeed::new());
    let mut engine = Engine::new(gateway.clone(), feed.clone(), fast_poll());
    assert_ok!(engine.start(&[breakout()]).await);

    close_bucket(&feed, 1, 10.5, 6.0).await;
    settle().await;
    assert_ok!(feed.publish("ETHUSDT", Tick::new(10.6, 1.0, 2 * MINUTE + 1_000)).await);
    settle().await;

    let trades = assert_ok!(engine.shutdown().await);
    assert_eq!(trades[0].status, TradeStatus::Open);
    assert_eq!(trades[0].exit_reason, None);
    assert_eq!(trades[0].exit_price, None);
}
