use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use crate::error::Error;

/// A single trade print from the market data feed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub price: f64,
    pub size: f64,
    pub timestamp_ms: i64,
}

impl Tick {
    pub fn new(price: f64, size: f64, timestamp_ms: i64) -> Self {
        Self {
            price,
            size,
            timestamp_ms,
        }
    }
}

/// OHLCV candle for one fixed-width bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub bucket_start_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Candle opened by a single tick
    pub fn from_tick(bucket_start_ms: i64, price: f64, size: f64) -> Self {
        Self {
            bucket_start_ms,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
        }
    }

    /// Flat zero-volume candle used to fill a gap in the feed
    pub fn flat(bucket_start_ms: i64, price: f64) -> Self {
        Self::from_tick(bucket_start_ms, price, 0.0)
    }
}

/// Candle width supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
}

impl Timeframe {
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1800,
            Timeframe::H1 => 3600,
            Timeframe::H4 => 14400,
        }
    }

    /// Bucket width in milliseconds
    pub fn width_ms(&self) -> i64 {
        self.seconds() * 1000
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            other => Err(Error::UnknownTimeframe(other.to_string())),
        }
    }
}

/// Whether the venue allows borrowing (and therefore shorting)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    Spot,
    Margin,
}

/// Tradable instrument as loaded from the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price_decimals: u32,
    pub quantity_decimals: u32,
    pub tick_size: f64,
    pub lot_size: f64,
    pub market_kind: MarketKind,
}

impl Contract {
    /// Build a contract, deriving display precision from the increments
    pub fn new(
        symbol: &str,
        base_asset: &str,
        quote_asset: &str,
        tick_size: f64,
        lot_size: f64,
        market_kind: MarketKind,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
            price_decimals: decimals_from_increment(tick_size),
            quantity_decimals: decimals_from_increment(lot_size),
            tick_size,
            lot_size,
            market_kind,
        }
    }
}

/// Number of decimal places an increment such as 0.001 carries
///
/// Read through `Decimal` from the shortest round-trip form of the float,
/// so 1e-9 yields 9 rather than being cut off at a fixed precision.
pub fn decimals_from_increment(increment: f64) -> u32 {
    rust_decimal::Decimal::from_str(&increment.to_string())
        .map(|d| d.normalize().scale())
        .unwrap_or(0)
}

/// Free/locked amount of one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub free: f64,
    pub locked: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("BUY"),
            OrderSide::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderState {
    /// No further fills can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Canceled | OrderState::Rejected
        )
    }
}

/// Gateway view of an order after submission or a status poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub state: OrderState,
    pub avg_price: f64,
    pub executed_qty: f64,
}

/// Trade signal produced by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Long,
    Short,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that opens a position on this side
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that flattens a position on this side
    pub fn exit_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => f.write_str("long"),
            PositionSide::Short => f.write_str("short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    PendingEntry,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    EntryCanceled,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => f.write_str("Stop loss"),
            ExitReason::TakeProfit => f.write_str("Take profit"),
            ExitReason::EntryCanceled => f.write_str("Entry canceled"),
        }
    }
}

/// Position opened by a strategy runner
#[derive(Debug, Clone)]
pub struct Trade {
    pub id: Uuid,
    pub contract: Weak<Contract>,
    pub symbol: String,
    pub strategy_tag: String,
    pub side: PositionSide,
    pub entry_price: Option<f64>,
    pub quantity: f64,
    pub status: TradeStatus,
    pub pnl: f64,
    pub entry_order_id: String,
    pub opened_at_ms: i64,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
}

impl Trade {
    pub fn new(
        contract: &Arc<Contract>,
        strategy_tag: &str,
        side: PositionSide,
        entry_order_id: &str,
        opened_at_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            contract: Arc::downgrade(contract),
            symbol: contract.symbol.clone(),
            strategy_tag: strategy_tag.to_string(),
            side,
            entry_price: None,
            quantity: 0.0,
            status: TradeStatus::PendingEntry,
            pnl: 0.0,
            entry_order_id: entry_order_id.to_string(),
            opened_at_ms,
            exit_price: None,
            exit_reason: None,
        }
    }

    /// Trade counts against the one-position limit
    pub fn is_active(&self) -> bool {
        matches!(self.status, TradeStatus::PendingEntry | TradeStatus::Open)
    }

    /// Mark-to-market P&L at `price`; zero until the entry is filled
    pub fn pnl_at(&self, price: f64) -> f64 {
        match self.entry_price {
            Some(entry) => match self.side {
                PositionSide::Long => (price - entry) * self.quantity,
                PositionSide::Short => (entry - price) * self.quantity,
            },
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_contract() -> Arc<Contract> {
        Arc::new(Contract::new(
            "BTCUSDT",
            "BTC",
            "USDT",
            0.01,
            0.001,
            MarketKind::Spot,
        ))
    }

    #[test]
    fn test_timeframe_width() {
        assert_eq!(Timeframe::M1.width_ms(), 60_000);
        assert_eq!(Timeframe::H4.width_ms(), 14_400_000);
        assert_eq!("15m".parse::<Timeframe>().unwrap(), Timeframe::M15);
        assert!("2m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_decimals_from_increment() {
        assert_eq!(decimals_from_increment(0.01), 2);
        assert_eq!(decimals_from_increment(0.00001), 5);
        assert_eq!(decimals_from_increment(1.0), 0);
        assert_eq!(decimals_from_increment(0.5), 1);
        assert_eq!(decimals_from_increment(10.0), 0);
        assert_eq!(decimals_from_increment(0.000000001), 9);
        assert_eq!(decimals_from_increment(0.0000000025), 10);
    }

    #[test]
    fn test_contract_precision() {
        let contract = test_contract();
        assert_eq!(contract.price_decimals, 2);
        assert_eq!(contract.quantity_decimals, 3);
    }

    #[test]
    fn test_trade_pnl() {
        let contract = test_contract();
        let mut trade = Trade::new(&contract, "Technical", PositionSide::Long, "1", 0);
        assert_eq!(trade.pnl_at(110.0), 0.0); // not filled yet

        trade.entry_price = Some(100.0);
        trade.quantity = 2.0;
        assert_eq!(trade.pnl_at(110.0), 20.0);

        trade.side = PositionSide::Short;
        assert_eq!(trade.pnl_at(110.0), -20.0);
    }

    #[test]
    fn test_trade_holds_weak_contract() {
        let contract = test_contract();
        let trade = Trade::new(&contract, "Breakout", PositionSide::Long, "1", 0);
        assert!(trade.contract.upgrade().is_some());
        assert_eq!(trade.status, TradeStatus::PendingEntry);
        assert!(trade.is_active());

        drop(contract);
        assert!(trade.contract.upgrade().is_none());
    }

    #[test]
    fn test_order_state_terminal() {
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Rejected.is_terminal());
        assert!(!OrderState::New.is_terminal());
        assert!(!OrderState::PartiallyFilled.is_terminal());
    }
}
