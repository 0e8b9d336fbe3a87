// Exchange collaborator surface consumed by the trading core
pub mod paper;

pub use paper::{FillBehavior, PaperExchange, PlacedOrder};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{Balance, Candle, Contract, OrderSide, OrderStatus, OrderType, Timeframe};

/// Abstract exchange connection
///
/// Wire formats, authentication and venue-specific parsing live behind this
/// trait; the core only sees these operations.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Tradable contracts keyed by symbol
    async fn get_contracts(&self) -> Result<HashMap<String, Arc<Contract>>>;

    /// Balance snapshot keyed by asset
    async fn get_balances(&self) -> Result<HashMap<String, Balance>>;

    /// Historical candles, oldest first
    async fn get_historical_candles(
        &self,
        contract: &Contract,
        timeframe: Timeframe,
    ) -> Result<Vec<Candle>>;

    /// Submit an order; the returned status may be terminal or pending
    async fn place_order(
        &self,
        contract: &Contract,
        order_type: OrderType,
        quantity: f64,
        side: OrderSide,
    ) -> Result<OrderStatus>;

    async fn get_order_status(&self, contract: &Contract, order_id: &str) -> Result<OrderStatus>;
}
