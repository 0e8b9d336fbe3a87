// Application configuration: optional TOML file plus AUTOTRADER__* overrides
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::execution::{PollConfig, RiskParams};
use crate::feed::MarketScenario;
use crate::gateway::{FillBehavior, PaperExchange};
use crate::models::{Contract, MarketKind, Timeframe};
use crate::strategy::SignalEngine;

pub const DEFAULT_LOG_FILTER: &str = "autotrader=info";
const ENV_PREFIX: &str = "AUTOTRADER";

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

/// One strategy activation: what to trade, how much and with which signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Percent of the free quote balance committed per trade
    pub balance_pct: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub strategy: SignalEngine,
}

/// Contract listed on the paper exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperContract {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub tick_size: f64,
    pub lot_size: f64,
    #[serde(default = "default_market_kind")]
    pub market_kind: MarketKind,
    pub start_price: f64,
}

/// Starting free balance of one asset on the paper exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperBalance {
    pub asset: String,
    pub free: f64,
}

fn default_market_kind() -> MarketKind {
    MarketKind::Spot
}

/// Settings of the in-memory exchange used by `autotrader run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Status polls before an order fills; 0 fills in the order response
    pub fill_latency_polls: u32,
    pub seed: u64,
    pub scenario: MarketScenario,
    pub tick_interval_ms: u64,
    pub history_len: usize,
    pub balances: Vec<PaperBalance>,
    pub contracts: Vec<PaperContract>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            fill_latency_polls: 0,
            seed: 42,
            scenario: MarketScenario::Sideways,
            tick_interval_ms: 500,
            history_len: 200,
            balances: vec![PaperBalance {
                asset: "USDT".to_string(),
                free: 10_000.0,
            }],
            contracts: vec![PaperContract {
                symbol: "BTCUSDT".to_string(),
                base_asset: "BTC".to_string(),
                quote_asset: "USDT".to_string(),
                tick_size: 0.01,
                lot_size: 0.00001,
                market_kind: MarketKind::Spot,
                start_price: 30_000.0,
            }],
        }
    }
}

impl PaperConfig {
    /// Build the paper exchange described by this config
    pub fn build_exchange(&self) -> PaperExchange {
        let fill = match self.fill_latency_polls {
            0 => FillBehavior::Immediate,
            n => FillBehavior::AfterPolls(n),
        };

        let mut exchange = PaperExchange::new(fill)
            .with_scenario(self.scenario, self.seed)
            .with_history_len(self.history_len)
            .with_tick_interval(Duration::from_millis(self.tick_interval_ms.max(1)));

        for c in &self.contracts {
            let contract = Contract::new(
                &c.symbol,
                &c.base_asset,
                &c.quote_asset,
                c.tick_size,
                c.lot_size,
                c.market_kind,
            );
            exchange = exchange.with_contract(contract, c.start_price);
        }
        for balance in &self.balances {
            exchange.set_balance(&balance.asset, balance.free);
        }

        exchange
    }
}

impl StrategyConfig {
    pub fn risk(&self) -> RiskParams {
        RiskParams {
            balance_pct: self.balance_pct,
            take_profit: self.take_profit,
            stop_loss: self.stop_loss,
        }
    }

    /// Reject parameter sets a runner cannot trade with
    pub fn validate(&self) -> Result<()> {
        let invalid =
            |msg: String| Err(Error::InvalidConfig(format!("{}: {}", self.symbol, msg)));

        if self.symbol.is_empty() {
            return Err(Error::InvalidConfig("strategy without symbol".to_string()));
        }
        if !(self.balance_pct > 0.0 && self.balance_pct <= 100.0) {
            return invalid(format!("balance_pct {} not in (0, 100]", self.balance_pct));
        }
        if self.take_profit <= 0.0 {
            return invalid(format!("take_profit {} must be positive", self.take_profit));
        }
        if self.stop_loss <= 0.0 {
            return invalid(format!("stop_loss {} must be positive", self.stop_loss));
        }

        match &self.strategy {
            SignalEngine::Technical(p) => {
                if p.rsi_length == 0 || p.ema_fast == 0 || p.ema_slow == 0 || p.ema_signal == 0 {
                    return invalid("indicator lengths must be positive".to_string());
                }
                if p.ema_fast >= p.ema_slow {
                    return invalid(format!(
                        "ema_fast {} must be below ema_slow {}",
                        p.ema_fast, p.ema_slow
                    ));
                }
            }
            SignalEngine::Breakout(p) => {
                if p.min_volume < 0.0 {
                    return invalid(format!("min_volume {} is negative", p.min_volume));
                }
            }
        }

        Ok(())
    }
}

impl AppConfig {
    /// Load from an optional TOML file, then apply `AUTOTRADER__*` env overrides
    ///
    /// `.env` is read first so overrides can live there too.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let app: AppConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        app.validate().context("Configuration rejected")?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_ms == 0 || self.poll.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "poll interval and attempts must be positive".to_string(),
            ));
        }
        if self.strategies.is_empty() {
            return Err(Error::InvalidConfig("no strategies configured".to_string()));
        }
        for strategy in &self.strategies {
            strategy.validate()?;
        }
        Ok(())
    }
}
