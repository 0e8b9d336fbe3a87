// Market data feeds delivering ticks to strategy runners
pub mod synthetic;

pub use synthetic::{MarketScenario, SyntheticTickGenerator};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::models::{Contract, Tick};

const FEED_CHANNEL_CAPACITY: usize = 1024;

/// Push-style source of trade ticks
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Start receiving ticks for `contract`, in arrival order
    async fn subscribe(&self, contract: &Contract) -> Result<mpsc::Receiver<Tick>>;
}

/// Feed fanned out from an external publisher
///
/// A connector task (websocket listener, replay file, test) calls
/// `publish`; every subscriber of the symbol gets the tick.
#[derive(Default)]
pub struct ChannelFeed {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Tick>>>>,
}

impl ChannelFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a tick to every live subscriber of `symbol`
    ///
    /// # Returns
    /// Number of subscribers that received it
    pub async fn publish(&self, symbol: &str, tick: Tick) -> Result<usize> {
        let senders = {
            let subscribers = self
                .subscribers
                .lock()
                .map_err(|e| Error::Feed(e.to_string()))?;
            subscribers.get(symbol).cloned().unwrap_or_default()
        };

        let mut delivered = 0;
        for sender in senders {
            if sender.send(tick).await.is_ok() {
                delivered += 1;
            }
        }

        // Forget subscribers that went away
        if let Ok(mut subscribers) = self.subscribers.lock() {
            if let Some(list) = subscribers.get_mut(symbol) {
                list.retain(|s| !s.is_closed());
            }
        }

        Ok(delivered)
    }
}

#[async_trait]
impl MarketDataFeed for ChannelFeed {
    async fn subscribe(&self, contract: &Contract) -> Result<mpsc::Receiver<Tick>> {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .map_err(|e| Error::Feed(e.to_string()))?
            .entry(contract.symbol.clone())
            .or_default()
            .push(tx);

        tracing::info!(symbol = %contract.symbol, "Subscribed to trade feed");
        Ok(rx)
    }
}
