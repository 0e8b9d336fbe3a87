use thiserror::Error;

/// Errors surfaced by the trading core and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    #[error("Candle history for {symbol} {timeframe} is empty; seed it before processing ticks")]
    EmptyHistory { symbol: String, timeframe: String },

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Market data feed error: {0}")]
    Feed(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Runner channel closed for {0}")]
    ChannelClosed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
