// Technical indicators module
// Implements RSI, EMA and MACD over candle closes

pub mod macd;
pub mod moving_average;
pub mod rsi;

pub use macd::{calculate_macd_series, Macd};
pub use moving_average::{calculate_ema, calculate_ema_series, ewm_mean};
pub use rsi::{calculate_rsi, calculate_rsi_series};
