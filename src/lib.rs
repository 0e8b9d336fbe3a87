// Core modules
pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod gateway;
pub mod indicators;
pub mod models;
pub mod strategy;

// Re-export commonly used types
pub use error::{Error, Result};
pub use models::*;
pub use strategy::{SignalEngine, SignalStrategy};
