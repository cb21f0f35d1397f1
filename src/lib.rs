// Core modules
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod market;
pub mod models;
pub mod persistence;
pub mod risk;

// Re-export commonly used types
pub use engine::{CycleReport, TradingDay, TradingEngine};
pub use error::{ConfigError, GatewayError, StoreError};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
