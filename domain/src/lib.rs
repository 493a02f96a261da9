pub mod config;
pub mod core;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod locks;
pub mod portfolio;
pub mod snapshot;
pub mod user;

pub use crate::core::Celesta;
pub use config::EngineConfig;
pub use engine::{PortfolioEngine, TradeReceipt};
pub use envelope::{Envelope, ErrorBody};
pub use error::PortfolioError;

pub use database_adapter::model::{AssetClass, Holding, Snapshot, TradeSide, Transaction, UserId};

#[cfg(test)]
mod tests;
