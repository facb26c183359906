//! Broker Client Trait
//!
//! Everything the bot needs from the brokerage: account and position
//! snapshots, order submission, and market data. The trading loop only ever
//! talks to this trait, so tests drive it with an in-memory broker.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::account::{Account, BrokerPosition};
use crate::domain::entities::asset::{Asset, AssetClass};
use crate::domain::entities::market_data::{Bar, Quote, Timeframe};
use crate::domain::entities::order::{Order, OrderAck};

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BrokerError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Broker API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode broker response: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Broker rate limit exceeded")]
    RateLimited,

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),
}

impl BrokerError {
    /// Transient failures worth retrying on the next cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            BrokerError::Http(_) | BrokerError::RateLimited => true,
            BrokerError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn name(&self) -> &str;

    async fn get_account(&self) -> BrokerResult<Account>;

    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>>;

    /// Position in `symbol`, or None when flat.
    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<BrokerPosition>>;

    async fn submit_order(&self, order: &Order) -> BrokerResult<OrderAck>;

    async fn get_latest_quote(&self, symbol: &str) -> BrokerResult<Quote>;

    /// Most recent `limit` bars, oldest first.
    async fn get_bars(&self, symbol: &str, timeframe: Timeframe, limit: usize)
        -> BrokerResult<Vec<Bar>>;

    /// Active assets of `class`.
    async fn list_assets(&self, class: AssetClass) -> BrokerResult<Vec<Asset>>;

    async fn is_healthy(&self) -> bool {
        self.get_account().await.is_ok()
    }
}
