//! Database Models
//!
//! Rows as stored, plus the inputs used to create them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    BotStarted,
    BotStopped,
    Analysis,
    OrderSubmitted,
    OrderRejected,
    OrderFailed,
    PositionExit,
    Error,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::BotStarted => "bot_started",
            ActivityType::BotStopped => "bot_stopped",
            ActivityType::Analysis => "analysis",
            ActivityType::OrderSubmitted => "order_submitted",
            ActivityType::OrderRejected => "order_rejected",
            ActivityType::OrderFailed => "order_failed",
            ActivityType::PositionExit => "position_exit",
            ActivityType::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Success,
    Rejected,
    Failed,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "success",
            ActivityStatus::Rejected => "rejected",
            ActivityStatus::Failed => "failed",
            ActivityStatus::Info => "info",
        }
    }
}

/// Trade statuses written when the order never reached the broker.
pub const TRADE_STATUS_REJECTED: &str = "REJECTED";
pub const TRADE_STATUS_FAILED: &str = "FAILED";

/// Statuses (compared uppercased) that never count as a live order. Broker
/// acks are stored as sent, so `rejected` or `canceled` can appear here.
pub const DEAD_ORDER_STATUSES: [&str; 5] = [
    TRADE_STATUS_REJECTED,
    TRADE_STATUS_FAILED,
    "CANCELED",
    "CANCELLED",
    "EXPIRED",
];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityRecord {
    pub id: i64,
    pub session_id: Option<String>,
    pub activity_type: String,
    pub message: String,
    pub status: String,
    pub symbol: Option<String>,
    pub details: Option<String>, // JSON string
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub session_id: Option<String>,
    pub symbol: String,
    pub side: String, // "buy" or "sell"
    pub quantity: f64,
    pub price: f64,
    pub value: f64,
    pub confidence: Option<f64>,
    pub status: String,
    pub order_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MetricsRecord {
    pub session_id: String,
    pub cycles: i64,
    pub signals_generated: i64,
    pub orders_submitted: i64,
    pub orders_rejected: i64,
    pub errors: i64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LearningRecord {
    pub id: i64,
    pub session_id: Option<String>,
    pub symbol: String,
    pub signal: String,
    pub confidence: f64,
    pub score: f64,
    pub market_condition: String,
    pub indicators: String, // JSON string
    pub executed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateActivity {
    pub session_id: Option<String>,
    pub activity_type: ActivityType,
    pub message: String,
    pub status: ActivityStatus,
    pub symbol: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl CreateActivity {
    pub fn new(
        session_id: Option<String>,
        activity_type: ActivityType,
        status: ActivityStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            activity_type,
            message: message.into(),
            status,
            symbol: None,
            details: None,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreateTrade {
    pub id: String,
    pub session_id: Option<String>,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub value: f64,
    pub confidence: Option<f64>,
    pub status: String,
    pub order_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateLearningRecord {
    pub session_id: Option<String>,
    pub symbol: String,
    pub signal: String,
    pub confidence: f64,
    pub score: f64,
    pub market_condition: String,
    pub indicators: serde_json::Value,
    pub executed: bool,
}
