use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::order::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        }
    }

    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            Signal::Buy => Some(OrderSide::Buy),
            Signal::Sell => Some(OrderSide::Sell),
            Signal::Hold => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketCondition {
    Bullish,
    Bearish,
    Sideways,
    Volatile,
}

impl MarketCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCondition::Bullish => "BULLISH",
            MarketCondition::Bearish => "BEARISH",
            MarketCondition::Sideways => "SIDEWAYS",
            MarketCondition::Volatile => "VOLATILE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValues {
    pub macd: f64,
    /// Approximated as a fixed fraction of the MACD line.
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerValues {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Position of the price inside the bands: 0 at lower, 1 at upper.
    pub percent_b: f64,
}

/// Indicator readings at the latest bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub rsi: f64,
    pub macd: Option<MacdValues>,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub ema12: Option<f64>,
    pub ema26: Option<f64>,
    pub bollinger: Option<BollingerValues>,
    pub atr: Option<f64>,
    pub volume: f64,
    pub avg_volume: Option<f64>,
}

/// Ephemeral per-cycle analysis; recomputed every time, never stored as a series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalAnalysis {
    pub symbol: String,
    pub signal: Signal,
    pub confidence: f64,
    pub score: f64,
    pub strength: u32,
    pub indicators: IndicatorSnapshot,
    pub market_condition: MarketCondition,
    pub analyzed_at: DateTime<Utc>,
}

impl TechnicalAnalysis {
    pub fn price(&self) -> f64 {
        self.indicators.price
    }

    pub fn is_actionable(&self) -> bool {
        self.signal != Signal::Hold
    }
}
