//! Brokerage account and position snapshots.

use serde::{Deserialize, Serialize};

use crate::domain::entities::asset::AssetClass;

/// Equity threshold under which the pattern day trading rule applies.
pub const PDT_EQUITY_THRESHOLD: f64 = 25_000.0;

/// Day trades allowed in a rolling five-day window below the PDT threshold.
pub const PDT_MAX_DAY_TRADES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub status: String,
    pub cash: f64,
    pub equity: f64,
    pub last_equity: f64,
    pub buying_power: f64,
    /// Cash usable for non-marginable assets such as crypto.
    pub non_marginable_buying_power: Option<f64>,
    pub portfolio_value: f64,
    pub long_market_value: f64,
    pub pattern_day_trader: bool,
    pub daytrade_count: u32,
    pub trading_blocked: bool,
    pub account_blocked: bool,
}

impl Account {
    pub fn is_restricted(&self) -> bool {
        self.trading_blocked || self.account_blocked || !self.status.eq_ignore_ascii_case("ACTIVE")
    }

    /// Change of equity since the previous close, as a fraction.
    pub fn daily_pnl_pct(&self) -> f64 {
        if self.last_equity <= 0.0 {
            0.0
        } else {
            (self.equity - self.last_equity) / self.last_equity
        }
    }

    /// Buying power applicable to an order on `class`.
    pub fn buying_power_for(&self, class: AssetClass) -> f64 {
        match class {
            AssetClass::Crypto => self.non_marginable_buying_power.unwrap_or(self.buying_power),
            AssetClass::UsEquity => self.buying_power,
        }
    }

    /// Whether another equity day trade would trip the PDT rule.
    pub fn is_pdt_constrained(&self) -> bool {
        self.pattern_day_trader
            || (self.equity < PDT_EQUITY_THRESHOLD && self.daytrade_count >= PDT_MAX_DAY_TRADES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// Open position as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: f64,
    pub avg_entry_price: f64,
    pub market_value: f64,
    pub current_price: f64,
    /// Unrealized P&L as a fraction of cost basis.
    pub unrealized_plpc: f64,
    pub asset_class: AssetClass,
    pub side: PositionSide,
}
