//! Pre-trade risk checks.
//!
//! Every candidate order passes through [`evaluate`] before it reaches the
//! broker. Checks run in a fixed order and the first failure wins, so the
//! rejection code always names the most fundamental problem.

use serde::Serialize;
use thiserror::Error;

use crate::domain::entities::account::{Account, BrokerPosition, PositionSide};
use crate::domain::entities::asset::AssetClass;
use crate::domain::entities::bot::{BotConfig, RiskManagement};
use crate::domain::entities::order::OrderSide;

/// Smallest notional the broker accepts.
pub const MIN_TRADE_VALUE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    AccountRestricted,
    DailyLossLimit,
    MaxOrdersReached,
    LowConfidence,
    MarketClosed,
    TradeTooSmall,
    TradeTooLarge,
    InsufficientBuyingPower,
    PositionLimit,
    ExistingPosition,
    NoPosition,
    PatternDayTrader,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::AccountRestricted => "account_restricted",
            RejectionCode::DailyLossLimit => "daily_loss_limit",
            RejectionCode::MaxOrdersReached => "max_orders_reached",
            RejectionCode::LowConfidence => "low_confidence",
            RejectionCode::MarketClosed => "market_closed",
            RejectionCode::TradeTooSmall => "trade_too_small",
            RejectionCode::TradeTooLarge => "trade_too_large",
            RejectionCode::InsufficientBuyingPower => "insufficient_buying_power",
            RejectionCode::PositionLimit => "position_limit",
            RejectionCode::ExistingPosition => "existing_position",
            RejectionCode::NoPosition => "no_position",
            RejectionCode::PatternDayTrader => "pattern_day_trader",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct RiskRejection {
    pub code: RejectionCode,
    pub message: String,
}

impl RiskRejection {
    fn new(code: RejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Everything the gate needs to judge one candidate order.
#[derive(Debug, Clone)]
pub struct RiskContext<'a> {
    pub account: &'a Account,
    pub config: &'a BotConfig,
    pub symbol: &'a str,
    pub asset_class: AssetClass,
    pub side: OrderSide,
    pub trade_value: f64,
    pub confidence: f64,
    pub position: Option<&'a BrokerPosition>,
    /// Orders submitted since the start of the trading day.
    pub orders_today: u32,
    /// Whether `symbol` was bought earlier the same day.
    pub bought_today: bool,
    pub market_open: bool,
}

pub fn evaluate(ctx: &RiskContext<'_>) -> Result<(), RiskRejection> {
    let risk = &ctx.config.risk_management;
    let account = ctx.account;
    let is_buy = ctx.side == OrderSide::Buy;
    let max_position_value = risk.max_position_pct * account.equity;

    if account.is_restricted() {
        return Err(RiskRejection::new(
            RejectionCode::AccountRestricted,
            format!("Account is restricted (status {})", account.status),
        ));
    }

    let daily_pnl = account.daily_pnl_pct();
    if daily_pnl <= -risk.max_daily_loss_pct {
        return Err(RiskRejection::new(
            RejectionCode::DailyLossLimit,
            format!(
                "Daily loss {:.2}% exceeds limit of {:.2}%, trading halted",
                daily_pnl * 100.0,
                risk.max_daily_loss_pct * 100.0
            ),
        ));
    }

    let max_orders = ctx.config.execution_settings.max_orders_per_day;
    if ctx.orders_today >= max_orders {
        return Err(RiskRejection::new(
            RejectionCode::MaxOrdersReached,
            format!("Daily order limit reached ({}/{})", ctx.orders_today, max_orders),
        ));
    }

    if ctx.confidence < risk.min_confidence {
        return Err(RiskRejection::new(
            RejectionCode::LowConfidence,
            format!(
                "Confidence {:.2} below minimum {:.2}",
                ctx.confidence, risk.min_confidence
            ),
        ));
    }

    if ctx.asset_class == AssetClass::UsEquity && !ctx.market_open {
        return Err(RiskRejection::new(
            RejectionCode::MarketClosed,
            format!("Market is closed for {}", ctx.symbol),
        ));
    }

    if ctx.trade_value < MIN_TRADE_VALUE {
        return Err(RiskRejection::new(
            RejectionCode::TradeTooSmall,
            format!("Trade value ${:.2} below ${:.2} minimum", ctx.trade_value, MIN_TRADE_VALUE),
        ));
    }
    if is_buy && ctx.trade_value > max_position_value {
        return Err(RiskRejection::new(
            RejectionCode::TradeTooLarge,
            format!(
                "Trade value ${:.2} exceeds max position ${:.2}",
                ctx.trade_value, max_position_value
            ),
        ));
    }

    if is_buy {
        let buying_power = account.buying_power_for(ctx.asset_class);
        if ctx.trade_value > buying_power {
            return Err(RiskRejection::new(
                RejectionCode::InsufficientBuyingPower,
                format!(
                    "Trade value ${:.2} exceeds buying power ${:.2}",
                    ctx.trade_value, buying_power
                ),
            ));
        }

        let existing_value = ctx.position.map_or(0.0, |p| p.market_value.abs());
        if existing_value + ctx.trade_value > max_position_value {
            return Err(RiskRejection::new(
                RejectionCode::PositionLimit,
                format!(
                    "Position in {} would reach ${:.2}, above limit ${:.2}",
                    ctx.symbol,
                    existing_value + ctx.trade_value,
                    max_position_value
                ),
            ));
        }
    }

    let held = ctx.position.filter(|p| p.qty.abs() > 0.0);
    match (ctx.side, held) {
        (OrderSide::Buy, Some(p)) if p.side == PositionSide::Long => {
            return Err(RiskRejection::new(
                RejectionCode::ExistingPosition,
                format!("Already holding {} {}", p.qty, ctx.symbol),
            ));
        }
        (OrderSide::Sell, None) => {
            return Err(RiskRejection::new(
                RejectionCode::NoPosition,
                format!("No position in {} to sell", ctx.symbol),
            ));
        }
        _ => {}
    }

    if ctx.side == OrderSide::Sell
        && ctx.asset_class == AssetClass::UsEquity
        && ctx.bought_today
        && account.is_pdt_constrained()
    {
        return Err(RiskRejection::new(
            RejectionCode::PatternDayTrader,
            format!(
                "Selling {} today would be a day trade ({} used, equity ${:.2})",
                ctx.symbol, account.daytrade_count, account.equity
            ),
        ));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
        }
    }
}

/// Long positions whose unrealized P&L breaches the stop-loss or take-profit.
pub fn exit_triggers<'a>(
    positions: &'a [BrokerPosition],
    risk: &RiskManagement,
) -> Vec<(&'a BrokerPosition, ExitReason)> {
    positions
        .iter()
        .filter(|p| p.side == PositionSide::Long && p.qty > 0.0)
        .filter_map(|p| {
            if p.unrealized_plpc <= -risk.stop_loss_pct {
                Some((p, ExitReason::StopLoss))
            } else if p.unrealized_plpc >= risk.take_profit_pct {
                Some((p, ExitReason::TakeProfit))
            } else {
                None
            }
        })
        .collect()
}
