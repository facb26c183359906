//! Position sizing
//!
//! Turns a signal's confidence into an order quantity that respects:
//! - The configured order size as a fraction of equity or portfolio value
//! - The per-symbol position cap
//! - Broker quantity precision (whole shares, 4 dp fractional shares, 6 dp crypto)

use thiserror::Error;

use crate::domain::entities::account::Account;
use crate::domain::entities::asset::AssetClass;
use crate::domain::entities::bot::{BotConfig, SizingMethod};
use crate::domain::entities::order::OrderSide;
use crate::domain::value_objects::quantity::Quantity;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("Invalid price for {symbol}: {price}")]
    InvalidPrice { symbol: String, price: f64 },

    #[error("Order for {symbol} rounds to zero quantity (target ${value:.2} at ${price:.4})")]
    TooSmall {
        symbol: String,
        value: f64,
        price: f64,
    },
}

#[derive(Debug, Clone)]
pub struct SizingRequest<'a> {
    pub symbol: &'a str,
    pub asset_class: AssetClass,
    pub fractionable: bool,
    pub side: OrderSide,
    pub price: f64,
    pub confidence: f64,
    /// Quantity currently held, if any.
    pub held_qty: Option<f64>,
    /// Close the whole position instead of trimming it.
    pub full_exit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedOrder {
    pub quantity: Quantity,
    pub value: f64,
}

/// Decimal places the broker accepts for a quantity.
pub fn quantity_decimals(class: AssetClass, fractionable: bool) -> u32 {
    match class {
        AssetClass::Crypto => 6,
        AssetClass::UsEquity if fractionable => 4,
        AssetClass::UsEquity => 0,
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionSizer;

impl PositionSizer {
    pub fn new() -> Self {
        Self
    }

    /// Dollar value the bot is willing to commit to a new order.
    pub fn target_value(&self, account: &Account, config: &BotConfig, confidence: f64) -> f64 {
        let execution = &config.execution_settings;
        let base = match execution.sizing_method {
            SizingMethod::PercentOfEquity => account.equity,
            SizingMethod::PercentOfPortfolio => account.portfolio_value,
        };
        let cap = config.risk_management.max_position_pct * account.equity;
        (base * execution.order_size_pct * confidence).min(cap).max(0.0)
    }

    pub fn size(
        &self,
        req: &SizingRequest<'_>,
        account: &Account,
        config: &BotConfig,
    ) -> Result<SizedOrder, SizingError> {
        if !req.price.is_finite() || req.price <= 0.0 {
            return Err(SizingError::InvalidPrice {
                symbol: req.symbol.to_string(),
                price: req.price,
            });
        }

        let decimals = quantity_decimals(req.asset_class, req.fractionable);
        let target_value = self.target_value(account, config, req.confidence);
        let target_qty = target_value / req.price;

        let raw_qty = match (req.side, req.held_qty) {
            (OrderSide::Sell, Some(held)) if req.full_exit => held.abs(),
            (OrderSide::Sell, Some(held)) => target_qty.min(held.abs()),
            _ => target_qty,
        };

        let quantity = Quantity::new(raw_qty).unwrap_or(Quantity::zero());
        // Full exits sell exactly what is held
        let quantity = if req.full_exit { quantity } else { quantity.floor_to(decimals) };

        if quantity.is_zero() {
            return Err(SizingError::TooSmall {
                symbol: req.symbol.to_string(),
                value: target_value,
                price: req.price,
            });
        }

        Ok(SizedOrder {
            quantity,
            value: quantity.value() * req.price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::bot::BotMode;

    fn account() -> Account {
        Account {
            id: "acc-1".to_string(),
            status: "ACTIVE".to_string(),
            cash: 100_000.0,
            equity: 100_000.0,
            last_equity: 100_000.0,
            buying_power: 200_000.0,
            non_marginable_buying_power: None,
            portfolio_value: 120_000.0,
            long_market_value: 20_000.0,
            pattern_day_trader: false,
            daytrade_count: 0,
            trading_blocked: false,
            account_blocked: false,
        }
    }

    fn buy(symbol: &str, class: AssetClass, fractionable: bool, price: f64) -> SizingRequest<'_> {
        SizingRequest {
            symbol,
            asset_class: class,
            fractionable,
            side: OrderSide::Buy,
            price,
            confidence: 0.8,
            held_qty: None,
            full_exit: false,
        }
    }

    #[test]
    fn test_target_value_scales_with_confidence() {
        let sizer = PositionSizer::new();
        let config = BotConfig::for_mode(BotMode::Balanced);
        // 100k * 5% * 0.8
        assert!((sizer.target_value(&account(), &config, 0.8) - 4_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_target_value_capped_by_max_position() {
        let sizer = PositionSizer::new();
        let mut config = BotConfig::for_mode(BotMode::Balanced);
        config.execution_settings.order_size_pct = 0.5;
        assert!((sizer.target_value(&account(), &config, 0.9) - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_portfolio_sizing_method() {
        let sizer = PositionSizer::new();
        let mut config = BotConfig::for_mode(BotMode::Balanced);
        config.execution_settings.sizing_method = SizingMethod::PercentOfPortfolio;
        // 120k * 5% * 1.0
        assert!((sizer.target_value(&account(), &config, 1.0) - 6_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_whole_shares_for_non_fractionable() {
        let sizer = PositionSizer::new();
        let config = BotConfig::for_mode(BotMode::Balanced);
        let sized = sizer
            .size(&buy("BRK", AssetClass::UsEquity, false, 333.0), &account(), &config)
            .unwrap();
        // 4000 / 333 = 12.01
        assert_eq!(sized.quantity.value(), 12.0);
        assert!((sized.value - 3_996.0).abs() < 1e-9);
    }

    #[test]
    fn test_fractional_precision() {
        let sizer = PositionSizer::new();
        let config = BotConfig::for_mode(BotMode::Balanced);
        let equity = sizer
            .size(&buy("AAPL", AssetClass::UsEquity, true, 3_000.0), &account(), &config)
            .unwrap();
        assert_eq!(equity.quantity.value(), 1.3333);

        let crypto = sizer
            .size(&buy("BTC/USD", AssetClass::Crypto, true, 60_000.0), &account(), &config)
            .unwrap();
        assert_eq!(crypto.quantity.value(), 0.066666);
    }

    #[test]
    fn test_too_small() {
        let sizer = PositionSizer::new();
        let config = BotConfig::for_mode(BotMode::Balanced);
        let err = sizer
            .size(&buy("NVR", AssetClass::UsEquity, false, 7_500.0), &account(), &config)
            .unwrap_err();
        assert!(matches!(err, SizingError::TooSmall { .. }));
    }

    #[test]
    fn test_invalid_price() {
        let sizer = PositionSizer::new();
        let config = BotConfig::for_mode(BotMode::Balanced);
        let err = sizer
            .size(&buy("AAPL", AssetClass::UsEquity, true, 0.0), &account(), &config)
            .unwrap_err();
        assert!(matches!(err, SizingError::InvalidPrice { .. }));
    }

    #[test]
    fn test_sell_limited_to_holding() {
        let sizer = PositionSizer::new();
        let config = BotConfig::for_mode(BotMode::Balanced);
        let mut req = buy("AAPL", AssetClass::UsEquity, true, 100.0);
        req.side = OrderSide::Sell;
        req.held_qty = Some(5.0);
        let sized = sizer.size(&req, &account(), &config).unwrap();
        assert_eq!(sized.quantity.value(), 5.0);

        req.held_qty = Some(100.0);
        let trimmed = sizer.size(&req, &account(), &config).unwrap();
        assert_eq!(trimmed.quantity.value(), 40.0);

        req.full_exit = true;
        let exit = sizer.size(&req, &account(), &config).unwrap();
        assert_eq!(exit.quantity.value(), 100.0);
    }
}
