use serde::{Deserialize, Serialize};

use crate::domain::entities::asset::AssetClass;
use crate::domain::value_objects::{price::Price, quantity::Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
}

impl TimeInForce {
    /// Crypto orders cannot be DAY orders.
    pub fn for_class(class: AssetClass) -> Self {
        match class {
            AssetClass::Crypto => TimeInForce::Gtc,
            AssetClass::UsEquity => TimeInForce::Day,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub quantity: Quantity,
    pub limit_price: Option<Price>,
}

impl Order {
    pub fn market(
        client_order_id: String,
        symbol: String,
        side: OrderSide,
        quantity: Quantity,
    ) -> Result<Self, String> {
        if quantity.is_zero() {
            return Err("Order quantity must be positive".to_string());
        }
        let time_in_force = TimeInForce::for_class(AssetClass::from_symbol(&symbol));
        Ok(Order {
            client_order_id,
            symbol,
            side,
            order_type: OrderType::Market,
            time_in_force,
            quantity,
            limit_price: None,
        })
    }

    pub fn limit(
        client_order_id: String,
        symbol: String,
        side: OrderSide,
        quantity: Quantity,
        limit_price: Option<Price>,
    ) -> Result<Self, String> {
        let limit_price = limit_price.ok_or("Limit orders must have a price")?;
        let mut order = Self::market(client_order_id, symbol, side, quantity)?;
        order.order_type = OrderType::Limit;
        order.limit_price = Some(limit_price);
        Ok(order)
    }

    pub fn asset_class(&self) -> AssetClass {
        AssetClass::from_symbol(&self.symbol)
    }
}

/// Broker acknowledgement of a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: String,
    pub status: String,
    pub filled_qty: f64,
    pub filled_avg_price: Option<f64>,
}
