//! In-memory broker for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use super::broker_client::{BrokerClient, BrokerError, BrokerResult};
use crate::domain::entities::account::{Account, BrokerPosition, PositionSide};
use crate::domain::entities::asset::{Asset, AssetClass};
use crate::domain::entities::market_data::{Bar, Quote, Timeframe};
use crate::domain::entities::order::{Order, OrderAck};

#[derive(Default)]
struct State {
    account: Option<Account>,
    positions: HashMap<String, BrokerPosition>,
    bars: HashMap<String, Vec<Bar>>,
    quotes: HashMap<String, Quote>,
    assets: Vec<Asset>,
    submitted: Vec<Order>,
    order_error: Option<BrokerError>,
}

#[derive(Default)]
pub struct MockBroker {
    state: Mutex<State>,
}

pub fn test_account(equity: f64) -> Account {
    Account {
        id: "mock-account".to_string(),
        status: "ACTIVE".to_string(),
        cash: equity,
        equity,
        last_equity: equity,
        buying_power: equity * 2.0,
        non_marginable_buying_power: Some(equity),
        portfolio_value: equity,
        long_market_value: 0.0,
        pattern_day_trader: false,
        daytrade_count: 0,
        trading_blocked: false,
        account_blocked: false,
    }
}

pub fn long_position(symbol: &str, qty: f64, price: f64, plpc: f64) -> BrokerPosition {
    BrokerPosition {
        symbol: symbol.to_string(),
        qty,
        avg_entry_price: price / (1.0 + plpc),
        market_value: qty * price,
        current_price: price,
        unrealized_plpc: plpc,
        asset_class: AssetClass::from_symbol(symbol),
        side: PositionSide::Long,
    }
}

/// Bars whose closes follow `closes`, one minute apart.
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            timestamp: start + Duration::minutes(i as i64),
            open: c,
            high: c + 0.5,
            low: (c - 0.5).max(0.01),
            close: c,
            volume: 1_000.0,
        })
        .collect()
}

impl MockBroker {
    pub fn new(account: Account) -> Self {
        let broker = Self::default();
        broker.state.lock().unwrap().account = Some(account);
        broker
    }

    pub fn set_account(&self, account: Account) {
        self.state.lock().unwrap().account = Some(account);
    }

    pub fn add_position(&self, position: BrokerPosition) {
        self.state
            .lock()
            .unwrap()
            .positions
            .insert(position.symbol.clone(), position);
    }

    pub fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        self.state.lock().unwrap().bars.insert(symbol.to_string(), bars);
    }

    pub fn set_quote(&self, symbol: &str, bid: f64, ask: f64) {
        let quote = Quote {
            symbol: symbol.to_string(),
            bid,
            ask,
            timestamp: Utc::now(),
        };
        self.state.lock().unwrap().quotes.insert(symbol.to_string(), quote);
    }

    pub fn set_assets(&self, assets: Vec<Asset>) {
        self.state.lock().unwrap().assets = assets;
    }

    pub fn fail_orders_with(&self, error: BrokerError) {
        self.state.lock().unwrap().order_error = Some(error);
    }

    pub fn submitted(&self) -> Vec<Order> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_account(&self) -> BrokerResult<Account> {
        self.state
            .lock()
            .unwrap()
            .account
            .clone()
            .ok_or_else(|| BrokerError::Auth("no account".to_string()))
    }

    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        Ok(self.state.lock().unwrap().positions.values().cloned().collect())
    }

    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<BrokerPosition>> {
        Ok(self.state.lock().unwrap().positions.get(symbol).cloned())
    }

    async fn submit_order(&self, order: &Order) -> BrokerResult<OrderAck> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.order_error.clone() {
            return Err(error);
        }
        state.submitted.push(order.clone());
        Ok(OrderAck {
            order_id: format!("mock-{}", state.submitted.len()),
            client_order_id: order.client_order_id.clone(),
            status: "accepted".to_string(),
            filled_qty: 0.0,
            filled_avg_price: None,
        })
    }

    async fn get_latest_quote(&self, symbol: &str) -> BrokerResult<Quote> {
        self.state
            .lock()
            .unwrap()
            .quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(symbol.to_string()))
    }

    async fn get_bars(&self, symbol: &str, _timeframe: Timeframe, limit: usize) -> BrokerResult<Vec<Bar>> {
        let state = self.state.lock().unwrap();
        let bars = state.bars.get(symbol).cloned().unwrap_or_default();
        let skip = bars.len().saturating_sub(limit);
        Ok(bars.into_iter().skip(skip).collect())
    }

    async fn list_assets(&self, class: AssetClass) -> BrokerResult<Vec<Asset>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .assets
            .iter()
            .filter(|a| a.class == class)
            .cloned()
            .collect())
    }
}
