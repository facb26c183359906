//! Alpaca REST client
//!
//! Implements [`BrokerClient`] over the Alpaca trading API (paper endpoint by
//! default) and the market data API. The trading API encodes numbers as
//! strings; the data API uses plain JSON numbers. Both are accepted.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::domain::entities::account::{Account, BrokerPosition, PositionSide};
use crate::domain::entities::asset::{Asset, AssetClass};
use crate::domain::entities::market_data::{Bar, Quote, Timeframe};
use crate::domain::entities::order::{Order, OrderAck, OrderType, TimeInForce};
use crate::domain::repositories::broker_client::{BrokerClient, BrokerError, BrokerResult};
use crate::secrets::BrokerCredentials;

pub const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
pub const MARKET_DATA_URL: &str = "https://data.alpaca.markets";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// How far back bar requests look; sorted newest first and trimmed by `limit`.
const BAR_LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub trading_url: String,
    pub data_url: String,
    pub credentials: BrokerCredentials,
}

impl AlpacaConfig {
    pub fn paper(credentials: BrokerCredentials) -> Self {
        Self {
            trading_url: PAPER_TRADING_URL.to_string(),
            data_url: MARKET_DATA_URL.to_string(),
            credentials,
        }
    }
}

/// Accepts `"12.5"` or `12.5`.
fn de_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn de_opt_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct AccountDto {
    id: String,
    status: String,
    #[serde(deserialize_with = "de_number")]
    cash: f64,
    #[serde(deserialize_with = "de_number")]
    equity: f64,
    #[serde(deserialize_with = "de_number")]
    last_equity: f64,
    #[serde(deserialize_with = "de_number")]
    buying_power: f64,
    #[serde(default, deserialize_with = "de_opt_number")]
    non_marginable_buying_power: Option<f64>,
    #[serde(deserialize_with = "de_number")]
    portfolio_value: f64,
    #[serde(default, deserialize_with = "de_opt_number")]
    long_market_value: Option<f64>,
    #[serde(default)]
    pattern_day_trader: bool,
    #[serde(default)]
    daytrade_count: u32,
    #[serde(default)]
    trading_blocked: bool,
    #[serde(default)]
    account_blocked: bool,
}

impl From<AccountDto> for Account {
    fn from(dto: AccountDto) -> Self {
        Account {
            id: dto.id,
            status: dto.status,
            cash: dto.cash,
            equity: dto.equity,
            last_equity: dto.last_equity,
            buying_power: dto.buying_power,
            non_marginable_buying_power: dto.non_marginable_buying_power,
            portfolio_value: dto.portfolio_value,
            long_market_value: dto.long_market_value.unwrap_or(0.0),
            pattern_day_trader: dto.pattern_day_trader,
            daytrade_count: dto.daytrade_count,
            trading_blocked: dto.trading_blocked,
            account_blocked: dto.account_blocked,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PositionDto {
    symbol: String,
    #[serde(deserialize_with = "de_number")]
    qty: f64,
    #[serde(deserialize_with = "de_number")]
    avg_entry_price: f64,
    #[serde(deserialize_with = "de_number")]
    market_value: f64,
    #[serde(deserialize_with = "de_number")]
    current_price: f64,
    #[serde(deserialize_with = "de_number")]
    unrealized_plpc: f64,
    asset_class: String,
    side: String,
}

fn parse_asset_class(raw: &str) -> Option<AssetClass> {
    match raw {
        "us_equity" => Some(AssetClass::UsEquity),
        "crypto" => Some(AssetClass::Crypto),
        _ => None,
    }
}

/// Positions report crypto as `BTCUSD`; the rest of the bot uses `BTC/USD`.
fn normalize_crypto_symbol(symbol: &str) -> String {
    if symbol.contains('/') {
        return symbol.to_string();
    }
    match symbol.strip_suffix("USD") {
        Some(base) if !base.is_empty() => format!("{}/USD", base),
        _ => symbol.to_string(),
    }
}

/// Path form of a symbol for `/v2/positions/{symbol}`
fn position_path_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

impl TryFrom<PositionDto> for BrokerPosition {
    type Error = BrokerError;

    fn try_from(dto: PositionDto) -> Result<Self, Self::Error> {
        let asset_class = parse_asset_class(&dto.asset_class)
            .ok_or_else(|| BrokerError::Decode(format!("unknown asset class {}", dto.asset_class)))?;
        let symbol = match asset_class {
            AssetClass::Crypto => normalize_crypto_symbol(&dto.symbol),
            AssetClass::UsEquity => dto.symbol,
        };
        let side = if dto.side.eq_ignore_ascii_case("short") {
            PositionSide::Short
        } else {
            PositionSide::Long
        };

        Ok(BrokerPosition {
            symbol,
            qty: dto.qty,
            avg_entry_price: dto.avg_entry_price,
            market_value: dto.market_value,
            current_price: dto.current_price,
            unrealized_plpc: dto.unrealized_plpc,
            asset_class,
            side,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AssetDto {
    symbol: String,
    #[serde(default)]
    name: String,
    class: String,
    #[serde(default)]
    tradable: bool,
    #[serde(default)]
    fractionable: bool,
    status: String,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    symbol: &'a str,
    qty: String,
    side: &'a str,
    #[serde(rename = "type")]
    order_type: &'a str,
    time_in_force: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    client_order_id: &'a str,
}

impl<'a> From<&'a Order> for OrderRequest<'a> {
    fn from(order: &'a Order) -> Self {
        OrderRequest {
            symbol: &order.symbol,
            qty: order.quantity.to_order_string(),
            side: order.side.as_str(),
            order_type: match order.order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
            },
            time_in_force: match order.time_in_force {
                TimeInForce::Day => "day",
                TimeInForce::Gtc => "gtc",
            },
            limit_price: order.limit_price.map(|p| p.value().to_string()),
            client_order_id: &order.client_order_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    client_order_id: String,
    status: String,
    #[serde(default, deserialize_with = "de_opt_number")]
    filled_qty: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_number")]
    filled_avg_price: Option<f64>,
}

impl From<OrderResponse> for OrderAck {
    fn from(dto: OrderResponse) -> Self {
        OrderAck {
            order_id: dto.id,
            client_order_id: dto.client_order_id,
            status: dto.status,
            filled_qty: dto.filled_qty.unwrap_or(0.0),
            filled_avg_price: dto.filled_avg_price,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BarDto {
    t: DateTime<Utc>,
    #[serde(deserialize_with = "de_number")]
    o: f64,
    #[serde(deserialize_with = "de_number")]
    h: f64,
    #[serde(deserialize_with = "de_number")]
    l: f64,
    #[serde(deserialize_with = "de_number")]
    c: f64,
    #[serde(deserialize_with = "de_number")]
    v: f64,
}

#[derive(Debug, Deserialize)]
struct StockBarsResponse {
    #[serde(default)]
    bars: Option<Vec<BarDto>>,
}

#[derive(Debug, Deserialize)]
struct CryptoBarsResponse {
    #[serde(default)]
    bars: HashMap<String, Vec<BarDto>>,
}

#[derive(Debug, Deserialize)]
struct QuoteDto {
    t: DateTime<Utc>,
    #[serde(deserialize_with = "de_number")]
    ap: f64,
    #[serde(deserialize_with = "de_number")]
    bp: f64,
}

#[derive(Debug, Deserialize)]
struct StockQuoteResponse {
    quote: QuoteDto,
}

#[derive(Debug, Deserialize)]
struct CryptoQuotesResponse {
    #[serde(default)]
    quotes: HashMap<String, QuoteDto>,
}

/// Converts newest-first bars into validated oldest-first bars, skipping bad rows.
fn bars_oldest_first(symbol: &str, mut raw: Vec<BarDto>) -> Vec<Bar> {
    raw.sort_by_key(|b| b.t);
    raw.into_iter()
        .filter_map(|b| match Bar::new(b.t, b.o, b.h, b.l, b.c, b.v) {
            Ok(bar) => Some(bar),
            Err(e) => {
                warn!(symbol = %symbol, timestamp = %b.t, error = %e, "Skipping malformed bar");
                None
            }
        })
        .collect()
}

pub struct AlpacaClient {
    client: Client,
    config: AlpacaConfig,
}

impl AlpacaClient {
    pub fn new(config: AlpacaConfig) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BrokerError::Http(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            trading_url = %config.trading_url,
            data_url = %config.data_url,
            "Alpaca client configured"
        );
        Ok(Self { client, config })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("APCA-API-KEY-ID", self.config.credentials.key_id.as_str())
            .header("APCA-API-SECRET-KEY", self.config.credentials.secret_key.as_str())
    }

    fn trading(&self, path: &str) -> String {
        format!("{}{}", self.config.trading_url.trim_end_matches('/'), path)
    }

    fn data(&self, path: &str) -> String {
        format!("{}{}", self.config.data_url.trim_end_matches('/'), path)
    }

    async fn send(&self, request: RequestBuilder) -> BrokerResult<Response> {
        let response = self
            .authed(request)
            .send()
            .await
            .map_err(|e| BrokerError::Http(e.to_string()))?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> BrokerResult<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))
    }

    fn bars_start(&self) -> String {
        (Utc::now() - chrono::Duration::days(BAR_LOOKBACK_DAYS)).to_rfc3339()
    }
}

async fn check_status(response: Response) -> BrokerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), path = %url, body = %body, "Broker request failed");

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BrokerError::Auth(body),
        StatusCode::NOT_FOUND => BrokerError::NotFound(url),
        StatusCode::TOO_MANY_REQUESTS => BrokerError::RateLimited,
        _ => BrokerError::Api {
            status: status.as_u16(),
            message: extract_message(&body),
        },
    })
}

/// Alpaca errors look like `{"code": 40010001, "message": "..."}`
fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl BrokerClient for AlpacaClient {
    fn name(&self) -> &str {
        "Alpaca"
    }

    async fn get_account(&self) -> BrokerResult<Account> {
        let dto: AccountDto = self
            .get_json(self.client.get(self.trading("/v2/account")))
            .await?;
        Ok(dto.into())
    }

    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        let dtos: Vec<PositionDto> = self
            .get_json(self.client.get(self.trading("/v2/positions")))
            .await?;
        dtos.into_iter().map(BrokerPosition::try_from).collect()
    }

    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<BrokerPosition>> {
        let path = format!("/v2/positions/{}", position_path_symbol(symbol));
        match self.get_json::<PositionDto>(self.client.get(self.trading(&path))).await {
            Ok(dto) => BrokerPosition::try_from(dto).map(Some),
            Err(BrokerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn submit_order(&self, order: &Order) -> BrokerResult<OrderAck> {
        let body = OrderRequest::from(order);
        debug!(
            symbol = %order.symbol,
            side = %order.side,
            qty = %body.qty,
            client_order_id = %order.client_order_id,
            "Submitting order"
        );

        let response: OrderResponse = self
            .get_json(self.client.post(self.trading("/v2/orders")).json(&body))
            .await?;
        Ok(response.into())
    }

    async fn get_latest_quote(&self, symbol: &str) -> BrokerResult<Quote> {
        let quote = match AssetClass::from_symbol(symbol) {
            AssetClass::Crypto => {
                let mut response: CryptoQuotesResponse = self
                    .get_json(
                        self.client
                            .get(self.data("/v1beta3/crypto/us/latest/quotes"))
                            .query(&[("symbols", symbol)]),
                    )
                    .await?;
                response
                    .quotes
                    .remove(symbol)
                    .ok_or_else(|| BrokerError::NotFound(symbol.to_string()))?
            }
            AssetClass::UsEquity => {
                let path = format!("/v2/stocks/{}/quotes/latest", symbol);
                let response: StockQuoteResponse = self
                    .get_json(self.client.get(self.data(&path)).query(&[("feed", "iex")]))
                    .await?;
                response.quote
            }
        };

        Ok(Quote {
            symbol: symbol.to_string(),
            bid: quote.bp,
            ask: quote.ap,
            timestamp: quote.t,
        })
    }

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> BrokerResult<Vec<Bar>> {
        let limit_param = limit.to_string();
        let start = self.bars_start();
        let params = [
            ("timeframe", timeframe.as_str()),
            ("limit", limit_param.as_str()),
            ("start", start.as_str()),
            ("sort", "desc"),
        ];

        let raw = match AssetClass::from_symbol(symbol) {
            AssetClass::Crypto => {
                let mut response: CryptoBarsResponse = self
                    .get_json(
                        self.client
                            .get(self.data("/v1beta3/crypto/us/bars"))
                            .query(&params)
                            .query(&[("symbols", symbol)]),
                    )
                    .await?;
                response.bars.remove(symbol).unwrap_or_default()
            }
            AssetClass::UsEquity => {
                let path = format!("/v2/stocks/{}/bars", symbol);
                let response: StockBarsResponse = self
                    .get_json(
                        self.client
                            .get(self.data(&path))
                            .query(&params)
                            .query(&[("feed", "iex")]),
                    )
                    .await?;
                response.bars.unwrap_or_default()
            }
        };

        let bars = bars_oldest_first(symbol, raw);
        debug!(symbol = %symbol, timeframe = timeframe.as_str(), count = bars.len(), "Fetched bars");
        Ok(bars)
    }

    async fn list_assets(&self, class: AssetClass) -> BrokerResult<Vec<Asset>> {
        let dtos: Vec<AssetDto> = self
            .get_json(
                self.client
                    .get(self.trading("/v2/assets"))
                    .query(&[("status", "active"), ("asset_class", class.as_str())]),
            )
            .await?;

        Ok(dtos
            .into_iter()
            .filter_map(|dto| {
                let class = parse_asset_class(&dto.class)?;
                Some(Asset {
                    symbol: dto.symbol,
                    name: dto.name,
                    class,
                    tradable: dto.tradable,
                    fractionable: dto.fractionable,
                    status: dto.status,
                })
            })
            .collect())
    }
}
