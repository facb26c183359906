//! Order execution
//!
//! Takes an actionable analysis (or a stop-loss/take-profit exit), sizes it,
//! runs the risk gate, submits a market order, and records the outcome.
//! A rejected or failed order is a normal outcome, not an error; only storage
//! failures propagate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::entities::account::{Account, BrokerPosition};
use crate::domain::entities::analysis::TechnicalAnalysis;
use crate::domain::entities::asset::AssetClass;
use crate::domain::entities::bot::BotConfig;
use crate::domain::entities::order::{Order, OrderAck, OrderSide};
use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::services::market_hours::trading_day_start;
use crate::domain::services::position_sizer::{PositionSizer, SizingRequest};
use crate::domain::services::risk_gate::{self, ExitReason, RejectionCode, RiskContext};
use crate::domain::value_objects::identifier::new_id;
use crate::domain::value_objects::price::Price;
use crate::domain::value_objects::quantity::Quantity;
use crate::persistence::models::{
    ActivityStatus, ActivityType, CreateActivity, CreateTrade, TRADE_STATUS_FAILED,
    TRADE_STATUS_REJECTED,
};
use crate::persistence::repository::{ActivityRepository, TradeRepository};
use crate::persistence::DatabaseError;

/// Per-call inputs that are not part of the analysis itself.
#[derive(Debug, Clone)]
pub struct ExecutionContext<'a> {
    pub session_id: Option<&'a str>,
    pub config: &'a BotConfig,
    pub market_open: bool,
    pub fractionable: bool,
    /// Cycle clock; the daily order window is measured from here
    pub now: DateTime<Utc>,
    /// Live quote midpoint. Signal entries size from the bar close without it.
    pub reference_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Submitted {
        trade_id: String,
        order_id: String,
        status: String,
        quantity: f64,
        value: f64,
    },
    Rejected {
        code: Option<RejectionCode>,
        reason: String,
    },
    Failed {
        reason: String,
    },
    /// HOLD signals never reach the broker.
    Skipped,
}

impl ExecutionOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, ExecutionOutcome::Submitted { .. })
    }
}

struct Candidate<'a> {
    symbol: &'a str,
    side: OrderSide,
    price: f64,
    confidence: f64,
    exit: Option<ExitReason>,
}

pub struct OrderExecutor {
    broker: Arc<dyn BrokerClient>,
    trades: TradeRepository,
    activity: ActivityRepository,
    sizer: PositionSizer,
}

impl OrderExecutor {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        trades: TradeRepository,
        activity: ActivityRepository,
    ) -> Self {
        Self {
            broker,
            trades,
            activity,
            sizer: PositionSizer::new(),
        }
    }

    pub async fn execute(
        &self,
        analysis: &TechnicalAnalysis,
        account: &Account,
        position: Option<&BrokerPosition>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, DatabaseError> {
        let Some(side) = analysis.signal.order_side() else {
            return Ok(ExecutionOutcome::Skipped);
        };

        let candidate = Candidate {
            symbol: &analysis.symbol,
            side,
            price: ctx.reference_price.unwrap_or_else(|| analysis.price()),
            confidence: analysis.confidence,
            exit: None,
        };
        self.run(candidate, account, position, ctx).await
    }

    /// Close a long position that hit its stop-loss or take-profit.
    pub async fn exit_position(
        &self,
        position: &BrokerPosition,
        reason: ExitReason,
        account: &Account,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, DatabaseError> {
        let candidate = Candidate {
            symbol: &position.symbol,
            side: OrderSide::Sell,
            price: position.current_price,
            confidence: 1.0,
            exit: Some(reason),
        };
        self.run(candidate, account, Some(position), ctx).await
    }

    async fn run(
        &self,
        candidate: Candidate<'_>,
        account: &Account,
        position: Option<&BrokerPosition>,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, DatabaseError> {
        let asset_class = AssetClass::from_symbol(candidate.symbol);

        let sizing = SizingRequest {
            symbol: candidate.symbol,
            asset_class,
            fractionable: ctx.fractionable || asset_class == AssetClass::Crypto,
            side: candidate.side,
            price: candidate.price,
            confidence: candidate.confidence,
            held_qty: position.map(|p| p.qty),
            full_exit: candidate.exit.is_some(),
        };
        let sized = match self.sizer.size(&sizing, account, ctx.config) {
            Ok(sized) => sized,
            Err(e) => {
                return self
                    .record_rejection(&candidate, 0.0, None, e.to_string(), ctx)
                    .await;
            }
        };

        let day_start = trading_day_start(ctx.now);
        let orders_today = self.trades.count_since(day_start).await?;
        let bought_today = match candidate.side {
            OrderSide::Sell => self.trades.bought_since(candidate.symbol, day_start).await?,
            OrderSide::Buy => false,
        };

        let risk = RiskContext {
            account,
            config: ctx.config,
            symbol: candidate.symbol,
            asset_class,
            side: candidate.side,
            trade_value: sized.value,
            confidence: candidate.confidence,
            position,
            orders_today: u32::try_from(orders_today).unwrap_or(u32::MAX),
            bought_today,
            market_open: ctx.market_open,
        };
        if let Err(rejection) = risk_gate::evaluate(&risk) {
            return self
                .record_rejection(
                    &candidate,
                    sized.quantity.value(),
                    Some(rejection.code),
                    rejection.message,
                    ctx,
                )
                .await;
        }

        let order = match build_order(&candidate, sized.quantity, ctx.config) {
            Ok(order) => order,
            Err(e) => {
                return self
                    .record_rejection(&candidate, sized.quantity.value(), None, e, ctx)
                    .await;
            }
        };

        match self.broker.submit_order(&order).await {
            Ok(ack) => self.record_submission(&candidate, &order, &ack, sized.value, ctx).await,
            Err(e) => {
                warn!(
                    symbol = %candidate.symbol,
                    side = %candidate.side,
                    error = %e,
                    "Order submission failed"
                );
                let reason = e.to_string();
                self.trades
                    .create(CreateTrade {
                        id: new_id("trd"),
                        session_id: ctx.session_id.map(str::to_string),
                        symbol: candidate.symbol.to_string(),
                        side: candidate.side.as_str().to_string(),
                        quantity: sized.quantity.value(),
                        price: candidate.price,
                        value: sized.value,
                        confidence: Some(candidate.confidence),
                        status: TRADE_STATUS_FAILED.to_string(),
                        order_id: None,
                        reason: Some(reason.clone()),
                    })
                    .await?;
                self.activity
                    .create(
                        CreateActivity::new(
                            ctx.session_id.map(str::to_string),
                            ActivityType::OrderFailed,
                            ActivityStatus::Failed,
                            format!("{} {} failed: {}", candidate.side, candidate.symbol, reason),
                        )
                        .with_symbol(candidate.symbol),
                    )
                    .await?;
                Ok(ExecutionOutcome::Failed { reason })
            }
        }
    }

    async fn record_submission(
        &self,
        candidate: &Candidate<'_>,
        order: &Order,
        ack: &OrderAck,
        value: f64,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, DatabaseError> {
        let quantity = order.quantity.value();
        let trade = self
            .trades
            .create(CreateTrade {
                id: new_id("trd"),
                session_id: ctx.session_id.map(str::to_string),
                symbol: candidate.symbol.to_string(),
                side: candidate.side.as_str().to_string(),
                quantity,
                price: candidate.price,
                value,
                confidence: Some(candidate.confidence),
                status: ack.status.clone(),
                order_id: Some(ack.order_id.clone()),
                reason: candidate.exit.map(|r| r.as_str().to_string()),
            })
            .await?;

        let (activity_type, message) = match candidate.exit {
            Some(reason) => (
                ActivityType::PositionExit,
                format!(
                    "Closed {} {} ({})",
                    order.quantity.to_order_string(),
                    candidate.symbol,
                    reason.as_str()
                ),
            ),
            None => (
                ActivityType::OrderSubmitted,
                format!(
                    "{} {} {} @ ${:.2} (confidence {:.0}%)",
                    candidate.side,
                    order.quantity.to_order_string(),
                    candidate.symbol,
                    candidate.price,
                    candidate.confidence * 100.0
                ),
            ),
        };
        self.activity
            .create(
                CreateActivity::new(
                    ctx.session_id.map(str::to_string),
                    activity_type,
                    ActivityStatus::Success,
                    message,
                )
                .with_symbol(candidate.symbol)
                .with_details(json!({
                    "trade_id": trade.id,
                    "order_id": ack.order_id,
                    "client_order_id": ack.client_order_id,
                    "status": ack.status,
                    "quantity": quantity,
                    "value": value,
                })),
            )
            .await?;

        info!(
            symbol = %candidate.symbol,
            side = %candidate.side,
            quantity = quantity,
            value = value,
            order_id = %ack.order_id,
            status = %ack.status,
            "Order submitted"
        );

        Ok(ExecutionOutcome::Submitted {
            trade_id: trade.id,
            order_id: ack.order_id.clone(),
            status: ack.status.clone(),
            quantity,
            value,
        })
    }

    async fn record_rejection(
        &self,
        candidate: &Candidate<'_>,
        quantity: f64,
        code: Option<RejectionCode>,
        reason: String,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, DatabaseError> {
        info!(
            symbol = %candidate.symbol,
            side = %candidate.side,
            code = code.map(|c| c.as_str()).unwrap_or("sizing"),
            reason = %reason,
            "Order rejected"
        );

        self.trades
            .create(CreateTrade {
                id: new_id("trd"),
                session_id: ctx.session_id.map(str::to_string),
                symbol: candidate.symbol.to_string(),
                side: candidate.side.as_str().to_string(),
                quantity,
                price: candidate.price,
                value: quantity * candidate.price,
                confidence: Some(candidate.confidence),
                status: TRADE_STATUS_REJECTED.to_string(),
                order_id: None,
                reason: Some(reason.clone()),
            })
            .await?;

        self.activity
            .create(
                CreateActivity::new(
                    ctx.session_id.map(str::to_string),
                    ActivityType::OrderRejected,
                    ActivityStatus::Rejected,
                    format!("{} {} rejected: {}", candidate.side, candidate.symbol, reason),
                )
                .with_symbol(candidate.symbol)
                .with_details(json!({ "code": code.map(|c| c.as_str()) })),
            )
            .await?;

        Ok(ExecutionOutcome::Rejected { code, reason })
    }
}

/// Market order, or a limit order for signal entries when an offset is configured.
fn build_order(
    candidate: &Candidate<'_>,
    quantity: Quantity,
    config: &BotConfig,
) -> Result<Order, String> {
    let client_order_id = new_id("ord");
    let symbol = candidate.symbol.to_string();
    match (candidate.exit, config.execution_settings.limit_offset_pct) {
        (None, Some(offset)) => {
            let raw = match candidate.side {
                OrderSide::Buy => candidate.price * (1.0 + offset),
                OrderSide::Sell => candidate.price * (1.0 - offset),
            };
            let limit = Price::new(round_limit_price(raw))?;
            Order::limit(client_order_id, symbol, candidate.side, quantity, Some(limit))
        }
        _ => Order::market(client_order_id, symbol, candidate.side, quantity),
    }
}

/// Cents at or above $1, four decimals below.
fn round_limit_price(price: f64) -> f64 {
    let scale = if price >= 1.0 { 100.0 } else { 10_000.0 };
    (price * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::analysis::{IndicatorSnapshot, MarketCondition, Signal};
    use crate::domain::entities::bot::BotMode;
    use crate::domain::entities::order::OrderType;
    use crate::domain::repositories::broker_client::BrokerError;
    use crate::domain::repositories::mock_broker::{long_position, test_account, MockBroker};
    use crate::persistence::init_database;

    fn analysis(symbol: &str, signal: Signal, confidence: f64, price: f64) -> TechnicalAnalysis {
        TechnicalAnalysis {
            symbol: symbol.to_string(),
            signal,
            confidence,
            score: 70.0,
            strength: 3,
            indicators: IndicatorSnapshot {
                price,
                rsi: 28.0,
                macd: None,
                sma20: None,
                sma50: None,
                ema12: None,
                ema26: None,
                bollinger: None,
                atr: None,
                volume: 1_000.0,
                avg_volume: None,
            },
            market_condition: MarketCondition::Bullish,
            analyzed_at: Utc::now(),
        }
    }

    async fn setup() -> (Arc<MockBroker>, OrderExecutor, TradeRepository, ActivityRepository) {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let broker = Arc::new(MockBroker::new(test_account(100_000.0)));
        let trades = TradeRepository::new(pool.clone());
        let activity = ActivityRepository::new(pool);
        let executor = OrderExecutor::new(broker.clone(), trades.clone(), activity.clone());
        (broker, executor, trades, activity)
    }

    fn ctx(config: &BotConfig) -> ExecutionContext<'_> {
        ExecutionContext {
            session_id: Some("sess-1"),
            config,
            market_open: true,
            fractionable: true,
            now: Utc::now(),
            reference_price: None,
        }
    }

    #[tokio::test]
    async fn test_hold_is_skipped() {
        let (broker, executor, _, _) = setup().await;
        let config = BotConfig::for_mode(BotMode::Balanced);
        let outcome = executor
            .execute(&analysis("AAPL", Signal::Hold, 0.5, 150.0), &test_account(100_000.0), None, &ctx(&config))
            .await
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Skipped));
        assert!(broker.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_buy_submits_and_records() {
        let (broker, executor, trades, activity) = setup().await;
        let config = BotConfig::for_mode(BotMode::Balanced);
        let outcome = executor
            .execute(&analysis("AAPL", Signal::Buy, 0.8, 200.0), &test_account(100_000.0), None, &ctx(&config))
            .await
            .unwrap();

        // 100k * 5% * 0.8 = 4000 -> 20 shares
        match &outcome {
            ExecutionOutcome::Submitted { quantity, status, .. } => {
                assert_eq!(*quantity, 20.0);
                assert_eq!(status, "accepted");
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let orders = broker.submitted();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);

        let stored = trades.recent(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].order_id.as_deref(), Some("mock-1"));

        let log = activity.recent(10).await.unwrap();
        assert_eq!(log[0].activity_type, "order_submitted");
        assert_eq!(log[0].status, "success");
    }

    #[tokio::test]
    async fn test_risk_rejection_is_recorded_not_raised() {
        let (broker, executor, trades, activity) = setup().await;
        let config = BotConfig::for_mode(BotMode::Balanced);
        let mut context = ctx(&config);
        context.market_open = false;

        let outcome = executor
            .execute(&analysis("AAPL", Signal::Buy, 0.8, 200.0), &test_account(100_000.0), None, &context)
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Rejected { code, .. } => assert_eq!(code, Some(RejectionCode::MarketClosed)),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(broker.submitted().is_empty());
        assert_eq!(trades.recent(1).await.unwrap()[0].status, TRADE_STATUS_REJECTED);
        assert_eq!(activity.recent(1).await.unwrap()[0].status, "rejected");
    }

    #[tokio::test]
    async fn test_sell_without_position_rejected() {
        let (_, executor, _, _) = setup().await;
        let config = BotConfig::for_mode(BotMode::Balanced);
        let outcome = executor
            .execute(&analysis("BTC/USD", Signal::Sell, 0.8, 60_000.0), &test_account(100_000.0), None, &ctx(&config))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ExecutionOutcome::Rejected { code: Some(RejectionCode::NoPosition), .. }
        ));
    }

    #[tokio::test]
    async fn test_sizing_failure_is_rejection() {
        let (_, executor, _, activity) = setup().await;
        let config = BotConfig::for_mode(BotMode::Balanced);
        let mut context = ctx(&config);
        context.fractionable = false;
        let outcome = executor
            .execute(&analysis("NVR", Signal::Buy, 0.8, 7_500.0), &test_account(100_000.0), None, &context)
            .await
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Rejected { code: None, .. }));
        assert_eq!(activity.recent(1).await.unwrap()[0].activity_type, "order_rejected");
    }

    #[tokio::test]
    async fn test_broker_failure_recorded() {
        let (broker, executor, trades, _) = setup().await;
        broker.fail_orders_with(BrokerError::Api { status: 422, message: "qty".into() });
        let config = BotConfig::for_mode(BotMode::Balanced);
        let outcome = executor
            .execute(&analysis("AAPL", Signal::Buy, 0.8, 200.0), &test_account(100_000.0), None, &ctx(&config))
            .await
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
        assert_eq!(trades.recent(1).await.unwrap()[0].status, TRADE_STATUS_FAILED);
    }

    #[tokio::test]
    async fn test_exit_sells_whole_position() {
        let (broker, executor, trades, activity) = setup().await;
        let config = BotConfig::for_mode(BotMode::Balanced);
        let position = long_position("ETH/USD", 1.234567, 3_000.0, -0.08);
        let outcome = executor
            .exit_position(&position, ExitReason::StopLoss, &test_account(100_000.0), &ctx(&config))
            .await
            .unwrap();
        assert!(outcome.is_submitted());

        let orders = broker.submitted();
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!(orders[0].quantity.value(), 1.234567);
        assert_eq!(trades.recent(1).await.unwrap()[0].reason.as_deref(), Some("stop_loss"));
        assert_eq!(activity.recent(1).await.unwrap()[0].activity_type, "position_exit");
    }

    #[tokio::test]
    async fn test_daily_order_limit_counts_stored_trades() {
        let (_, executor, _, _) = setup().await;
        let mut config = BotConfig::for_mode(BotMode::Balanced);
        config.execution_settings.max_orders_per_day = 1;

        let first = executor
            .execute(&analysis("AAPL", Signal::Buy, 0.8, 200.0), &test_account(100_000.0), None, &ctx(&config))
            .await
            .unwrap();
        assert!(first.is_submitted());

        let second = executor
            .execute(&analysis("MSFT", Signal::Buy, 0.8, 400.0), &test_account(100_000.0), None, &ctx(&config))
            .await
            .unwrap();
        assert!(matches!(
            second,
            ExecutionOutcome::Rejected { code: Some(RejectionCode::MaxOrdersReached), .. }
        ));
    }

    #[tokio::test]
    async fn test_reference_price_drives_sizing() {
        let (_, executor, trades, _) = setup().await;
        let config = BotConfig::for_mode(BotMode::Balanced);
        let mut context = ctx(&config);
        context.reference_price = Some(250.0);

        // 100k * 5% * 0.8 = 4000 at the quote (250), not the bar close (200)
        let outcome = executor
            .execute(&analysis("AAPL", Signal::Buy, 0.8, 200.0), &test_account(100_000.0), None, &context)
            .await
            .unwrap();
        match outcome {
            ExecutionOutcome::Submitted { quantity, .. } => assert_eq!(quantity, 16.0),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(trades.recent(1).await.unwrap()[0].price, 250.0);
    }

    #[tokio::test]
    async fn test_limit_offset_places_limit_entries() {
        let (broker, executor, _, _) = setup().await;
        let mut config = BotConfig::for_mode(BotMode::Balanced);
        config.execution_settings.limit_offset_pct = Some(0.01);

        executor
            .execute(&analysis("AAPL", Signal::Buy, 0.8, 200.0), &test_account(100_000.0), None, &ctx(&config))
            .await
            .unwrap();
        let position = long_position("ETH/USD", 1.5, 3_000.0, -0.08);
        executor
            .exit_position(&position, ExitReason::StopLoss, &test_account(100_000.0), &ctx(&config))
            .await
            .unwrap();

        let orders = broker.submitted();
        assert_eq!(orders[0].order_type, OrderType::Limit);
        assert_eq!(orders[0].limit_price.map(|p| p.value()), Some(202.0));
        assert_eq!(orders[1].order_type, OrderType::Market);
        assert!(orders[1].limit_price.is_none());
    }

    #[tokio::test]
    async fn test_daily_window_follows_context_clock() {
        let (_, executor, _, _) = setup().await;
        let mut config = BotConfig::for_mode(BotMode::Balanced);
        config.execution_settings.max_orders_per_day = 1;

        let first = executor
            .execute(&analysis("AAPL", Signal::Buy, 0.8, 200.0), &test_account(100_000.0), None, &ctx(&config))
            .await
            .unwrap();
        assert!(first.is_submitted());

        // A later trading day starts with an empty count
        let mut later = ctx(&config);
        later.now = Utc::now() + chrono::Duration::days(2);
        let next_day = executor
            .execute(&analysis("MSFT", Signal::Buy, 0.8, 400.0), &test_account(100_000.0), None, &later)
            .await
            .unwrap();
        assert!(next_day.is_submitted());
    }

    #[test]
    fn test_limit_price_rounding() {
        assert_eq!(round_limit_price(202.004), 202.0);
        assert_eq!(round_limit_price(0.123456), 0.1235);
    }
}
