//! Bot controller
//!
//! Owns the process-wide bot state and the polling loop. Each cycle checks
//! open positions for stop-loss/take-profit exits, picks one symbol from the
//! asset universe, scores it, and hands actionable signals to the executor.
//!
//! ## Lock ordering
//!
//! 1. runner (Mutex)
//! 2. state (RwLock)
//! 3. metrics (RwLock)
//! 4. analyses (Mutex)
//!
//! Never hold `state` while awaiting the broker.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::entities::account::Account;
use crate::domain::entities::analysis::{Signal, TechnicalAnalysis};
use crate::domain::entities::bot::{BotConfig, BotMode, BotState};
use crate::domain::entities::market_data::Timeframe;
use crate::domain::errors::{validate_symbol, BotError};
use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::services::asset_universe::{AssetUniverse, AssetUniverseService, UniverseStats};
use crate::domain::services::market_hours::{is_market_open, is_tradable_now, MarketSession};
use crate::domain::services::metrics::BotMetrics;
use crate::domain::services::order_executor::{ExecutionContext, ExecutionOutcome, OrderExecutor};
use crate::domain::services::risk_gate::exit_triggers;
use crate::domain::services::signal_scorer::SignalScorer;
use crate::domain::value_objects::identifier::new_id;
use crate::persistence::models::{
    ActivityRecord, ActivityStatus, ActivityType, CreateActivity, CreateLearningRecord,
    LearningRecord, MetricsRecord, TradeRecord,
};
use crate::persistence::repository::{
    ActivityRepository, LearningRepository, MetricsRepository, TradeRepository,
};
use crate::persistence::DbPool;
use crate::task_runner::{run_polling_loop, LoopExit, PollingConfig};

/// Time between cycle starts
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive failed cycles before the bot stops itself
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Bars requested per analysis
pub const BAR_LIMIT: usize = 100;

pub const ANALYSIS_TIMEFRAME: Timeframe = Timeframe::FifteenMinutes;

/// Last analysis per symbol, bounded
const ANALYSIS_CACHE_CAPACITY: usize = 500;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events pushed to subscribers as the bot runs
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    Started {
        session_id: String,
        mode: BotMode,
    },
    Stopped {
        session_id: String,
        reason: String,
    },
    CycleCompleted(CycleSummary),
    OrderExecuted {
        symbol: String,
        outcome: ExecutionOutcome,
    },
    Error {
        message: String,
    },
}

/// What one polling cycle did
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub session_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub market_open: bool,
    pub symbol: Option<String>,
    pub signal: Option<Signal>,
    pub confidence: Option<f64>,
    pub executed: bool,
    /// Stop-loss/take-profit orders submitted this cycle
    pub exits: u32,
    pub note: Option<String>,
}

impl CycleSummary {
    fn new(session_id: Option<String>, started_at: DateTime<Utc>, market_open: bool) -> Self {
        Self {
            session_id,
            started_at,
            duration_ms: 0.0,
            market_open,
            symbol: None,
            signal: None,
            confidence: None,
            executed: false,
            exits: 0,
            note: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    #[serde(flatten)]
    pub state: BotState,
    pub uptime_seconds: i64,
    pub metrics: BotMetrics,
    pub market: MarketSession,
    pub universe: UniverseStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub session_id: Option<String>,
    pub live: BotMetrics,
    pub fill_rate: f64,
    pub error_rate: f64,
    /// Last flushed row for the session
    pub persisted: Option<MetricsRecord>,
}

/// Uppercases and rewrites a `BTC-USD` style pair as `BTC/USD`. Any other
/// dash is a share-class suffix and becomes the broker's `BRK.B` form.
fn normalize_symbol(raw: &str) -> String {
    let symbol = raw.trim().to_ascii_uppercase();
    match symbol.rsplit_once('-') {
        Some((base, "USD")) if !base.is_empty() => format!("{}/USD", base),
        Some((base, class)) => format!("{}.{}", base, class),
        None => symbol,
    }
}

struct Runner {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct BotService {
    broker: Arc<dyn BrokerClient>,
    universe: AssetUniverseService,
    scorer: SignalScorer,
    executor: OrderExecutor,
    activity: ActivityRepository,
    trades: TradeRepository,
    metrics_repo: MetricsRepository,
    learning: LearningRepository,
    state: RwLock<BotState>,
    metrics: RwLock<BotMetrics>,
    analyses: Mutex<LruCache<String, TechnicalAnalysis>>,
    events: broadcast::Sender<BotEvent>,
    runner: Mutex<Option<Runner>>,
    polling: PollingConfig,
    clock: fn() -> DateTime<Utc>,
}

impl BotService {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        pool: DbPool,
        universe_ttl: Duration,
        config: BotConfig,
    ) -> Self {
        let trades = TradeRepository::new(pool.clone());
        let activity = ActivityRepository::new(pool.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let capacity = NonZeroUsize::new(ANALYSIS_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);

        Self {
            universe: AssetUniverseService::new(Arc::clone(&broker), universe_ttl),
            scorer: SignalScorer::new(),
            executor: OrderExecutor::new(Arc::clone(&broker), trades.clone(), activity.clone()),
            broker,
            activity,
            trades,
            metrics_repo: MetricsRepository::new(pool.clone()),
            learning: LearningRepository::new(pool),
            state: RwLock::new(BotState::idle(config)),
            metrics: RwLock::new(BotMetrics::new()),
            analyses: Mutex::new(LruCache::new(capacity)),
            events,
            runner: Mutex::new(None),
            polling: PollingConfig {
                interval: POLL_INTERVAL,
                max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
            },
            clock: Utc::now,
        }
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Replace the wall clock, used for market-hours decisions.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    /// Start a new session and spawn the polling loop.
    ///
    /// Without a config the last one used (or the startup default) is reused.
    pub async fn start(self: &Arc<Self>, config: Option<BotConfig>) -> Result<String, BotError> {
        let mut runner = self.runner.lock().await;

        let config = {
            let state = self.state.read().await;
            if state.is_running {
                return Err(BotError::AlreadyRunning(
                    state.session_id.clone().unwrap_or_default(),
                ));
            }
            config.unwrap_or_else(|| state.config.clone())
        };
        config.validate().map_err(BotError::InvalidConfig)?;

        let session_id = new_id("session");
        let now = (self.clock)();

        self.activity
            .create(
                CreateActivity::new(
                    Some(session_id.clone()),
                    ActivityType::BotStarted,
                    ActivityStatus::Success,
                    format!("Bot started in {} mode", config.mode.as_str()),
                )
                .with_details(json!({
                    "mode": config.mode,
                    "min_confidence": config.risk_management.min_confidence,
                    "auto_execute": config.execution_settings.auto_execute,
                    "max_orders_per_day": config.execution_settings.max_orders_per_day,
                })),
            )
            .await?;

        let mode = config.mode;
        *self.state.write().await = BotState {
            is_running: true,
            config,
            start_time: Some(now),
            session_id: Some(session_id.clone()),
        };
        *self.metrics.write().await = BotMetrics::new();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let service = Arc::clone(self);
        let polling = self.polling.clone();
        let loop_session = session_id.clone();
        let handle = tokio::spawn(async move {
            let exit = run_polling_loop("bot_cycle", polling, shutdown_rx, || {
                let service = Arc::clone(&service);
                async move { service.tick().await }
            })
            .await;

            if let LoopExit::TooManyFailures { failures, last_error } = exit {
                service.halt(&loop_session, failures, last_error).await;
            }
        });

        // A previous loop that halted itself leaves a finished handle behind
        if let Some(previous) = runner.replace(Runner { shutdown, handle }) {
            previous.handle.abort();
        }

        info!(session_id = %session_id, mode = mode.as_str(), "Bot started");
        let _ = self.events.send(BotEvent::Started {
            session_id: session_id.clone(),
            mode,
        });
        Ok(session_id)
    }

    /// Signal the loop, wait for the in-flight cycle, then close the session.
    pub async fn stop(&self) -> Result<(), BotError> {
        let session_id = {
            let state = self.state.read().await;
            if !state.is_running {
                return Err(BotError::NotRunning);
            }
            state.session_id.clone().unwrap_or_default()
        };

        let runner = self.runner.lock().await.take();
        if let Some(runner) = runner {
            let _ = runner.shutdown.send(true);
            if let Err(e) = runner.handle.await {
                warn!(error = %e, "Bot loop ended abnormally");
            }
        }

        self.finish_session(&session_id, ActivityStatus::Success, "Bot stopped".to_string())
            .await?;
        Ok(())
    }

    pub async fn status(&self) -> BotStatus {
        let now = (self.clock)();
        let state = self.state.read().await.clone();
        BotStatus {
            uptime_seconds: state.uptime_seconds(now),
            state,
            metrics: self.metrics.read().await.clone(),
            market: MarketSession::at(now),
            universe: self.universe.stats().await,
        }
    }

    pub async fn broker_healthy(&self) -> bool {
        self.broker.is_healthy().await
    }

    pub fn market_status(&self) -> MarketSession {
        MarketSession::at((self.clock)())
    }

    pub async fn account(&self) -> Result<Account, BotError> {
        Ok(self.broker.get_account().await?)
    }

    /// Newest activity first, optionally for one session only.
    pub async fn recent_activity(
        &self,
        limit: i64,
        session_id: Option<&str>,
    ) -> Result<Vec<ActivityRecord>, BotError> {
        let rows = match session_id {
            Some(id) => self.activity.by_session(id, limit).await?,
            None => self.activity.recent(limit).await?,
        };
        Ok(rows)
    }

    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>, BotError> {
        Ok(self.trades.recent(limit).await?)
    }

    pub async fn recent_learning(&self, limit: i64) -> Result<Vec<LearningRecord>, BotError> {
        Ok(self.learning.recent(limit).await?)
    }

    pub async fn metrics_report(&self) -> Result<MetricsReport, BotError> {
        let session_id = self.state.read().await.session_id.clone();
        let live = self.metrics.read().await.clone();
        let persisted = match &session_id {
            Some(id) => self.metrics_repo.get(id).await?,
            None => None,
        };
        Ok(MetricsReport {
            session_id,
            fill_rate: live.fill_rate(),
            error_rate: live.error_rate(),
            live,
            persisted,
        })
    }

    /// Score `symbol` now with the current config. Nothing is executed.
    ///
    /// `BTC-USD` is accepted for `BTC/USD` so pairs fit in a path segment.
    pub async fn analyze_symbol(&self, symbol: &str) -> Result<TechnicalAnalysis, BotError> {
        let symbol = normalize_symbol(symbol);
        validate_symbol(&symbol).map_err(|e| BotError::InvalidInput(e.to_string()))?;

        let config = self.state.read().await.config.clone();
        let bars = self.broker.get_bars(&symbol, ANALYSIS_TIMEFRAME, BAR_LIMIT).await?;
        let analysis = self.scorer.analyze(&symbol, &bars, &config)?;

        self.analyses.lock().await.put(symbol, analysis.clone());
        Ok(analysis)
    }

    /// Last analysis per symbol from the loop or on-demand calls, newest first.
    pub async fn recent_analyses(&self, limit: usize) -> Vec<TechnicalAnalysis> {
        self.analyses
            .lock()
            .await
            .iter()
            .take(limit)
            .map(|(_, analysis)| analysis.clone())
            .collect()
    }

    /// One polling iteration.
    pub async fn run_cycle(&self) -> Result<CycleSummary, BotError> {
        let started = Instant::now();
        let now = (self.clock)();
        let (config, session_id) = {
            let state = self.state.read().await;
            if !state.is_running {
                return Err(BotError::NotRunning);
            }
            (state.config.clone(), state.session_id.clone())
        };

        let market_open = is_market_open(now);
        let universe = self.universe.current().await;
        let mut summary = CycleSummary::new(session_id.clone(), now, market_open);

        let mut account = self.broker.get_account().await?;
        summary.exits = self
            .check_exits(&account, &universe, &config, session_id.as_deref(), now)
            .await?;
        if summary.exits > 0 {
            account = self.broker.get_account().await?;
        }

        let picked = {
            let mut rng = rand::thread_rng();
            universe.pick(market_open, &config.schedule_settings, &mut rng)
        };
        match picked {
            Some(symbol) => {
                self.evaluate_symbol(symbol, &account, &universe, &config, now, &mut summary)
                    .await?
            }
            None => {
                debug!(market_open, "No tradable symbols this cycle");
                summary.note = Some("No tradable symbols in the current session".to_string());
            }
        }

        summary.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let snapshot = {
            let mut metrics = self.metrics.write().await;
            metrics.record_cycle(now, summary.duration_ms);
            metrics.clone()
        };
        if let Some(id) = &session_id {
            self.metrics_repo.upsert(id, &snapshot).await?;
        }

        info!(
            symbol = summary.symbol.as_deref().unwrap_or("-"),
            signal = summary.signal.map(|s| s.as_str()).unwrap_or("-"),
            executed = summary.executed,
            exits = summary.exits,
            duration_ms = summary.duration_ms,
            "Cycle completed"
        );
        let _ = self.events.send(BotEvent::CycleCompleted(summary.clone()));
        Ok(summary)
    }

    /// Latest quote midpoint, or None when the quote is missing or one-sided at zero.
    async fn quote_mid(&self, symbol: &str) -> Option<f64> {
        match self.broker.get_latest_quote(symbol).await {
            Ok(quote) => quote.mid(),
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "No live quote, sizing from the last bar");
                None
            }
        }
    }

    async fn check_exits(
        &self,
        account: &Account,
        universe: &AssetUniverse,
        config: &BotConfig,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u32, BotError> {
        let positions = self.broker.get_positions().await?;
        let market_open = is_market_open(now);
        let mut submitted = 0;

        for (position, reason) in exit_triggers(&positions, &config.risk_management) {
            if !is_tradable_now(position.asset_class, now) {
                debug!(symbol = %position.symbol, reason = reason.as_str(), "Exit deferred until the session opens");
                continue;
            }
            info!(
                symbol = %position.symbol,
                reason = reason.as_str(),
                unrealized_plpc = position.unrealized_plpc,
                "Exit triggered"
            );
            let ctx = ExecutionContext {
                session_id,
                config,
                market_open,
                fractionable: universe.is_fractionable(&position.symbol),
                now,
                reference_price: None,
            };
            let outcome = self.executor.exit_position(position, reason, account, &ctx).await?;
            if outcome.is_submitted() {
                submitted += 1;
            }
            self.record_outcome(&position.symbol, outcome).await;
        }
        Ok(submitted)
    }

    async fn evaluate_symbol(
        &self,
        symbol: String,
        account: &Account,
        universe: &AssetUniverse,
        config: &BotConfig,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) -> Result<(), BotError> {
        let session_id = summary.session_id.clone();
        summary.symbol = Some(symbol.clone());

        let bars = self.broker.get_bars(&symbol, ANALYSIS_TIMEFRAME, BAR_LIMIT).await?;
        let analysis = match self.scorer.analyze(&symbol, &bars, config) {
            Ok(analysis) => analysis,
            Err(e) => {
                // Thin history on one symbol is not a failed cycle
                debug!(symbol = %symbol, error = %e, "Skipping analysis");
                summary.note = Some(e.to_string());
                return Ok(());
            }
        };
        self.analyses.lock().await.put(symbol.clone(), analysis.clone());
        summary.signal = Some(analysis.signal);
        summary.confidence = Some(analysis.confidence);

        let actionable = analysis.is_actionable();
        if actionable {
            self.metrics.write().await.record_signal();
        }

        let should_execute = actionable
            && analysis.confidence >= config.risk_management.min_confidence
            && config.execution_settings.auto_execute;

        self.activity
            .create(
                CreateActivity::new(
                    session_id.clone(),
                    ActivityType::Analysis,
                    ActivityStatus::Info,
                    format!(
                        "{}: {} ({:.0}% confidence)",
                        symbol,
                        analysis.signal.as_str(),
                        analysis.confidence * 100.0
                    ),
                )
                .with_symbol(symbol.clone())
                .with_details(json!({
                    "score": analysis.score,
                    "strength": analysis.strength,
                    "market_condition": analysis.market_condition.as_str(),
                    "price": analysis.price(),
                    "will_execute": should_execute,
                })),
            )
            .await?;

        if should_execute {
            let position = self.broker.get_position(&symbol).await?;
            let reference_price = self.quote_mid(&symbol).await;
            let ctx = ExecutionContext {
                session_id: session_id.as_deref(),
                config,
                market_open: summary.market_open,
                fractionable: universe.is_fractionable(&symbol),
                now,
                reference_price,
            };
            let outcome = self
                .executor
                .execute(&analysis, account, position.as_ref(), &ctx)
                .await?;
            summary.executed = outcome.is_submitted();
            self.record_outcome(&symbol, outcome).await;
        } else if actionable {
            debug!(
                symbol = %symbol,
                confidence = analysis.confidence,
                min_confidence = config.risk_management.min_confidence,
                auto_execute = config.execution_settings.auto_execute,
                "Signal not executed"
            );
        }

        self.learning
            .create(CreateLearningRecord {
                session_id,
                symbol: symbol.clone(),
                signal: analysis.signal.as_str().to_string(),
                confidence: analysis.confidence,
                score: analysis.score,
                market_condition: analysis.market_condition.as_str().to_string(),
                indicators: serde_json::to_value(&analysis.indicators)
                    .unwrap_or(serde_json::Value::Null),
                executed: summary.executed,
            })
            .await?;

        if actionable {
            let mut state = self.state.write().await;
            for strategy in state.config.strategies.iter_mut().filter(|s| s.enabled) {
                strategy.performance.record(analysis.confidence, summary.executed);
            }
        }
        Ok(())
    }

    async fn record_outcome(&self, symbol: &str, outcome: ExecutionOutcome) {
        {
            let mut metrics = self.metrics.write().await;
            match &outcome {
                ExecutionOutcome::Submitted { .. } => metrics.record_submitted(),
                ExecutionOutcome::Rejected { .. } | ExecutionOutcome::Failed { .. } => {
                    metrics.record_rejected()
                }
                ExecutionOutcome::Skipped => return,
            }
        }
        let _ = self.events.send(BotEvent::OrderExecuted {
            symbol: symbol.to_string(),
            outcome,
        });
    }

    /// Loop body: a cycle that fails is counted and logged, never propagated as a panic.
    async fn tick(&self) -> Result<(), String> {
        match self.run_cycle().await {
            Ok(_) => Ok(()),
            // stop() raced with the tick
            Err(BotError::NotRunning) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                match &e {
                    BotError::Broker(broker) if broker.is_transient() => {
                        warn!(error = %message, "Bot cycle failed, retrying next cycle")
                    }
                    _ => error!(error = %message, "Bot cycle failed"),
                }

                let snapshot = {
                    let mut metrics = self.metrics.write().await;
                    metrics.record_error();
                    metrics.record_cycle((self.clock)(), 0.0);
                    metrics.clone()
                };
                let session_id = self.state.read().await.session_id.clone();
                if let Some(id) = &session_id {
                    if let Err(db) = self.metrics_repo.upsert(id, &snapshot).await {
                        warn!(error = %db, "Failed to flush metrics");
                    }
                }
                self.log_best_effort(CreateActivity::new(
                    session_id,
                    ActivityType::Error,
                    ActivityStatus::Failed,
                    format!("Cycle failed: {}", message),
                ))
                .await;

                let _ = self.events.send(BotEvent::Error {
                    message: message.clone(),
                });
                Err(message)
            }
        }
    }

    /// Called from the loop task once the failure breaker trips.
    async fn halt(&self, session_id: &str, failures: u32, last_error: String) {
        error!(
            session_id,
            failures,
            last_error = %last_error,
            "Stopping bot after repeated cycle failures"
        );
        let reason = format!(
            "Bot stopped after {} consecutive failures: {}",
            failures, last_error
        );
        if let Err(e) = self
            .finish_session(session_id, ActivityStatus::Failed, reason)
            .await
        {
            error!(error = %e, "Failed to record bot halt");
        }
    }

    /// Mark `session_id` stopped if it is still the live session.
    async fn finish_session(
        &self,
        session_id: &str,
        status: ActivityStatus,
        reason: String,
    ) -> Result<bool, BotError> {
        {
            let mut state = self.state.write().await;
            if !state.is_running || state.session_id.as_deref() != Some(session_id) {
                return Ok(false);
            }
            state.is_running = false;
            state.start_time = None;
            state.session_id = None;
        }

        let snapshot = self.metrics.read().await.clone();
        self.metrics_repo.upsert(session_id, &snapshot).await?;
        self.activity
            .create(
                CreateActivity::new(
                    Some(session_id.to_string()),
                    ActivityType::BotStopped,
                    status,
                    reason.clone(),
                )
                .with_details(json!({
                    "cycles": snapshot.cycles,
                    "orders_submitted": snapshot.orders_submitted,
                    "errors": snapshot.errors,
                })),
            )
            .await?;

        info!(session_id, reason = %reason, "Bot stopped");
        let _ = self.events.send(BotEvent::Stopped {
            session_id: session_id.to_string(),
            reason,
        });
        Ok(true)
    }

    async fn log_best_effort(&self, activity: CreateActivity) {
        if let Err(e) = self.activity.create(activity).await {
            warn!(error = %e, "Failed to write activity log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::asset::{Asset, AssetClass};
    use crate::domain::entities::bot::StrategyKind;
    use crate::domain::entities::order::OrderSide;
    use crate::domain::repositories::mock_broker::{
        bars_from_closes, long_position, test_account, MockBroker,
    };
    use crate::persistence::init_database;
    use chrono::TimeZone;

    fn saturday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 8, 16, 0, 0).unwrap()
    }

    fn crypto_asset(symbol: &str) -> Asset {
        Asset {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            class: AssetClass::Crypto,
            tradable: true,
            fractionable: true,
            status: "active".to_string(),
        }
    }

    fn choppy_closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + (i % 5) as f64 * 0.3).collect()
    }

    async fn service(broker: Arc<MockBroker>) -> Arc<BotService> {
        let pool = init_database("sqlite::memory:").await.unwrap();
        Arc::new(
            BotService::new(broker, pool, Duration::from_secs(3600), BotConfig::default())
                .with_clock(saturday_noon)
                .with_polling(PollingConfig {
                    interval: Duration::from_millis(20),
                    max_consecutive_failures: 2,
                }),
        )
    }

    async fn mark_running(service: &BotService) {
        let mut state = service.state.write().await;
        state.is_running = true;
        state.start_time = Some(saturday_noon());
        state.session_id = Some("test-session".to_string());
    }

    async fn mark_running_with(service: &BotService, config: BotConfig) {
        service.state.write().await.config = config;
        mark_running(service).await;
    }

    /// Aggressive preset scoring only RSI and Bollinger rules
    fn rsi_bollinger_config(auto_execute: bool) -> BotConfig {
        let mut config = BotConfig::for_mode(BotMode::Aggressive);
        for strategy in config.strategies.iter_mut() {
            strategy.enabled = matches!(strategy.kind, StrategyKind::Rsi | StrategyKind::Bollinger);
        }
        config.execution_settings.auto_execute = auto_execute;
        config
    }

    /// Flat chop around 100 then a sharp drop to 90: oversold and below the lower band
    fn oversold_broker() -> Arc<MockBroker> {
        let mut closes: Vec<f64> = (0..99)
            .map(|i| if i % 2 == 0 { 100.5 } else { 99.5 })
            .collect();
        closes.push(90.0);
        let broker = Arc::new(MockBroker::new(test_account(100_000.0)));
        broker.set_assets(vec![crypto_asset("BTC/USD")]);
        broker.set_bars("BTC/USD", bars_from_closes(&closes));
        broker
    }

    fn crypto_broker() -> Arc<MockBroker> {
        let broker = Arc::new(MockBroker::new(test_account(100_000.0)));
        broker.set_assets(vec![crypto_asset("BTC/USD")]);
        broker.set_bars("BTC/USD", bars_from_closes(&choppy_closes(100)));
        broker
    }

    #[tokio::test]
    async fn test_start_rejects_second_start() {
        let service = service(crypto_broker()).await;

        let session_id = service.start(None).await.unwrap();
        assert!(session_id.starts_with("session-"));
        assert!(service.status().await.state.is_running);

        let err = service.start(None).await.unwrap_err();
        assert!(matches!(err, BotError::AlreadyRunning(id) if id == session_id));

        service.stop().await.unwrap();
        assert!(!service.status().await.state.is_running);
        assert!(matches!(service.stop().await, Err(BotError::NotRunning)));

        let types: Vec<String> = service
            .recent_activity(50, None)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.activity_type)
            .collect();
        assert!(types.iter().any(|t| t == "bot_started"));
        assert!(types.iter().any(|t| t == "bot_stopped"));

        let session = service.recent_activity(50, Some(&session_id)).await.unwrap();
        assert!(!session.is_empty());
        assert!(session
            .iter()
            .all(|a| a.session_id.as_deref() == Some(session_id.as_str())));
        assert!(service
            .recent_activity(50, Some("session-unknown"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_not_started() {
        let service = service(crypto_broker()).await;
        let mut config = BotConfig::default();
        config.execution_settings.max_orders_per_day = 0;

        let err = service.start(Some(config)).await.unwrap_err();
        assert!(matches!(err, BotError::InvalidConfig(_)));
        assert!(!service.status().await.state.is_running);
    }

    #[tokio::test]
    async fn test_cycle_requires_running_bot() {
        let service = service(crypto_broker()).await;
        assert!(matches!(service.run_cycle().await, Err(BotError::NotRunning)));
    }

    #[tokio::test]
    async fn test_weekend_cycle_trades_crypto_only() {
        let service = service(crypto_broker()).await;
        mark_running(&service).await;

        let summary = service.run_cycle().await.unwrap();
        assert!(!summary.market_open);
        assert_eq!(summary.symbol.as_deref(), Some("BTC/USD"));
        assert!(summary.signal.is_some());

        let learning = service.recent_learning(10).await.unwrap();
        assert_eq!(learning.len(), 1);
        assert_eq!(learning[0].symbol, "BTC/USD");

        let report = service.metrics_report().await.unwrap();
        assert_eq!(report.live.cycles, 1);
        assert_eq!(report.persisted.map(|m| m.cycles), Some(1));
        let analyses = service.recent_analyses(10).await;
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0].symbol, "BTC/USD");
    }

    #[tokio::test]
    async fn test_stop_loss_exits_crypto_and_defers_equities() {
        let broker = crypto_broker();
        broker.add_position(long_position("ETH/USD", 0.5, 1800.0, -0.08));
        broker.add_position(long_position("AAPL", 10.0, 150.0, -0.20));
        let service = service(Arc::clone(&broker)).await;
        mark_running(&service).await;

        let summary = service.run_cycle().await.unwrap();
        assert_eq!(summary.exits, 1);

        let orders = broker.submitted();
        let exit = orders.iter().find(|o| o.symbol == "ETH/USD").unwrap();
        assert_eq!(exit.side, OrderSide::Sell);
        assert_eq!(exit.quantity.value(), 0.5);
        assert!(orders.iter().all(|o| o.symbol != "AAPL"));

        let trades = service.recent_trades(10).await.unwrap();
        assert!(trades.iter().any(|t| t.symbol == "ETH/USD" && t.side == "sell"));
        assert!(service.metrics_report().await.unwrap().live.orders_submitted >= 1);
    }

    #[tokio::test]
    async fn test_repeated_failures_halt_bot() {
        // No account configured: every cycle fails on get_account
        let broker = Arc::new(MockBroker::default());
        broker.set_assets(vec![crypto_asset("BTC/USD")]);
        let service = service(Arc::clone(&broker)).await;
        let mut events = service.subscribe();

        service.start(None).await.unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(BotEvent::Stopped { reason, .. }) => return reason,
                    Ok(_) => continue,
                    Err(e) => panic!("event channel closed: {e}"),
                }
            }
        })
        .await
        .unwrap();
        assert!(stopped.contains("2 consecutive failures"));
        assert!(!service.status().await.state.is_running);

        let activity = service.recent_activity(50, None).await.unwrap();
        assert!(activity.iter().any(|a| a.activity_type == "error"));
        assert!(activity
            .iter()
            .any(|a| a.activity_type == "bot_stopped" && a.status == "failed"));

        // A fresh start is allowed after the halt
        broker.set_account(test_account(50_000.0));
        assert!(service.start(None).await.is_ok());
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_analyze_symbol_validates_input() {
        let service = service(crypto_broker()).await;

        let err = service.analyze_symbol("not a symbol!").await.unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        let err = service.analyze_symbol("ETH/USD").await.unwrap_err();
        assert!(matches!(err, BotError::Analysis(_)));

        let analysis = service.analyze_symbol("btc-usd").await.unwrap();
        assert_eq!(analysis.symbol, "BTC/USD");
    }

    #[tokio::test]
    async fn test_confident_signal_auto_executes() {
        let broker = oversold_broker();
        let service = service(Arc::clone(&broker)).await;
        mark_running_with(&service, rsi_bollinger_config(true)).await;

        let summary = service.run_cycle().await.unwrap();
        assert_eq!(summary.signal, Some(Signal::Buy));
        assert_eq!(summary.confidence, Some(0.95));
        assert!(summary.executed);

        // No live quote: 100k * 10% * 0.95 sized at the 90.0 close
        let orders = broker.submitted();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, "BTC/USD");
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].quantity.value(), 105.555555);

        let learning = service.recent_learning(10).await.unwrap();
        assert_eq!(learning.len(), 1);
        assert!(learning[0].executed);
        assert_eq!(learning[0].signal, "BUY");

        let report = service.metrics_report().await.unwrap();
        assert_eq!(report.live.signals_generated, 1);
        assert_eq!(report.live.orders_submitted, 1);
    }

    #[tokio::test]
    async fn test_auto_execute_off_only_records_signal() {
        let broker = oversold_broker();
        let service = service(Arc::clone(&broker)).await;
        mark_running_with(&service, rsi_bollinger_config(false)).await;

        let summary = service.run_cycle().await.unwrap();
        assert_eq!(summary.signal, Some(Signal::Buy));
        assert!(!summary.executed);
        assert!(broker.submitted().is_empty());

        let learning = service.recent_learning(10).await.unwrap();
        assert!(!learning[0].executed);
        assert!(service.recent_trades(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_quote_sizes_entry() {
        let broker = oversold_broker();
        broker.set_quote("BTC/USD", 94.0, 96.0);
        let service = service(Arc::clone(&broker)).await;
        mark_running_with(&service, rsi_bollinger_config(true)).await;

        service.run_cycle().await.unwrap();

        // 9500 at the 95.0 midpoint
        let orders = broker.submitted();
        assert_eq!(orders[0].quantity.value(), 100.0);
        assert_eq!(service.recent_trades(1).await.unwrap()[0].price, 95.0);
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" btc-usd "), "BTC/USD");
        assert_eq!(normalize_symbol("eth/usd"), "ETH/USD");
        assert_eq!(normalize_symbol("brk-b"), "BRK.B");
        assert_eq!(normalize_symbol("aapl"), "AAPL");
    }

    #[tokio::test]
    async fn test_share_class_symbol_stays_equity() {
        let broker = crypto_broker();
        broker.set_bars("BRK.B", bars_from_closes(&choppy_closes(100)));
        let service = service(broker).await;

        let analysis = service.analyze_symbol("BRK-B").await.unwrap();
        assert_eq!(analysis.symbol, "BRK.B");
        assert_eq!(AssetClass::from_symbol(&analysis.symbol), AssetClass::UsEquity);
    }
}
