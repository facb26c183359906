//! Database Repository
//!
//! Data access for activity logs, trades, session metrics, and learning records.

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::services::metrics::BotMetrics;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

/// Activity log repository
#[derive(Clone)]
pub struct ActivityRepository {
    pool: DbPool,
}

impl ActivityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, activity: CreateActivity) -> Result<ActivityRecord, DatabaseError> {
        let details = activity.details.map(|d| d.to_string());

        let record = sqlx::query_as::<_, ActivityRecord>(
            r#"
            INSERT INTO bot_activity_logs (
                session_id, activity_type, message, status, symbol, details, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            RETURNING *
            "#,
        )
        .bind(&activity.session_id)
        .bind(activity.activity_type.as_str())
        .bind(&activity.message)
        .bind(activity.status.as_str())
        .bind(&activity.symbol)
        .bind(details)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create activity log: {}", e);
            DatabaseError::QueryError(format!("Failed to create activity log: {}", e))
        })?;

        debug!(
            activity_type = %record.activity_type,
            status = %record.status,
            "Logged bot activity"
        );
        Ok(record)
    }

    /// Most recent activity, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<ActivityRecord>, DatabaseError> {
        sqlx::query_as::<_, ActivityRecord>(
            "SELECT * FROM bot_activity_logs ORDER BY created_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get recent activity: {}", e);
            DatabaseError::QueryError(format!("Failed to get recent activity: {}", e))
        })
    }

    pub async fn by_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, DatabaseError> {
        sqlx::query_as::<_, ActivityRecord>(
            r#"
            SELECT * FROM bot_activity_logs
            WHERE session_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get activity for session {}: {}", session_id, e);
            DatabaseError::QueryError(format!("Failed to get session activity: {}", e))
        })
    }
}

/// Trade repository
#[derive(Clone)]
pub struct TradeRepository {
    pool: DbPool,
}

impl TradeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, trade: CreateTrade) -> Result<TradeRecord, DatabaseError> {
        let record = sqlx::query_as::<_, TradeRecord>(
            r#"
            INSERT INTO trades (
                id, session_id, symbol, side, quantity, price, value,
                confidence, status, order_id, reason, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            RETURNING *
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.session_id)
        .bind(&trade.symbol)
        .bind(&trade.side)
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(trade.value)
        .bind(trade.confidence)
        .bind(&trade.status)
        .bind(&trade.order_id)
        .bind(&trade.reason)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create trade: {}", e);
            DatabaseError::QueryError(format!("Failed to create trade: {}", e))
        })?;

        debug!("Created trade: {} {} {}", record.id, record.side, record.symbol);
        Ok(record)
    }

    /// Most recent trades, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<TradeRecord>, DatabaseError> {
        sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades ORDER BY created_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get recent trades: {}", e);
            DatabaseError::QueryError(format!("Failed to get recent trades: {}", e))
        })
    }

    /// Orders that reached the broker since `since`
    pub async fn count_since(&self, since: DateTime<Utc>) -> Result<i64, DatabaseError> {
        let mut query = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT COUNT(*) FROM trades
            WHERE created_at >= ?1 AND UPPER(status) NOT IN (?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(since);
        for status in DEAD_ORDER_STATUSES {
            query = query.bind(status);
        }
        let (count,) = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to count trades: {}", e);
                DatabaseError::QueryError(format!("Failed to count trades: {}", e))
            })?;

        Ok(count)
    }

    /// Whether `symbol` was bought since `since`
    pub async fn bought_since(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut query = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT COUNT(*) FROM trades
            WHERE symbol = ?1 AND side = 'buy' AND created_at >= ?2
              AND UPPER(status) NOT IN (?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(symbol)
        .bind(since);
        for status in DEAD_ORDER_STATUSES {
            query = query.bind(status);
        }
        let (count,) = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to check buys for {}: {}", symbol, e);
                DatabaseError::QueryError(format!("Failed to check buys: {}", e))
            })?;

        Ok(count > 0)
    }
}

/// Session metrics repository
#[derive(Clone)]
pub struct MetricsRepository {
    pool: DbPool,
}

impl MetricsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, session_id: &str, metrics: &BotMetrics) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO bot_metrics (
                session_id, cycles, signals_generated, orders_submitted,
                orders_rejected, errors, last_cycle_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(session_id) DO UPDATE SET
                cycles = excluded.cycles,
                signals_generated = excluded.signals_generated,
                orders_submitted = excluded.orders_submitted,
                orders_rejected = excluded.orders_rejected,
                errors = excluded.errors,
                last_cycle_at = excluded.last_cycle_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session_id)
        .bind(metrics.cycles as i64)
        .bind(metrics.signals_generated as i64)
        .bind(metrics.orders_submitted as i64)
        .bind(metrics.orders_rejected as i64)
        .bind(metrics.errors as i64)
        .bind(metrics.last_cycle_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to upsert metrics for {}: {}", session_id, e);
            DatabaseError::QueryError(format!("Failed to upsert metrics: {}", e))
        })?;

        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<MetricsRecord>, DatabaseError> {
        sqlx::query_as::<_, MetricsRecord>("SELECT * FROM bot_metrics WHERE session_id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get metrics for {}: {}", session_id, e);
                DatabaseError::QueryError(format!("Failed to get metrics: {}", e))
            })
    }
}

/// Learning record repository
#[derive(Clone)]
pub struct LearningRepository {
    pool: DbPool,
}

impl LearningRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        record: CreateLearningRecord,
    ) -> Result<LearningRecord, DatabaseError> {
        sqlx::query_as::<_, LearningRecord>(
            r#"
            INSERT INTO learning_records (
                session_id, symbol, signal, confidence, score,
                market_condition, indicators, executed, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING *
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.symbol)
        .bind(&record.signal)
        .bind(record.confidence)
        .bind(record.score)
        .bind(&record.market_condition)
        .bind(record.indicators.to_string())
        .bind(record.executed)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create learning record: {}", e);
            DatabaseError::QueryError(format!("Failed to create learning record: {}", e))
        })
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<LearningRecord>, DatabaseError> {
        sqlx::query_as::<_, LearningRecord>(
            "SELECT * FROM learning_records ORDER BY created_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get learning records: {}", e);
            DatabaseError::QueryError(format!("Failed to get learning records: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;
    use chrono::Duration;

    fn trade(id: &str, symbol: &str, side: &str, status: &str) -> CreateTrade {
        CreateTrade {
            id: id.to_string(),
            session_id: Some("sess-1".to_string()),
            symbol: symbol.to_string(),
            side: side.to_string(),
            quantity: 2.0,
            price: 150.0,
            value: 300.0,
            confidence: Some(0.8),
            status: status.to_string(),
            order_id: None,
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_activity_create_and_query() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = ActivityRepository::new(pool);

        let created = repo
            .create(
                CreateActivity::new(
                    Some("sess-1".to_string()),
                    ActivityType::BotStarted,
                    ActivityStatus::Success,
                    "Bot started in BALANCED mode",
                )
                .with_details(serde_json::json!({ "mode": "BALANCED" })),
            )
            .await
            .unwrap();
        assert_eq!(created.activity_type, "bot_started");
        assert_eq!(created.status, "success");

        repo.create(
            CreateActivity::new(
                Some("sess-2".to_string()),
                ActivityType::OrderRejected,
                ActivityStatus::Rejected,
                "Confidence too low",
            )
            .with_symbol("AAPL"),
        )
        .await
        .unwrap();

        let recent = repo.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].activity_type, "order_rejected");
        assert_eq!(recent[0].symbol.as_deref(), Some("AAPL"));

        let session = repo.by_session("sess-1", 10).await.unwrap();
        assert_eq!(session.len(), 1);
        let details: serde_json::Value =
            serde_json::from_str(session[0].details.as_deref().unwrap()).unwrap();
        assert_eq!(details["mode"], "BALANCED");

        assert_eq!(repo.recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trade_counts_exclude_rejections() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = TradeRepository::new(pool);

        let created = repo.create(trade("t-1", "AAPL", "buy", "accepted")).await.unwrap();
        assert_eq!(created.symbol, "AAPL");
        repo.create(trade("t-2", "MSFT", "buy", TRADE_STATUS_REJECTED)).await.unwrap();
        repo.create(trade("t-3", "AAPL", "sell", "filled")).await.unwrap();

        let start_of_day = Utc::now() - Duration::hours(1);
        assert_eq!(repo.count_since(start_of_day).await.unwrap(), 2);
        assert_eq!(repo.count_since(Utc::now() + Duration::hours(1)).await.unwrap(), 0);

        assert!(repo.bought_since("AAPL", start_of_day).await.unwrap());
        assert!(!repo.bought_since("MSFT", start_of_day).await.unwrap());

        assert_eq!(repo.recent(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dead_broker_statuses_not_counted() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = TradeRepository::new(pool);

        repo.create(trade("t-1", "AAPL", "buy", "rejected")).await.unwrap();
        repo.create(trade("t-2", "MSFT", "buy", "canceled")).await.unwrap();
        repo.create(trade("t-3", "TSLA", "buy", "expired")).await.unwrap();
        repo.create(trade("t-4", "NVDA", "buy", "new")).await.unwrap();

        let start_of_day = Utc::now() - Duration::hours(1);
        assert_eq!(repo.count_since(start_of_day).await.unwrap(), 1);
        assert!(!repo.bought_since("AAPL", start_of_day).await.unwrap());
        assert!(repo.bought_since("NVDA", start_of_day).await.unwrap());
    }

    #[tokio::test]
    async fn test_metrics_upsert() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = MetricsRepository::new(pool);
        assert!(repo.get("sess-1").await.unwrap().is_none());

        let mut metrics = BotMetrics::new();
        metrics.record_cycle(Utc::now(), 12.0);
        repo.upsert("sess-1", &metrics).await.unwrap();

        metrics.record_cycle(Utc::now(), 12.0);
        metrics.record_signal();
        metrics.record_submitted();
        repo.upsert("sess-1", &metrics).await.unwrap();

        let stored = repo.get("sess-1").await.unwrap().unwrap();
        assert_eq!(stored.cycles, 2);
        assert_eq!(stored.signals_generated, 1);
        assert_eq!(stored.orders_submitted, 1);
        assert!(stored.last_cycle_at.is_some());
    }

    #[tokio::test]
    async fn test_learning_records() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = LearningRepository::new(pool);

        let created = repo
            .create(CreateLearningRecord {
                session_id: None,
                symbol: "BTC/USD".to_string(),
                signal: "BUY".to_string(),
                confidence: 0.72,
                score: 72.0,
                market_condition: "BULLISH".to_string(),
                indicators: serde_json::json!({ "rsi": 28.5 }),
                executed: true,
            })
            .await
            .unwrap();
        assert!(created.executed);

        let recent = repo.recent(5).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].signal, "BUY");
        assert!(recent[0].indicators.contains("28.5"));
    }
}
