//! Persistence Layer
//!
//! SQLite storage for the bot's history, accessed asynchronously through sqlx.
//! Bot state itself is not persisted; only what the dashboard reads back.
//!
//! # Database Schema
//!
//! ## bot_activity_logs
//! - id: autoincrement
//! - session_id: bot session that produced the line (nullable)
//! - activity_type: bot_started, analysis, order_submitted, ...
//! - message: human readable line
//! - status: success, rejected, failed, info
//! - symbol: optional symbol
//! - details: JSON
//! - created_at: timestamp
//!
//! ## trades
//! - id: generated text id
//! - session_id, symbol, side ("buy"/"sell"), quantity, price, value, confidence
//! - status: broker order status, or REJECTED / FAILED
//! - order_id: broker order id when submitted
//! - reason: rejection or failure reason
//! - created_at: timestamp
//!
//! ## bot_metrics
//! - session_id (PK) plus the session counters
//!
//! ## learning_records
//! - one row per analysis, with the indicator snapshot as JSON and whether it was executed

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Open the pool and run migrations
///
/// `database_url` is a sqlx SQLite URL such as `sqlite://data/papertrader.db`
/// or `sqlite::memory:`.
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!(database_url = %database_url, "Initializing database");

    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .log_statements(tracing::log::LevelFilter::Debug);

    // Every in-memory connection is its own database
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_activity_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT,
            activity_type TEXT NOT NULL,
            message TEXT NOT NULL,
            status TEXT NOT NULL,
            symbol TEXT,
            details TEXT,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create bot_activity_logs table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            session_id TEXT,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('buy', 'sell')),
            quantity REAL NOT NULL,
            price REAL NOT NULL,
            value REAL NOT NULL,
            confidence REAL,
            status TEXT NOT NULL,
            order_id TEXT,
            reason TEXT,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create trades table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_metrics (
            session_id TEXT PRIMARY KEY,
            cycles INTEGER NOT NULL DEFAULT 0,
            signals_generated INTEGER NOT NULL DEFAULT 0,
            orders_submitted INTEGER NOT NULL DEFAULT 0,
            orders_rejected INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            last_cycle_at DATETIME,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create bot_metrics table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS learning_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT,
            symbol TEXT NOT NULL,
            signal TEXT NOT NULL,
            confidence REAL NOT NULL,
            score REAL NOT NULL,
            market_condition TEXT NOT NULL,
            indicators TEXT NOT NULL,
            executed BOOLEAN NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create learning_records table: {}", e))
    })?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_activity_created_at ON bot_activity_logs(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_activity_session ON bot_activity_logs(session_id)",
        "CREATE INDEX IF NOT EXISTS idx_trades_created_at ON trades(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
        "CREATE INDEX IF NOT EXISTS idx_learning_created_at ON learning_records(created_at)",
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("Database migrations completed");
    Ok(())
}
