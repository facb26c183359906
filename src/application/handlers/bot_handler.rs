use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::application::services::bot_service::{BotService, BotStatus, MetricsReport};
use crate::domain::entities::account::Account;
use crate::domain::entities::analysis::TechnicalAnalysis;
use crate::domain::entities::bot::{BotConfig, BotMode};
use crate::domain::errors::BotError;
use crate::domain::repositories::broker_client::BrokerError;
use crate::domain::services::market_hours::MarketSession;
use crate::persistence::models::{ActivityRecord, LearningRecord, TradeRecord};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

pub type AppState = Arc<BotService>;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

/// Body of `POST /api/bot/start`: a full config, or just a preset name
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StartRequest {
    Config(Box<BotConfig>),
    Preset { mode: BotMode },
}

impl StartRequest {
    fn into_config(self) -> BotConfig {
        match self {
            StartRequest::Config(config) => *config,
            StartRequest::Preset { mode } => BotConfig::for_mode(mode),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub broker_healthy: bool,
    pub bot_running: bool,
    pub timestamp: DateTime<Utc>,
}

/// Query parameters for list endpoints
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListQuery {
    /// Rows to return (default 50, max 500)
    pub limit: Option<i64>,
}

impl ListQuery {
    fn limit(&self) -> i64 {
        clamp_limit(self.limit)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
    /// Only rows written by this session
    pub session_id: Option<String>,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

fn api_error(err: BotError) -> ApiError {
    let status = match &err {
        BotError::AlreadyRunning(_) | BotError::NotRunning => StatusCode::CONFLICT,
        BotError::InvalidConfig(_) | BotError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        BotError::Analysis(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BotError::Broker(BrokerError::NotFound(_)) => StatusCode::NOT_FOUND,
        BotError::Broker(BrokerError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        BotError::Broker(_) => StatusCode::BAD_GATEWAY,
        BotError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if !err.is_client_error() {
        error!(error = %err, status = status.as_u16(), "Request failed");
    }
    (status, Json(ErrorResponse::new(&err.to_string())))
}

pub async fn health(State(service): State<AppState>) -> Json<HealthResponse> {
    let bot_running = service.status().await.state.is_running;
    Json(HealthResponse {
        status: "ok".to_string(),
        broker_healthy: service.broker_healthy().await,
        bot_running,
        timestamp: Utc::now(),
    })
}

pub async fn get_status(State(service): State<AppState>) -> Json<BotStatus> {
    Json(service.status().await)
}

/// Start the bot. An empty body reuses the current config.
pub async fn start_bot(
    State(service): State<AppState>,
    body: Bytes,
) -> Result<Json<StartResponse>, ApiError> {
    let config = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let request: StartRequest = serde_json::from_slice(&body).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(&format!("Invalid start request: {}", e))),
            )
        })?;
        Some(request.into_config())
    };

    let session_id = service.start(config).await.map_err(api_error)?;
    Ok(Json(StartResponse {
        message: format!("Bot started with session {}", session_id),
        session_id,
    }))
}

pub async fn stop_bot(State(service): State<AppState>) -> Result<Json<MessageResponse>, ApiError> {
    service.stop().await.map_err(api_error)?;
    Ok(Json(MessageResponse {
        message: "Bot stopped".to_string(),
    }))
}

pub async fn get_activity(
    State(service): State<AppState>,
    Query(params): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityRecord>>, ApiError> {
    let rows = service
        .recent_activity(clamp_limit(params.limit), params.session_id.as_deref())
        .await
        .map_err(api_error)?;
    Ok(Json(rows))
}

/// Signal outcomes recorded each cycle, newest first.
pub async fn get_learning(
    State(service): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<LearningRecord>>, ApiError> {
    let rows = service
        .recent_learning(params.limit())
        .await
        .map_err(api_error)?;
    Ok(Json(rows))
}

pub async fn get_trades(
    State(service): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<TradeRecord>>, ApiError> {
    let rows = service
        .recent_trades(params.limit())
        .await
        .map_err(api_error)?;
    Ok(Json(rows))
}

pub async fn get_metrics(State(service): State<AppState>) -> Result<Json<MetricsReport>, ApiError> {
    service.metrics_report().await.map(Json).map_err(api_error)
}

/// On-demand analysis. Crypto pairs may be written `BTC-USD`.
pub async fn analyze_symbol(
    State(service): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<TechnicalAnalysis>, ApiError> {
    service.analyze_symbol(&symbol).await.map(Json).map_err(api_error)
}

/// Cached analyses, without touching the broker.
pub async fn recent_analyses(
    State(service): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Json<Vec<TechnicalAnalysis>> {
    let limit = usize::try_from(params.limit()).unwrap_or(1);
    Json(service.recent_analyses(limit).await)
}

pub async fn market_status(State(service): State<AppState>) -> Json<MarketSession> {
    Json(service.market_status())
}

pub async fn get_account(State(service): State<AppState>) -> Result<Json<Account>, ApiError> {
    service.account().await.map(Json).map_err(api_error)
}
