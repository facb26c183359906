//! HTTP control surface

pub mod bot_handler;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::rate_limit::{rate_limit_middleware, GlobalRateLimiter};
use bot_handler::AppState;

/// Largest accepted request body (a full bot config fits comfortably)
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Control API routes with tracing, body limit and the global rate limiter applied.
pub fn router(state: AppState, limiter: GlobalRateLimiter) -> Router {
    Router::new()
        .route("/health", get(bot_handler::health))
        .route("/api/bot/status", get(bot_handler::get_status))
        .route("/api/bot/start", post(bot_handler::start_bot))
        .route("/api/bot/stop", post(bot_handler::stop_bot))
        .route("/api/bot/activity", get(bot_handler::get_activity))
        .route("/api/trades", get(bot_handler::get_trades))
        .route("/api/metrics", get(bot_handler::get_metrics))
        .route("/api/learning", get(bot_handler::get_learning))
        .route("/api/analysis", get(bot_handler::recent_analyses))
        .route("/api/analysis/:symbol", get(bot_handler::analyze_symbol))
        .route("/api/market/status", get(bot_handler::market_status))
        .route("/api/account", get(bot_handler::get_account))
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}
