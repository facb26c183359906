//! Inbound throttle for the control API
//!
//! One global quota shared by every client. Over-quota requests get a 429
//! with a JSON error body and a `Retry-After` hint.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::application::handlers::bot_handler::ErrorResponse;
use crate::config::DEFAULT_API_REQUESTS_PER_MINUTE;

pub struct RateLimiterConfig {
    /// Maximum control API requests per minute
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_API_REQUESTS_PER_MINUTE,
        }
    }
}

pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// A zero quota is clamped to one request per minute.
pub fn create_rate_limiter(config: RateLimiterConfig) -> GlobalRateLimiter {
    let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// Use with `axum::middleware::from_fn_with_state`.
pub async fn rate_limit_middleware(
    State(limiter): State<GlobalRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let not_until = match limiter.check() {
        Ok(()) => return next.run(request).await,
        Err(not_until) => not_until,
    };

    let wait = not_until.wait_time_from(DefaultClock::default().now());
    // Round up so clients never retry early
    let retry_after = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    tracing::warn!(
        path = %request.uri().path(),
        retry_after_secs = retry_after,
        "Control API rate limit exceeded"
    );

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse::new("Rate limit exceeded. Please try again later.")),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
