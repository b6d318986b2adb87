pub mod health;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::integrations::handlers;
use crate::rate_limit::middleware::rate_limit_middleware;
use crate::rate_limit::RateLimiter;
use crate::security_headers::security_headers_middleware;
use crate::state::AppState;

/// Every route sits behind the per-client rate limiter. Security headers are
/// the outermost layer so they also land on 429 responses.
pub fn build_router(state: AppState, limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Gmail integration
        .route("/api/v1/gmail/status", get(handlers::handle_status))
        .route("/api/v1/gmail/connect", post(handlers::handle_connect))
        .route("/api/v1/gmail/callback", get(handlers::handle_callback))
        .route("/api/v1/gmail/config", put(handlers::handle_update_config))
        .route("/api/v1/gmail/disconnect", post(handlers::handle_disconnect))
        .route("/api/v1/gmail/scan-now", post(handlers::handle_scan_now))
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}
