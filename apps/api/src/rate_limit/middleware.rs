use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{error, warn};

use crate::errors::AppError;
use crate::rate_limit::{RateLimitDecision, RateLimitInfo, RateLimiter};

const UNKNOWN_CLIENT: &str = "unknown";

/// Rejects requests from clients over their quota before they reach a handler.
/// Allowed responses carry `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
/// `X-RateLimit-Reset`.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client_id = client_id(&request);

    match limiter.check_and_record(&client_id, Utc::now()).await {
        Ok(RateLimitDecision::Allowed(info)) => {
            let mut response = next.run(request).await;
            apply_headers(response.headers_mut(), &info);
            Ok(response)
        }
        Ok(RateLimitDecision::Denied { blocked_until }) => {
            warn!("Rejected request from {client_id}: rate limited until {blocked_until}");
            Err(AppError::RateLimited)
        }
        Err(e) => {
            // Fail open on store errors.
            error!("Rate limit store unavailable, allowing request from {client_id}: {e}");
            Ok(next.run(request).await)
        }
    }
}

fn client_id(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn apply_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(info.reset));
}
