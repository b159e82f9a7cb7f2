//! Shared GCRA throttle, keyed by [`ClientIdentity`] across all methods.

use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::client_identity::ClientIdentity;
use crate::{error::AppError, state::AppState, stores::RateLimitResult};

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

pub async fn throttle(
    State(state): State<AppState>,
    identity: ClientIdentity,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let quota = state.config.throttle_quota();
    let result = state
        .stores
        .rate_limiter
        .check(identity.as_str(), quota)
        .await
        .map_err(AppError::Upstream)?;

    let response = match result {
        RateLimitResult::Allowed { remaining } => {
            let mut response = next.run(request).await;
            set_quota_headers(response.headers_mut(), quota.limit(), remaining);
            response
        }
        RateLimitResult::Exceeded { retry_after } => {
            tracing::warn!(identity = %identity.as_str(), ?retry_after, "throttled");
            let mut response = AppError::too_many_requests().into_response();
            set_quota_headers(response.headers_mut(), quota.limit(), 0);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
            response
        }
    };

    Ok(response)
}

fn set_quota_headers(headers: &mut HeaderMap, limit: u32, remaining: i64) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining.max(0)));
}

/// Whole seconds, rounded up so clients never retry early.
fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)
}
