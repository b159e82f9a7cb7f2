//! The reaction counter at `/`.
//!
//! `GET` returns the count for the page named by `Referer`, `POST` adds one to
//! it. Both answer in plain text.

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, Method, StatusCode, header::REFERER},
    middleware::from_fn_with_state,
    routing::get,
};

use crate::{
    error::AppError,
    middleware::{client_identity::ClientIdentity, request_gate::request_gate, throttle::throttle},
    state::AppState,
};

pub fn router(state: AppState) -> Router<AppState> {
    // `get` would also answer HEAD by running the GET handler.
    let counter = get(get_count)
        .head(method_not_allowed)
        .post(increment)
        .layer(from_fn_with_state(state.clone(), request_gate))
        .layer(from_fn_with_state(state, throttle));

    Router::new().route("/", counter)
}

async fn method_not_allowed() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

fn admit(state: &AppState, identity: &ClientIdentity, method: &Method) -> Result<(), AppError> {
    if state.admission.admit(identity.as_str(), method) {
        return Ok(());
    }
    tracing::warn!(identity = %identity.as_str(), %method, "quota exceeded");
    Err(AppError::too_many_requests())
}

fn referrer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(REFERER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

async fn get_count(
    State(state): State<AppState>,
    identity: ClientIdentity,
    headers: HeaderMap,
) -> Result<String, AppError> {
    admit(&state, &identity, &Method::GET)?;

    let Some(url) = referrer(&headers) else {
        return Ok("0".to_string());
    };

    let count = state
        .repos
        .reactions
        .get(url)
        .await
        .map_err(AppError::Upstream)?
        .unwrap_or(0);

    Ok(count.to_string())
}

async fn increment(
    State(state): State<AppState>,
    identity: ClientIdentity,
    headers: HeaderMap,
) -> Result<String, AppError> {
    admit(&state, &identity, &Method::POST)?;

    let url = referrer(&headers)
        .ok_or_else(|| AppError::Validation("missing Referer header".to_string()))?;

    let count = state
        .repos
        .reactions
        .increment_or_create(url)
        .await
        .map_err(AppError::Upstream)?;

    tracing::info!(%url, count, "reaction recorded");
    Ok(count.to_string())
}
