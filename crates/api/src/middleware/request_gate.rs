//! Origin and referrer gate. Rejections are a bare 403 with no CORS headers.

use axum::{
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue,
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN, REFERER, VARY},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::AppError, policy::GateRejection, state::AppState};

fn header_text(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> String {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}

pub async fn request_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = header_text(request.headers(), ORIGIN);
    let referrer = header_text(request.headers(), REFERER);

    let allowed = match state.policy.admit(&origin, &referrer) {
        Ok(origin) => HeaderValue::from_str(origin),
        Err(GateRejection::Origin(origin)) => {
            tracing::warn!(%origin, "origin not allowed");
            return AppError::forbidden().into_response();
        }
        Err(GateRejection::Referrer(referrer)) => {
            tracing::warn!(%referrer, "referrer not allowed");
            return AppError::forbidden().into_response();
        }
    };
    let Ok(allowed) = allowed else {
        return AppError::forbidden().into_response();
    };

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allowed);
    headers.append(VARY, HeaderValue::from_static("Origin"));
    response
}
