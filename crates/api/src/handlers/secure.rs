//! Operator login and the admission diagnostic view.
//!
//! `/secure/auth` redirects to the identity provider's consent screen. The
//! provider sends the browser back to `/secure/oauthcallback`, where the code
//! is exchanged and the ID token verified before the in-memory admission
//! counters are returned.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::{
    admission::AdmissionSnapshot,
    error::AppError,
    services::{ANTI_FORGERY_STATE, ExchangeError, VerifyError},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth", get(begin_login))
        .route("/oauthcallback", get(oauth_callback))
}

async fn begin_login(State(state): State<AppState>) -> Response {
    let url = state.identity.authorize_url(ANTI_FORGERY_STATE);
    (StatusCode::FOUND, [(LOCATION, url)]).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<AdmissionSnapshot>, AppError> {
    if params.state.as_deref() != Some(ANTI_FORGERY_STATE) {
        return Err(AppError::Validation("invalid state parameter".to_string()));
    }
    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AppError::Validation("missing code parameter".to_string()))?;

    let tokens = state
        .identity
        .exchange_code(&code)
        .await
        .map_err(|err| match err {
            ExchangeError::Rejected { status, message } => {
                tracing::warn!(status, %message, "authorization code rejected");
                AppError::External(StatusCode::BAD_REQUEST, "Authorization code rejected")
            }
            err => AppError::Upstream(err.into()),
        })?;

    let Some(id_token) = tokens.id_token else {
        tracing::warn!("token response has no id_token");
        return Err(AppError::forbidden());
    };

    let claims = state
        .verifier
        .verify(&id_token)
        .await
        .map_err(|err| match err {
            VerifyError::Rejected(reason) => {
                tracing::warn!(%reason, "operator login rejected");
                AppError::forbidden()
            }
            VerifyError::KeySetUnavailable(err) => AppError::Upstream(err),
        })?;

    tracing::info!(sub = %claims.sub, "operator viewed admission counters");
    Ok(Json(state.admission.snapshot()))
}
