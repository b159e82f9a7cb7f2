use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug)]
pub enum AppError {
    /// Internal errors - logged but return generic 500 to user
    Internal(anyhow::Error),
    /// A store or identity provider could not be reached. Never conflated with
    /// a policy or verification rejection.
    Upstream(anyhow::Error),
    /// User-facing errors - message is safe to show
    External(StatusCode, &'static str),
    /// Validation errors - safe to show
    Validation(String),
}

impl AppError {
    pub fn forbidden() -> Self {
        AppError::External(StatusCode::FORBIDDEN, "Forbidden")
    }

    pub fn too_many_requests() -> Self {
        AppError::External(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Internal(err) => {
                tracing::error!("internal error: {:?}", err);
                sentry::capture_error(
                    err.as_ref() as &(dyn std::error::Error + Send + Sync + 'static)
                );

                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
            AppError::Upstream(err) => {
                tracing::error!("upstream failure: {:?}", err);
                sentry::capture_error(
                    err.as_ref() as &(dyn std::error::Error + Send + Sync + 'static)
                );

                (StatusCode::SERVICE_UNAVAILABLE, "Upstream service unavailable").into_response()
            }
            AppError::External(status, msg) => (status, msg).into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
