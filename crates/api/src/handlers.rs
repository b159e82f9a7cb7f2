pub mod health;
pub mod reactions;
pub mod secure;

use axum::Router;

use crate::state::AppState;

/// All routes with state applied. Transport layers (tracing, request ids, body
/// limit) are added in `main`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(reactions::router(state.clone()))
        .nest("/secure", secure::router())
        .nest("/health", health::router())
        .with_state(state)
}
