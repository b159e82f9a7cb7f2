//! Persistent storage (Firestore).
//!
//! Each repository is abstracted behind a trait to enable mocking in tests.
//!
//! ## Repositories
//!
//! - **reactions** - Per-URL reaction counters
//!
//! ## Document Layout
//!
//! ```text
//! claps/{sha256(url)}   → { url: string, claps: integer }
//! claps/{auto-id}       → same shape, written by earlier deployments
//! ```
//!
//! ## Usage in Handlers
//!
//! ```ignore
//! async fn handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
//!     let count = state.repos.reactions.increment_or_create(&url).await?;
//! }
//! ```

mod reactions;

pub use reactions::{FirestoreReactionRepo, ReactionRepo};

#[cfg(test)]
pub use reactions::MockReactionRepo;

use std::sync::Arc;

/// Collection of all persistent repositories.
#[derive(Clone)]
pub struct Repos {
    pub reactions: Arc<dyn ReactionRepo>,
}
