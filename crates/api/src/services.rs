//! External identity services.
//!
//! Each service is abstracted behind a trait so handlers can be tested with
//! mocks.
//!
//! ## Services
//!
//! - **identity** - OAuth2 authorization-code flow against the identity provider
//! - **verifier** - ID token verification against the provider's published key set
//!
//! ## Usage in Handlers
//!
//! ```ignore
//! async fn callback(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
//!     let tokens = state.identity.exchange_code(&code).await?;
//!     let claims = state.verifier.verify(&id_token).await?;
//! }
//! ```

mod identity;
mod verifier;

pub use identity::{
    ANTI_FORGERY_STATE, ExchangeError, GoogleIdentityProvider, IdentityProvider, OAuthClient,
};
pub use verifier::{IdTokenVerifier, JwksKeySource, VerifyError};

#[cfg(test)]
pub use identity::{MockIdentityProvider, TokenSet};
#[cfg(test)]
pub use verifier::{MockKeySource, ResolvedKey};
