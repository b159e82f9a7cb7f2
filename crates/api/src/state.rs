use std::sync::Arc;

use crate::{
    admission::AdmissionController,
    config::Config,
    policy::OriginPolicy,
    repos::Repos,
    services::{IdTokenVerifier, IdentityProvider},
    stores::Stores,
};

#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Origin and referrer allow-list.
    pub policy: Arc<OriginPolicy>,
    /// In-process per-method quotas.
    pub admission: Arc<AdmissionController>,
    /// Counter repositories (Firestore).
    pub repos: Repos,
    /// Shared throttle state (Redis).
    pub stores: Stores,
    /// OAuth identity provider.
    pub identity: Arc<dyn IdentityProvider>,
    /// Operator ID token verifier.
    pub verifier: Arc<IdTokenVerifier>,
}
