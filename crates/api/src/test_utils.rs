//! Shared test utilities for API handler tests.
//!
//! Provides a flexible `TestStateBuilder` for constructing `AppState` instances
//! with only the mocks needed for each test, plus helpers for minting ID tokens
//! the test verifier accepts.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::test_utils::{TestStateBuilder, allowing_rate_limiter};
//!
//! let mut reactions = MockReactionRepo::new();
//! reactions.expect_get().returning(|_| Ok(Some(3)));
//!
//! let state = TestStateBuilder::new()
//!     .with_reaction_repo(reactions)
//!     .with_rate_limiter(allowing_rate_limiter())
//!     .build();
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};

use crate::admission::AdmissionController;
use crate::config::Config;
use crate::policy::OriginPolicy;
use crate::repos::{MockReactionRepo, ReactionRepo, Repos};
use crate::services::{IdTokenVerifier, MockIdentityProvider, MockKeySource, ResolvedKey};
use crate::state::AppState;
use crate::stores::{MockRateLimiter, RateLimitResult, Stores};

pub const TEST_ORIGIN: &str = "https://www.example.org";
pub const TEST_REFERRER: &str = "https://www.example.org/posts/my-post/";
pub const TEST_ISSUER: &str = "https://accounts.example.com";
pub const TEST_AUDIENCE: &str = "client-123.apps.example";
pub const TEST_OPERATOR: &str = "operator@example.org";
pub const TEST_KID: &str = "test-key-1";
const TEST_SECRET: &[u8] = b"test-signing-secret";

/// Creates a test configuration with dummy values.
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 3000,
        project_id: "claps-test".to_string(),
        collection: "claps".to_string(),
        firestore_emulator_host: None,
        redis_host: "127.0.0.1".to_string(),
        redis_port: 6379,
        oauth_client_secret_file: PathBuf::from("/dev/null"),
        oauth_redirect_uri: "https://claps.example.org/secure/oauthcallback".to_string(),
        oauth_issuer: TEST_ISSUER.to_string(),
        jwks_url: "https://keys.example.com/certs".to_string(),
        jwks_cache_secs: 3600,
        operator_email: TEST_OPERATOR.to_string(),
        site_origin: TEST_ORIGIN.to_string(),
        referrer_pattern: None,
        env: "test".to_string(),
        get_quota: 1000,
        post_quota: 200,
        quota_window_secs: 24 * 60 * 60,
        quota_max_identities: 1000,
        throttle_per_minute: 2,
        throttle_burst: 5,
        upstream_timeout_secs: 5,
        sentry_dsn: None,
    }
}

/// Rate limiter that admits every request.
pub fn allowing_rate_limiter() -> MockRateLimiter {
    let mut limiter = MockRateLimiter::new();
    limiter
        .expect_check()
        .returning(|_, _| Ok(RateLimitResult::Allowed { remaining: 5 }));
    limiter
}

/// Key the test verifier resolves for [`TEST_KID`].
pub fn test_key() -> ResolvedKey {
    ResolvedKey {
        key: DecodingKey::from_secret(TEST_SECRET),
        algorithm: Algorithm::HS256,
    }
}

/// Key source serving [`test_key`] for any lookup.
pub fn test_key_source() -> MockKeySource {
    let mut keys = MockKeySource::new();
    keys.expect_key().returning(|_, _| Ok(Some(test_key())));
    keys
}

/// Claims for a test ID token. Starts from the operator's valid token; tests
/// override single fields.
#[derive(Debug, Clone)]
pub struct TestToken {
    pub kid: Option<String>,
    pub iss: String,
    pub aud: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub exp: u64,
}

impl TestToken {
    pub fn operator() -> Self {
        Self {
            kid: Some(TEST_KID.to_string()),
            iss: TEST_ISSUER.to_string(),
            aud: TEST_AUDIENCE.to_string(),
            email: Some(TEST_OPERATOR.to_string()),
            email_verified: Some(true),
            exp: jsonwebtoken::get_current_timestamp() + 600,
        }
    }

    pub fn mint(&self) -> String {
        self.mint_with_secret(TEST_SECRET)
    }

    pub fn mint_with_secret(&self, secret: &[u8]) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = self.kid.clone();

        let mut claims = serde_json::json!({
            "iss": self.iss,
            "aud": self.aud,
            "sub": "1234567890",
            "exp": self.exp,
        });
        if let Some(email) = &self.email {
            claims["email"] = email.clone().into();
        }
        if let Some(verified) = self.email_verified {
            claims["email_verified"] = verified.into();
        }

        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(secret)).unwrap()
    }
}

/// Counter repo backed by a map, for scenarios spanning several requests.
#[derive(Default)]
pub struct InMemoryReactionRepo {
    counts: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl ReactionRepo for InMemoryReactionRepo {
    async fn get(&self, url: &str) -> Result<Option<i64>> {
        Ok(self.counts.lock().unwrap().get(url).copied())
    }

    async fn increment_or_create(&self, url: &str) -> Result<i64> {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(url.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }
}

/// Builder for constructing test `AppState` with custom mocks.
///
/// Uses default (empty) mocks for anything not explicitly set, so an
/// unexpected call to an unconfigured collaborator fails the test.
pub struct TestStateBuilder {
    config: Config,
    reaction_repo: Option<Arc<dyn ReactionRepo>>,
    rate_limiter: Option<MockRateLimiter>,
    identity_provider: Option<MockIdentityProvider>,
    key_source: Option<MockKeySource>,
    admission: Option<AdmissionController>,
}

impl TestStateBuilder {
    /// Creates a new builder with no mocks configured.
    pub fn new() -> Self {
        Self {
            config: test_config(),
            reaction_repo: None,
            rate_limiter: None,
            identity_provider: None,
            key_source: None,
            admission: None,
        }
    }

    pub fn with_reaction_repo(mut self, repo: impl ReactionRepo + 'static) -> Self {
        self.reaction_repo = Some(Arc::new(repo));
        self
    }

    pub fn with_rate_limiter(mut self, limiter: MockRateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_identity_provider(mut self, provider: MockIdentityProvider) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    pub fn with_key_source(mut self, keys: MockKeySource) -> Self {
        self.key_source = Some(keys);
        self
    }

    pub fn with_admission(mut self, admission: AdmissionController) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Builds the `AppState` using configured mocks or defaults.
    pub fn build(self) -> AppState {
        let config = self.config;

        let repos = Repos {
            reactions: self
                .reaction_repo
                .unwrap_or_else(|| Arc::new(MockReactionRepo::new())),
        };

        let stores = Stores {
            rate_limiter: Arc::new(self.rate_limiter.unwrap_or_else(MockRateLimiter::new)),
        };

        let verifier = IdTokenVerifier::new(
            Box::new(self.key_source.unwrap_or_else(MockKeySource::new)),
            TEST_ISSUER,
            TEST_AUDIENCE,
            &config.operator_email,
        );

        AppState {
            policy: Arc::new(OriginPolicy::from_config(&config).unwrap()),
            admission: Arc::new(
                self.admission
                    .unwrap_or_else(|| AdmissionController::from_config(&config)),
            ),
            repos,
            stores,
            identity: Arc::new(
                self.identity_provider
                    .unwrap_or_else(MockIdentityProvider::new),
            ),
            verifier: Arc::new(verifier),
            config,
        }
    }
}

impl Default for TestStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
