//! ID token verification against the identity provider's published key set.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::upstream;

/// A verification key and the only algorithm it may be used with.
#[derive(Clone)]
pub struct ResolvedKey {
    pub key: DecodingKey,
    pub algorithm: Algorithm,
}

impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Looks up `kid`. `Ok(None)` means the key set was fetched but has no such
    /// key; `Err` means the key set could not be fetched at all.
    async fn key(&self, kid: &str, force_refresh: bool) -> Result<Option<ResolvedKey>>;
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS endpoint with a time-bounded in-memory cache.
pub struct JwksKeySource {
    http: reqwest::Client,
    url: String,
    ttl: Duration,
    cache: RwLock<Option<CachedKeys>>,
}

impl JwksKeySource {
    pub fn new(http: reqwest::Client, url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            ttl,
            cache: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> Result<JwkSet> {
        tracing::debug!(url = %self.url, "fetching signing keys");
        let keys = upstream::send_idempotent(self.http.get(&self.url))
            .await
            .context("key set request failed")?
            .error_for_status()
            .context("key set endpoint returned an error")?
            .json()
            .await
            .context("key set is not valid JSON")?;
        Ok(keys)
    }
}

#[async_trait]
impl KeySource for JwksKeySource {
    async fn key(&self, kid: &str, force_refresh: bool) -> Result<Option<ResolvedKey>> {
        if !force_refresh {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.fetched_at.elapsed() < self.ttl
            {
                return Ok(cached.keys.find(kid).and_then(resolve));
            }
        }

        let keys = self.fetch().await?;
        let resolved = keys.find(kid).and_then(resolve);
        *self.cache.write().await = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(resolved)
    }
}

fn resolve(jwk: &Jwk) -> Option<ResolvedKey> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => Some(ResolvedKey {
            key: DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok()?,
            algorithm: Algorithm::RS256,
        }),
        AlgorithmParameters::EllipticCurve(ec) if ec.curve == EllipticCurve::P256 => {
            Some(ResolvedKey {
                key: DecodingKey::from_ec_components(&ec.x, &ec.y).ok()?,
                algorithm: Algorithm::ES256,
            })
        }
        _ => None,
    }
}

/// Claims read from a verified ID token.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The token is not acceptable. The reason is for logs only.
    #[error("token rejected: {0}")]
    Rejected(String),
    /// The key set could not be fetched, so nothing can be said about the token.
    #[error("signing keys unavailable: {0}")]
    KeySetUnavailable(anyhow::Error),
}

/// Accepts only ID tokens signed by the provider, issued for this client, and
/// naming the operator's email.
pub struct IdTokenVerifier {
    keys: Box<dyn KeySource>,
    issuer: String,
    audience: String,
    operator_email: String,
}

impl IdTokenVerifier {
    pub fn new(
        keys: Box<dyn KeySource>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        operator_email: impl Into<String>,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
            operator_email: operator_email.into(),
        }
    }

    /// Google issues tokens with and without the scheme.
    fn issuer_matches(&self, iss: &str) -> bool {
        iss == self.issuer || self.issuer.strip_prefix("https://") == Some(iss)
    }

    async fn resolve_key(&self, kid: &str) -> Result<ResolvedKey, VerifyError> {
        if let Some(key) = self
            .keys
            .key(kid, false)
            .await
            .map_err(VerifyError::KeySetUnavailable)?
        {
            return Ok(key);
        }

        tracing::debug!(kid, "key id not in cached key set, refreshing");
        self.keys
            .key(kid, true)
            .await
            .map_err(VerifyError::KeySetUnavailable)?
            .ok_or_else(|| VerifyError::Rejected(format!("unknown key id {kid}")))
    }

    pub async fn verify(&self, token: &str) -> Result<IdTokenClaims, VerifyError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| VerifyError::Rejected(format!("malformed token: {e}")))?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| VerifyError::Rejected("token has no key id".into()))?;

        let resolved = self.resolve_key(kid).await?;
        if header.alg != resolved.algorithm {
            return Err(VerifyError::Rejected(format!(
                "algorithm {:?} does not match key {kid}",
                header.alg
            )));
        }

        let mut validation = Validation::new(resolved.algorithm);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);

        let claims = jsonwebtoken::decode::<IdTokenClaims>(token, &resolved.key, &validation)
            .map_err(|e| VerifyError::Rejected(e.to_string()))?
            .claims;

        if !self.issuer_matches(&claims.iss) {
            return Err(VerifyError::Rejected(format!("unexpected issuer {}", claims.iss)));
        }

        match claims.email.as_deref() {
            Some(email) if email == self.operator_email => {}
            Some(email) => {
                return Err(VerifyError::Rejected(format!("email {email} is not the operator")));
            }
            None => return Err(VerifyError::Rejected("token has no email claim".into())),
        }
        if claims.email_verified == Some(false) {
            return Err(VerifyError::Rejected("operator email is not verified".into()));
        }

        Ok(claims)
    }
}
