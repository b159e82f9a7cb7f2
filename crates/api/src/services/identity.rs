//! OAuth2 authorization-code flow for the operator login.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

/// Fixed state token sent with the consent redirect and expected back on the
/// callback.
pub const ANTI_FORGERY_STATE: &str = "reactions-admin";

const SCOPES: &str = "openid email";

/// OAuth client credentials in the provider's downloadable JSON format.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretFile {
    web: Option<OAuthClient>,
    installed: Option<OAuthClient>,
}

impl OAuthClient {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read OAuth client file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid OAuth client file {}", path.display()))
    }

    /// Accepts either a `web` or an `installed` client section.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: ClientSecretFile = serde_json::from_str(raw)?;
        file.web
            .or(file.installed)
            .context("expected a \"web\" or \"installed\" client section")
    }
}

/// Tokens returned by a successful code exchange.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenSet {
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The provider refused the code (expired, reused, wrong redirect).
    #[error("code exchange rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("identity provider unreachable: {0}")]
    Unavailable(#[from] reqwest::Error),
    #[error("malformed token response: {0}")]
    Malformed(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Consent screen URL carrying `state`.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchanges an authorization code for tokens. Never retried.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ExchangeError>;
}

pub struct GoogleIdentityProvider {
    http: reqwest::Client,
    client: OAuthClient,
    auth_url: Url,
    redirect_uri: String,
}

impl GoogleIdentityProvider {
    pub fn new(
        http: reqwest::Client,
        client: OAuthClient,
        redirect_uri: impl Into<String>,
    ) -> Result<Self> {
        let auth_url = Url::parse(&client.auth_uri)
            .with_context(|| format!("invalid auth_uri {:?}", client.auth_uri))?;

        Ok(Self {
            http,
            client,
            auth_url,
            redirect_uri: redirect_uri.into(),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client.client_id
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    fn authorize_url(&self, state: &str) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("access_type", "online");
        url.into()
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ExchangeError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.client.token_uri)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Malformed(e.to_string()))
    }
}
