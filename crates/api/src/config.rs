use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stores::RateQuota;

/// Origin served by `hugo server` during local development.
pub const LOCAL_ORIGIN: &str = "http://localhost:1313";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Firestore project holding the counter collection.
    pub project_id: String,
    /// Collection of `{url, claps}` documents.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// `host:port` of a Firestore emulator. When set, no credentials are used.
    #[serde(default)]
    pub firestore_emulator_host: Option<String>,

    pub redis_host: String,
    pub redis_port: u16,

    /// Google-format OAuth client JSON (`web` or `installed` section).
    pub oauth_client_secret_file: PathBuf,
    pub oauth_redirect_uri: String,
    #[serde(default = "default_oauth_issuer")]
    pub oauth_issuer: String,
    #[serde(default = "default_jwks_url")]
    pub jwks_url: String,
    #[serde(default = "default_jwks_cache_secs")]
    pub jwks_cache_secs: u64,
    /// The only account allowed to open the diagnostic view.
    pub operator_email: String,

    /// Production site origin, e.g. `https://www.example.org`.
    pub site_origin: String,
    /// Replaces the default `/posts/<slug>/` referrer pattern.
    #[serde(default)]
    pub referrer_pattern: Option<String>,
    /// Set to "local" for the localhost allow-list, anything else is production.
    pub env: String,

    #[serde(default = "default_get_quota")]
    pub get_quota: u64,
    #[serde(default = "default_post_quota")]
    pub post_quota: u64,
    #[serde(default = "default_quota_window_secs")]
    pub quota_window_secs: u64,
    #[serde(default = "default_quota_max_identities")]
    pub quota_max_identities: usize,
    #[serde(default = "default_throttle_per_minute")]
    pub throttle_per_minute: u32,
    #[serde(default = "default_throttle_burst")]
    pub throttle_burst: u32,

    /// Bound on every outbound call (store, Redis, identity provider).
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// Sentry DSN for error tracking
    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

impl Config {
    pub fn is_local(&self) -> bool {
        self.env == "local"
    }

    pub fn is_production(&self) -> bool {
        !self.is_local()
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }

    /// Exact origins accepted by the CORS check.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = vec![self.site_origin.trim_end_matches('/').to_string()];
        if self.is_local() {
            origins.push(LOCAL_ORIGIN.to_string());
        }
        origins
    }

    /// Referrer pattern, unanchored. The policy anchors it on compile.
    pub fn referrer_source(&self) -> String {
        if let Some(pattern) = &self.referrer_pattern {
            return pattern.clone();
        }
        let origin = if self.is_local() {
            LOCAL_ORIGIN
        } else {
            self.site_origin.trim_end_matches('/')
        };
        format!(r"{}/posts/[\w-]+/?", regex::escape(origin))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn quota_window(&self) -> Duration {
        Duration::from_secs(self.quota_window_secs)
    }

    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_secs)
    }

    /// Shared GCRA quota applied ahead of the origin checks.
    pub fn throttle_quota(&self) -> RateQuota {
        RateQuota {
            per_minute: self.throttle_per_minute,
            burst: self.throttle_burst,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_collection() -> String {
    "claps".to_string()
}

fn default_oauth_issuer() -> String {
    "https://accounts.google.com".to_string()
}

fn default_jwks_url() -> String {
    "https://www.googleapis.com/oauth2/v3/certs".to_string()
}

fn default_jwks_cache_secs() -> u64 {
    3600
}

fn default_get_quota() -> u64 {
    1000
}

fn default_post_quota() -> u64 {
    200
}

fn default_quota_window_secs() -> u64 {
    24 * 60 * 60
}

fn default_quota_max_identities() -> usize {
    100_000
}

fn default_throttle_per_minute() -> u32 {
    2
}

fn default_throttle_burst() -> u32 {
    5
}

fn default_upstream_timeout_secs() -> u64 {
    10
}
