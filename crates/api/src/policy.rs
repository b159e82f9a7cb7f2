//! Origin and referrer allow-list.
//!
//! Checked in a fixed order: the `Origin` header must exactly match one of the
//! allowed origins, then a non-empty `Referer` must fully match the referrer
//! pattern. An empty referrer is tolerated (privacy-restricted browsers and
//! non-browser clients omit it).

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::Config;

/// Why a request was refused at the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    Origin(String),
    Referrer(String),
}

/// Immutable after startup.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed_origins: Vec<String>,
    referrer: Regex,
}

impl OriginPolicy {
    /// Compiles `referrer_pattern` anchored at both ends.
    pub fn new(allowed_origins: Vec<String>, referrer_pattern: &str) -> Result<Self> {
        let referrer = Regex::new(&format!("^(?:{referrer_pattern})$"))
            .with_context(|| format!("invalid referrer pattern {referrer_pattern:?}"))?;

        Ok(Self {
            allowed_origins,
            referrer,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.allowed_origins(), &config.referrer_source())
    }

    /// Returns the origin to echo in `Access-Control-Allow-Origin`.
    pub fn admit<'a>(&self, origin: &'a str, referrer: &str) -> Result<&'a str, GateRejection> {
        if !self.allowed_origins.iter().any(|allowed| allowed == origin) {
            return Err(GateRejection::Origin(origin.to_string()));
        }

        if !referrer.is_empty() && !self.referrer.is_match(referrer) {
            return Err(GateRejection::Referrer(referrer.to_string()));
        }

        Ok(origin)
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }
}
