//! Ephemeral stores (Redis).
//!
//! This module contains traits and implementations for state shared between
//! instances. All data stored here expires on its own.
//!
//! ## Stores
//!
//! - **rate_limit** - GCRA smoothed rate limit per client identity
//!
//! ## Redis Key Patterns
//!
//! ```text
//! ip:{client identity}   → theoretical arrival time, ms since epoch (auto-expires)
//! ```

mod rate_limit;

pub use rate_limit::{RateLimitResult, RateLimiter, RateQuota, RedisRateLimiter};

#[cfg(test)]
pub use rate_limit::MockRateLimiter;

use std::sync::Arc;

/// Collection of all ephemeral stores.
#[derive(Clone)]
pub struct Stores {
    pub rate_limiter: Arc<dyn RateLimiter>,
}
