//! Smoothed (GCRA) rate limiting in Redis.
//!
//! The theoretical arrival time (TAT) of the next request is kept per key.
//! Each admitted request pushes it forward by one emission interval; a request
//! is refused while the TAT sits further in the future than the burst
//! tolerance allows. The whole read-decide-write step runs in one Lua script,
//! so concurrent instances sharing the Redis see a consistent limit.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

const KEY_PREFIX: &str = "ip:";

const GCRA_SCRIPT: &str = r#"
if redis.replicate_commands then redis.replicate_commands() end
local emission = tonumber(ARGV[1])
local tolerance = tonumber(ARGV[2])
local time = redis.call('TIME')
local now = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)
local tat = tonumber(redis.call('GET', KEYS[1]))
if not tat or tat < now then
  tat = now
end
local new_tat = tat + emission
local diff = now - (new_tat - tolerance)
if diff < 0 then
  return {0, 0, -diff}
end
local ttl = new_tat - now
redis.call('SET', KEYS[1], new_tat, 'PX', ttl)
return {1, math.floor((tolerance - ttl) / emission), 0}
"#;

/// Sustained rate plus the number of extra requests allowed back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub per_minute: u32,
    pub burst: u32,
}

impl RateQuota {
    pub fn emission_interval(&self) -> Duration {
        Duration::from_millis(60_000 / u64::from(self.per_minute.max(1)))
    }

    /// Requests that may arrive at the same instant on a fresh key.
    pub fn limit(&self) -> u32 {
        self.burst + 1
    }

    pub fn tolerance(&self) -> Duration {
        self.emission_interval() * self.limit()
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed { remaining: i64 },
    Exceeded { retry_after: Duration },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records one request for `key` and reports whether it fits the quota.
    async fn check(&self, key: &str, quota: RateQuota) -> Result<RateLimitResult>;

    /// Health check - verify the backing store is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Redis implementation of RateLimiter.
pub struct RedisRateLimiter {
    client: redis::Client,
    script: redis::Script,
    timeout: Duration,
}

impl RedisRateLimiter {
    pub fn new(client: redis::Client, timeout: Duration) -> Self {
        Self {
            client,
            script: redis::Script::new(GCRA_SCRIPT),
            timeout,
        }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, key: &str, quota: RateQuota) -> Result<RateLimitResult> {
        let run = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let reply: (i64, i64, i64) = self
                .script
                .key(format!("{KEY_PREFIX}{key}"))
                .arg(quota.emission_interval().as_millis() as u64)
                .arg(quota.tolerance().as_millis() as u64)
                .invoke_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(reply)
        };

        let (allowed, remaining, retry_after_ms) = tokio::time::timeout(self.timeout, run)
            .await
            .context("rate limit store timed out")?
            .context("rate limit store unavailable")?;

        if allowed == 1 {
            Ok(RateLimitResult::Allowed { remaining })
        } else {
            Ok(RateLimitResult::Exceeded {
                retry_after: Duration::from_millis(retry_after_ms.max(0) as u64),
            })
        }
    }

    async fn ping(&self) -> Result<()> {
        let run = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            redis::cmd("PING").query_async::<String>(&mut conn).await
        };

        tokio::time::timeout(self.timeout, run)
            .await
            .context("redis ping timed out")??;
        Ok(())
    }
}
