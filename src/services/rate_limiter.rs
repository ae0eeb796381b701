//! Per-platform sliding-window rate limiter with adaptive slowdown.
//!
//! Window state lives in a Redis sorted set shared by every worker in every
//! process; in-process waiters are served FIFO through a fair per-platform
//! mutex held across the wait-retry loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use uuid::Uuid;

/// Extra wait past the oldest call's expiry so a retry lands after it leaves
/// the window.
const WINDOW_EPSILON: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("daily request cap exceeded for {platform}")]
    DailyCapExceeded { platform: String },

    #[error("no rate limit policy for platform {0}")]
    UnknownPlatform(String),

    #[error("rate limiter backend: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        RateLimitError::Backend(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for RateLimitError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        RateLimitError::Backend(err.to_string())
    }
}

/// Window budget for one platform.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub window_calls: u32,
    pub window_seconds: u64,
    pub daily_cap: Option<u64>,
    /// Fraction of the window above which calls are slowed down.
    pub buffer_fraction: f64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window_calls: 100,
            window_seconds: 3600,
            daily_cap: None,
            buffer_fraction: 0.8,
        }
    }
}

impl RateLimitPolicy {
    pub fn steam() -> Self {
        Self {
            window_calls: 100,
            window_seconds: 300,
            daily_cap: Some(100_000),
            buffer_fraction: 0.8,
        }
    }
}

/// Gate the sync worker acquires before every upstream call.
#[async_trait]
pub trait RateGate: Send + Sync {
    /// Blocks until `weight` calls fit in the platform's window. Returns the
    /// total time spent waiting.
    async fn acquire(&self, platform: &str, weight: u32) -> Result<Duration, RateLimitError>;
}

/// Adaptive slowdown once usage crosses the buffer: quadratic ramp from 0.1 s
/// at the buffer edge to 5.0 s at a full window.
pub fn slowdown_delay(usage_ratio: f64, buffer_fraction: f64) -> Duration {
    let over = ((usage_ratio - buffer_fraction) / (1.0 - buffer_fraction)).clamp(0.0, 1.0);
    Duration::from_secs_f64(0.1 + over * over * 4.9)
}

/// How long until the oldest call in a full window expires.
pub fn window_wait(oldest_ms: i64, window_seconds: u64, now_ms: i64) -> Duration {
    let expiry = oldest_ms + (window_seconds as i64) * 1000;
    let remaining = (expiry - now_ms).max(0) as u64;
    Duration::from_millis(remaining) + WINDOW_EPSILON
}

pub struct RedisRateLimiter {
    pool: Pool,
    policies: HashMap<String, RateLimitPolicy>,
    /// Fair queues: tokio's mutex wakes waiters in FIFO order.
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl RedisRateLimiter {
    pub fn new(pool: Pool) -> Self {
        let mut policies = HashMap::new();
        policies.insert("steam".to_string(), RateLimitPolicy::steam());
        Self {
            pool,
            policies,
            gates: DashMap::new(),
        }
    }

    pub fn with_policy(mut self, platform: &str, policy: RateLimitPolicy) -> Self {
        self.policies.insert(platform.to_string(), policy);
        self
    }

    fn policy(&self, platform: &str) -> Result<&RateLimitPolicy, RateLimitError> {
        self.policies
            .get(platform)
            .ok_or_else(|| RateLimitError::UnknownPlatform(platform.to_string()))
    }

    fn gate(&self, platform: &str) -> Arc<Mutex<()>> {
        self.gates
            .entry(platform.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Prune expired entries and return (usage, oldest score in window).
    async fn window_usage(
        &self,
        platform: &str,
        window_seconds: u64,
        now_ms: i64,
    ) -> Result<(u32, Option<i64>), RateLimitError> {
        let key = format!("ratelimit:{}:window", platform);
        let min_score = now_ms - (window_seconds as i64) * 1000;

        let mut conn = self.pool.get().await?;
        let _: () = conn
            .zrembyscore(&key, f64::NEG_INFINITY, min_score as f64)
            .await?;
        let usage: u32 = conn.zcard(&key).await?;
        let oldest: Vec<(String, f64)> = conn.zrange_withscores(&key, 0, 0).await?;
        Ok((usage, oldest.first().map(|(_, score)| *score as i64)))
    }

    async fn record_calls(
        &self,
        platform: &str,
        weight: u32,
        window_seconds: u64,
        now_ms: i64,
    ) -> Result<(), RateLimitError> {
        let key = format!("ratelimit:{}:window", platform);
        let mut conn = self.pool.get().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for _ in 0..weight {
            pipe.zadd(&key, Uuid::new_v4().to_string(), now_ms as f64);
        }
        pipe.cmd("EXPIRE").arg(&key).arg(window_seconds + 60);
        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    /// Bump the daily counter; rolls back and fails when the cap is exceeded.
    async fn check_daily_cap(
        &self,
        platform: &str,
        weight: u32,
        cap: u64,
    ) -> Result<(), RateLimitError> {
        let key = format!("ratelimit:{}:daily", platform);
        let mut conn = self.pool.get().await?;

        let count: u64 = conn.incr(&key, weight as u64).await?;
        if count == weight as u64 {
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(24 * 3600)
                .query_async(&mut *conn)
                .await?;
        }
        if count > cap {
            let _: () = conn.decr(&key, weight as u64).await?;
            return Err(RateLimitError::DailyCapExceeded {
                platform: platform.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RateGate for RedisRateLimiter {
    async fn acquire(&self, platform: &str, weight: u32) -> Result<Duration, RateLimitError> {
        let policy = self.policy(platform)?.clone();
        let gate = self.gate(platform);
        let _serialized = gate.lock().await;

        if let Some(cap) = policy.daily_cap {
            self.check_daily_cap(platform, weight, cap).await?;
        }

        let mut waited = Duration::ZERO;
        loop {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let (usage, oldest) = self
                .window_usage(platform, policy.window_seconds, now_ms)
                .await?;

            let ratio = (usage as f64 + weight as f64) / policy.window_calls as f64;
            if ratio > 1.0 {
                let wait = oldest
                    .map(|o| window_wait(o, policy.window_seconds, now_ms))
                    .unwrap_or(WINDOW_EPSILON);
                tracing::debug!(platform, usage, wait_ms = wait.as_millis() as u64, "rate window full");
                sleep(wait).await;
                waited += wait;
                continue;
            }

            if ratio >= policy.buffer_fraction {
                let delay = slowdown_delay(ratio, policy.buffer_fraction);
                tracing::trace!(platform, usage, delay_ms = delay.as_millis() as u64, "rate buffer slowdown");
                sleep(delay).await;
                waited += delay;
            }

            self.record_calls(platform, weight, policy.window_seconds, now_ms)
                .await?;
            return Ok(waited);
        }
    }
}
