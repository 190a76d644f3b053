//! Sliding-window admission control for job submissions.
//!
//! Every submission passes `check_admission` before anything durable
//! happens. The window is a Redis sorted set per (tenant, job type); a
//! single atomic pipeline prunes expired timestamps, records the attempt,
//! and counts the window, so concurrent submissions cannot both sneak under
//! the limit. An in-memory store covers tests and single-process mode.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `RATE_WINDOW_SECS`: window length (default: 60)
//! - `RATE_LIMIT_UPLOAD` / `RATE_LIMIT_GENERATION` / `RATE_LIMIT_EVALUATION`:
//!   per-type limits per window (defaults: 10 / 3 / 10)
//! - `RATE_FAILURE_POLICY`: "open" (default) or "closed"
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use studiora_core::{defaults, Admission, Error, JobType, Result};

/// What to do when the window store is unreachable or slow.
///
/// Open keeps the product working when Redis is down at the cost of
/// momentarily unlimited submissions; Closed protects the downstream
/// provider at the cost of rejecting legitimate traffic. This is a visible
/// deployment decision, not a hidden catch block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Open,
    Closed,
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sliding window length.
    pub window: Duration,
    /// Max material uploads per tenant per window.
    pub upload_limit: u64,
    /// Max lesson generations per tenant per window.
    pub generation_limit: u64,
    /// Max check-in evaluations per tenant per window.
    pub evaluation_limit: u64,
    /// Upper bound on any single store operation.
    pub op_timeout: Duration,
    /// Behavior on store error or timeout.
    pub failure_policy: FailurePolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(defaults::RATE_WINDOW_SECS),
            upload_limit: defaults::RATE_LIMIT_UPLOAD,
            generation_limit: defaults::RATE_LIMIT_GENERATION,
            evaluation_limit: defaults::RATE_LIMIT_EVALUATION,
            op_timeout: Duration::from_secs(defaults::RATE_OP_TIMEOUT_SECS),
            failure_policy: FailurePolicy::Open,
        }
    }
}

impl RateLimitConfig {
    /// Load configuration from environment variables, falling back to the
    /// centralized defaults.
    pub fn from_env() -> Self {
        fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        let failure_policy = match std::env::var("RATE_FAILURE_POLICY").as_deref() {
            Ok("closed") => FailurePolicy::Closed,
            _ => FailurePolicy::Open,
        };

        Self {
            window: Duration::from_secs(parse_env("RATE_WINDOW_SECS", defaults::RATE_WINDOW_SECS)),
            upload_limit: parse_env("RATE_LIMIT_UPLOAD", defaults::RATE_LIMIT_UPLOAD),
            generation_limit: parse_env("RATE_LIMIT_GENERATION", defaults::RATE_LIMIT_GENERATION),
            evaluation_limit: parse_env("RATE_LIMIT_EVALUATION", defaults::RATE_LIMIT_EVALUATION),
            op_timeout: Duration::from_secs(defaults::RATE_OP_TIMEOUT_SECS),
            failure_policy,
        }
    }

    /// Per-window limit for a job type.
    pub fn limit_for(&self, job_type: JobType) -> u64 {
        match job_type {
            JobType::MaterialUpload => self.upload_limit,
            JobType::LessonGeneration => self.generation_limit,
            JobType::CheckInEvaluation => self.evaluation_limit,
        }
    }
}

/// Outcome of one attempt against a rate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    /// Whether the attempt fit under the limit.
    pub admitted: bool,
    /// Events in the window after this call (the admitted one included).
    pub count: u64,
}

/// Backend storing per-key sliding windows.
///
/// A rejected attempt must not consume budget: hammering a full window
/// never pushes the reset further out.
#[async_trait]
pub trait RateWindowStore: Send + Sync {
    async fn try_acquire(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
    ) -> Result<WindowDecision>;
}

/// Redis sorted-set window store.
///
/// One set per key, members scored by event timestamp. The prune + add +
/// count pipeline runs atomically (MULTI/EXEC); on rejection the freshly
/// added member is removed again so the attempt does not count.
pub struct RedisRateStore {
    connection: ConnectionManager,
}

impl RedisRateStore {
    /// Connect to Redis at the given URL.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("invalid Redis URL: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Request(format!("Redis connect failed: {e}")))?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl RateWindowStore for RedisRateStore {
    async fn try_acquire(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
    ) -> Result<WindowDecision> {
        let mut conn = self.connection.clone();
        let cutoff = now_ms.saturating_sub(window_ms);
        // Timestamps alone collide when submissions land in the same
        // millisecond; a unique suffix keeps every event a distinct member.
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg(0).arg(cutoff);
        pipe.cmd("ZADD").arg(key).arg(now_ms).arg(&member);
        pipe.cmd("ZCARD").arg(key);
        pipe.cmd("PEXPIRE").arg(key).arg(window_ms);

        let (_pruned, _added, count, _expired): (u64, u64, u64, u64) = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Request(format!("Redis rate pipeline failed: {e}")))?;

        if count <= limit {
            return Ok(WindowDecision {
                admitted: true,
                count,
            });
        }

        // Over the limit: take the attempt back out. Best effort; if the
        // ZREM itself fails the member expires with the window anyway.
        let _: std::result::Result<u64, _> = redis::cmd("ZREM")
            .arg(key)
            .arg(&member)
            .query_async(&mut conn)
            .await;

        Ok(WindowDecision {
            admitted: false,
            count: count - 1,
        })
    }
}

/// In-memory window store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryRateStore {
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateWindowStore for MemoryRateStore {
    async fn try_acquire(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
    ) -> Result<WindowDecision> {
        let cutoff = now_ms.saturating_sub(window_ms);
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key.to_string()).or_default();

        while window.front().is_some_and(|&ts| ts <= cutoff) {
            window.pop_front();
        }

        if (window.len() as u64) < limit {
            window.push_back(now_ms);
            Ok(WindowDecision {
                admitted: true,
                count: window.len() as u64,
            })
        } else {
            Ok(WindowDecision {
                admitted: false,
                count: window.len() as u64,
            })
        }
    }
}

/// Per-tenant, per-type sliding-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateWindowStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter over an explicit store.
    pub fn new(store: Arc<dyn RateWindowStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Create a limiter from environment configuration.
    ///
    /// Connects to `REDIS_URL`; when Redis is unreachable, falls back to
    /// the in-memory store with a WARN so a missing Redis never takes the
    /// submission path down.
    pub async fn from_env() -> Self {
        let config = RateLimitConfig::from_env();
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let store: Arc<dyn RateWindowStore> = match RedisRateStore::connect(&redis_url).await {
            Ok(store) => {
                info!(
                    subsystem = "limits",
                    component = "rate_limiter",
                    window_secs = config.window.as_secs(),
                    "Rate limiter using Redis window store"
                );
                Arc::new(store)
            }
            Err(e) => {
                warn!(
                    subsystem = "limits",
                    component = "rate_limiter",
                    error = %e,
                    "Redis unavailable, rate limiter using in-memory store"
                );
                Arc::new(MemoryRateStore::new())
            }
        };

        Self::new(store, config)
    }

    /// Create a limiter over an in-memory store (tests, single process).
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(Arc::new(MemoryRateStore::new()), config)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check whether a submission for this tenant and job type may proceed.
    ///
    /// Never returns an error for store trouble: the configured
    /// [`FailurePolicy`] converts backend errors and timeouts into an
    /// admission decision.
    pub async fn check_admission(&self, tenant_id: Uuid, job_type: JobType) -> Admission {
        let limit = self.config.limit_for(job_type);
        let window_ms = self.config.window.as_millis() as u64;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let key = format!("rl:{}:{}", tenant_id, job_type);

        let attempt = tokio::time::timeout(
            self.config.op_timeout,
            self.store.try_acquire(&key, now_ms, window_ms, limit),
        )
        .await;

        let decision = match attempt {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => return self.apply_failure_policy(tenant_id, job_type, &e.to_string()),
            Err(_) => return self.apply_failure_policy(tenant_id, job_type, "store timeout"),
        };

        if decision.admitted {
            debug!(
                subsystem = "limits",
                component = "rate_limiter",
                op = "check_admission",
                tenant_id = %tenant_id,
                job_type = %job_type,
                remaining = limit.saturating_sub(decision.count),
                "Admission granted"
            );
            Admission::granted(limit.saturating_sub(decision.count))
        } else {
            // The contract is a window-length hint, not a precise drain
            // time: after W the caller's window is guaranteed empty.
            let retry_after = self.config.window;
            debug!(
                subsystem = "limits",
                component = "rate_limiter",
                op = "check_admission",
                tenant_id = %tenant_id,
                job_type = %job_type,
                retry_after_secs = retry_after.as_secs(),
                "Admission rejected"
            );
            Admission::rejected(retry_after)
        }
    }

    fn apply_failure_policy(&self, tenant_id: Uuid, job_type: JobType, reason: &str) -> Admission {
        match self.config.failure_policy {
            FailurePolicy::Open => {
                warn!(
                    subsystem = "limits",
                    component = "rate_limiter",
                    tenant_id = %tenant_id,
                    job_type = %job_type,
                    error = reason,
                    "Rate store unavailable, admitting (fail-open)"
                );
                // Remaining budget is unknowable without the store.
                Admission::granted(0)
            }
            FailurePolicy::Closed => {
                warn!(
                    subsystem = "limits",
                    component = "rate_limiter",
                    tenant_id = %tenant_id,
                    job_type = %job_type,
                    error = reason,
                    "Rate store unavailable, rejecting (fail-closed)"
                );
                Admission::rejected(self.config.window)
            }
        }
    }
}
