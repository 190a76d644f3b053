//! Centralized default constants for the studiora job system.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers. Every value here can be overridden by the environment variable
//! documented next to it.

// =============================================================================
// ADMISSION CONTROL
// =============================================================================

/// Sliding-window length in seconds. Env: `RATE_WINDOW_SECS`.
pub const RATE_WINDOW_SECS: u64 = 60;

/// Max material uploads per tenant per window. Env: `RATE_LIMIT_UPLOAD`.
pub const RATE_LIMIT_UPLOAD: u64 = 10;

/// Max lesson generations per tenant per window. Env: `RATE_LIMIT_GENERATION`.
///
/// Lower than the upload limit: each admission turns into a call against
/// the metered external generation provider.
pub const RATE_LIMIT_GENERATION: u64 = 3;

/// Max check-in evaluations per tenant per window. Env: `RATE_LIMIT_EVALUATION`.
pub const RATE_LIMIT_EVALUATION: u64 = 10;

/// Upper bound on any single limiter-store operation, in seconds.
///
/// The limiter must never block the submission path indefinitely; on
/// timeout the configured failure policy applies.
pub const RATE_OP_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// QUEUES
// =============================================================================

/// Delivery attempts on the upload queue. Env: `QUEUE_UPLOAD_ATTEMPTS`.
pub const UPLOAD_MAX_ATTEMPTS: i32 = 3;

/// Backoff base for the upload queue, seconds. Env: `QUEUE_UPLOAD_BACKOFF_SECS`.
pub const UPLOAD_BACKOFF_BASE_SECS: u64 = 2;

/// Delivery attempts on the generation queue. Env: `QUEUE_GENERATION_ATTEMPTS`.
pub const GENERATION_MAX_ATTEMPTS: i32 = 2;

/// Backoff base for the generation queue, seconds. Env: `QUEUE_GENERATION_BACKOFF_SECS`.
pub const GENERATION_BACKOFF_BASE_SECS: u64 = 5;

// =============================================================================
// WORKER
// =============================================================================

/// Poll interval when a queue is empty, milliseconds. Env: `WORKER_POLL_INTERVAL_MS`.
pub const WORKER_POLL_INTERVAL_MS: u64 = 500;

/// Concurrent handlers on the upload queue. Env: `WORKER_UPLOAD_CONCURRENCY`.
pub const UPLOAD_CONCURRENCY: usize = 4;

/// Concurrent handlers on the generation queue. Env: `WORKER_GENERATION_CONCURRENCY`.
///
/// Kept low: the generation provider is rate limited and billed per call.
pub const GENERATION_CONCURRENCY: usize = 1;

/// Per-job execution timeout in seconds. Env: `JOB_TIMEOUT_SECS`.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// RESULT CACHE
// =============================================================================

/// Default artifact TTL in seconds. Env: `CACHE_TTL_SECS`.
pub const CACHE_TTL_SECS: u64 = 86_400;

// =============================================================================
// LISTING
// =============================================================================

/// Default page size for job listings.
pub const PAGE_LIMIT: i64 = 50;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

/// Max job ids accepted by a single poll-many call.
pub const POLL_BATCH_MAX: usize = 100;

// =============================================================================
// PROVIDER
// =============================================================================

/// Timeout for generation-provider requests in seconds. Env: `PROVIDER_TIMEOUT_SECS`.
pub const PROVIDER_TIMEOUT_SECS: u64 = 120;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_budget_is_tighter_than_upload() {
        const {
            assert!(GENERATION_MAX_ATTEMPTS < UPLOAD_MAX_ATTEMPTS);
            assert!(GENERATION_BACKOFF_BASE_SECS > UPLOAD_BACKOFF_BASE_SECS);
            assert!(GENERATION_CONCURRENCY < UPLOAD_CONCURRENCY);
        }
        assert!(RATE_LIMIT_GENERATION < RATE_LIMIT_UPLOAD);
    }

    #[test]
    fn limiter_timeout_is_bounded() {
        const {
            assert!(RATE_OP_TIMEOUT_SECS <= 5);
        }
    }
}
