//! # studiora-limits
//!
//! Admission control and result caching for the studiora job system.
//!
//! This crate provides:
//! - A sliding-window rate limiter (`RateLimiter`) over Redis sorted sets,
//!   with an in-memory store and explicit fail-open/fail-closed policy
//! - The artifact result cache (`ResultCache`) with structured keys that
//!   support purging every artifact derived from one source document

pub mod rate_limit;
pub mod result_cache;

pub use rate_limit::{
    FailurePolicy, MemoryRateStore, RateLimitConfig, RateLimiter, RateWindowStore, RedisRateStore,
    WindowDecision,
};
pub use result_cache::{artifact_key, artifact_prefix, ResultCache};
