//! # studiora-core
//!
//! Core types, traits, and abstractions for the studiora asynchronous job
//! orchestration system.
//!
//! This crate provides the foundational data structures and trait
//! definitions the other studiora crates depend on: the job model and its
//! status state machine, queue names and retry policies, the error
//! taxonomy, and the `JobStore` seam implemented by both the durable
//! PostgreSQL tracker and the in-memory test store.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::{
    Admission, Disposition, Job, JobStatus, JobStatusSnapshot, JobType, ListJobsRequest,
    QueueEntry, QueueName, QueuePolicy,
};
pub use traits::{JobStore, QueueStore};
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
