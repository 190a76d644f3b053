//! # studiora-jobs
//!
//! Job orchestration for the studiora platform.
//!
//! This crate provides:
//! - The `JobHandler` seam and the three platform handlers
//! - Durable queue dispatch with a synchronous degraded-mode fallback
//! - A worker pool with per-queue concurrency, retry, and timeouts
//! - The `JobService` submission and polling facade
//! - The generation provider client (HTTP + mock)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use studiora_db::Database;
//! use studiora_jobs::{HandlerRegistry, WorkerConfig, WorkerPool};
//!
//! let db = Database::connect("postgres://...").await?;
//! let registry = HandlerRegistry::new(upload, generation, evaluation)?;
//!
//! let pool = WorkerPool::new(
//!     db.jobs.clone(),
//!     db.queue.clone(),
//!     registry,
//!     WorkerConfig::from_env(),
//! );
//! let handle = pool.start();
//!
//! // Listen for events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! handle.shutdown();
//! ```

pub mod handler;
pub mod handlers;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod service;
pub mod testing;
pub mod worker;

// Re-export core types
pub use studiora_core::*;

pub use handler::{JobContext, JobHandler, NoOpHandler, Outcome, ProgressSink};
pub use handlers::{
    CheckInEvaluationHandler, IngestSummary, Ingestor, LessonGenerationHandler,
    MaterialUploadHandler, ParagraphIngestor,
};
pub use provider::{
    GenerationProvider, GenerationRequest, GenerationResponse, HttpGenerationProvider,
    MockGenerationProvider,
};
pub use queue::{queue_from_env, DurableQueue, JobQueue, SyncQueue};
pub use registry::HandlerRegistry;
pub use service::JobService;
pub use worker::{WorkerConfig, WorkerEvent, WorkerHandle, WorkerPool};
