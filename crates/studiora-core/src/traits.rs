//! Core trait seams for the studiora job system.
//!
//! These traits define the interfaces concrete backends must satisfy,
//! enabling the synchronous test adapter to stand in for the durable
//! PostgreSQL implementation without touching handler or service code.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Disposition, Job, JobStatusSnapshot, JobType, ListJobsRequest, QueueEntry, QueueName,
    QueuePolicy,
};

/// Persisted job tracker: the single writer for `Job` records.
///
/// Every implementation must uphold two invariants regardless of backend:
///
/// - **Terminal finality** — once a job is completed or failed, `complete`,
///   `fail`, `mark_started` and `update_progress` are silent no-ops. This
///   is the primary defense against duplicate deliveries racing each other.
/// - **Tenant scoping** — all operations take the owning tenant id and must
///   not observe or mutate another tenant's job even when handed its exact
///   job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in `Queued` status with progress 0. Returns the new id.
    async fn create(
        &self,
        tenant_id: Uuid,
        job_type: JobType,
        payload: JsonValue,
    ) -> Result<Uuid>;

    /// Transition `Queued → Processing` and set the started timestamp.
    async fn mark_started(&self, tenant_id: Uuid, job_id: Uuid) -> Result<()>;

    /// Raise progress (never lowers it) and merge metadata into any
    /// previously reported metadata.
    async fn update_progress(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        percent: i32,
        metadata: Option<JsonValue>,
    ) -> Result<()>;

    /// Transition to `Completed` with a result. First write wins.
    async fn complete(&self, tenant_id: Uuid, job_id: Uuid, result: JsonValue) -> Result<()>;

    /// Transition to `Failed` with an error message. First write wins.
    async fn fail(&self, tenant_id: Uuid, job_id: Uuid, error: &str) -> Result<()>;

    /// Fetch one job; `None` when it does not exist *or* belongs to a
    /// different tenant (the two cases are indistinguishable by design).
    async fn get(&self, tenant_id: Uuid, job_id: Uuid) -> Result<Option<Job>>;

    /// List the tenant's jobs, newest first, with optional filters.
    async fn list(&self, tenant_id: Uuid, req: ListJobsRequest) -> Result<Vec<Job>>;

    /// Batch status lookup; ids that are unknown or foreign are omitted.
    async fn poll_many(&self, tenant_id: Uuid, ids: &[Uuid]) -> Result<Vec<JobStatusSnapshot>>;
}

/// Backing store for durable queue entries.
///
/// Claims must be exclusive under concurrent workers (an entry is delivered
/// to at most one worker per lease), and a claim must make the entry
/// claimable again after `lease` elapses so a crashed worker's deliveries
/// are not lost. Delivery is at-least-once, never at-most-once.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a pending entry, immediately claimable. Returns the entry id.
    async fn enqueue(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        queue: QueueName,
        policy: QueuePolicy,
    ) -> Result<Uuid>;

    /// Claim the next due entry on a queue, bumping its attempt counter and
    /// holding it invisible for `lease`.
    async fn claim(&self, queue: QueueName, lease: Duration) -> Result<Option<QueueEntry>>;

    /// Dead-letter due entries whose budget was consumed by a crashed final
    /// attempt, returning them so the caller can fail their jobs.
    async fn sweep_exhausted(&self, queue: QueueName) -> Result<Vec<QueueEntry>>;

    /// Acknowledge a successful delivery by removing the entry.
    async fn ack(&self, entry_id: Uuid) -> Result<()>;

    /// Handle a failed delivery: reschedule with the given backoff when
    /// attempts remain, otherwise move the entry to the dead-letter state.
    async fn retry_or_bury(&self, entry_id: Uuid, backoff: Duration) -> Result<Disposition>;

    /// Number of pending entries on a queue (due or not).
    async fn depth(&self, queue: QueueName) -> Result<i64>;

    /// Number of dead-lettered entries on a queue.
    async fn dead_count(&self, queue: QueueName) -> Result<i64>;

    /// Notify handle waking workers when an entry lands on the queue.
    fn queue_notify(&self) -> Arc<Notify>;
}
