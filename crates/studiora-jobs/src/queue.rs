//! Queue facade: durable dispatch with a synchronous degraded-mode fallback.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use studiora_core::{Error, JobStore, JobType, QueueName, QueuePolicy, QueueStore, Result};

use crate::handler::{JobContext, Outcome};
use crate::registry::HandlerRegistry;

/// Dispatch seam between job submission and job execution.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hand a created job to the execution side.
    ///
    /// For the durable queue this returns once the entry is persisted; for
    /// the synchronous fallback it returns after the handler has run, and
    /// surfaces the handler's failure to the caller.
    async fn dispatch(&self, tenant_id: Uuid, job_id: Uuid, job_type: JobType) -> Result<()>;

    /// Whether dispatched jobs survive a process restart.
    fn is_durable(&self) -> bool;
}

/// Durable queue backed by a [`QueueStore`].
///
/// Dispatch persists an entry on the job type's queue with that queue's
/// retry policy; the worker pool picks it up from there. Policies are
/// resolved once at construction (environment overrides included).
pub struct DurableQueue {
    store: Arc<dyn QueueStore>,
    upload_policy: QueuePolicy,
    generation_policy: QueuePolicy,
}

impl DurableQueue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            upload_policy: QueuePolicy::from_env(QueueName::Upload),
            generation_policy: QueuePolicy::from_env(QueueName::Generation),
        }
    }

    fn policy(&self, queue: QueueName) -> QueuePolicy {
        match queue {
            QueueName::Upload => self.upload_policy,
            QueueName::Generation => self.generation_policy,
        }
    }
}

#[async_trait]
impl JobQueue for DurableQueue {
    async fn dispatch(&self, tenant_id: Uuid, job_id: Uuid, job_type: JobType) -> Result<()> {
        let queue = job_type.queue();
        self.store
            .enqueue(tenant_id, job_id, queue, self.policy(queue))
            .await?;
        info!(
            subsystem = "queue",
            %job_id,
            %tenant_id,
            job_type = %job_type,
            queue = %queue,
            "Job enqueued"
        );
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// Synchronous in-process fallback used when the durable backend is
/// unavailable at startup.
///
/// `dispatch` runs the registered handler inline and reports the terminal
/// status through the job tracker before returning. There is no retry and
/// no progress durability beyond what the handler reports; a handler
/// failure becomes the caller's error.
pub struct SyncQueue {
    registry: HandlerRegistry,
    jobs: Arc<dyn JobStore>,
}

impl SyncQueue {
    pub fn new(registry: HandlerRegistry, jobs: Arc<dyn JobStore>) -> Self {
        warn!(
            subsystem = "queue",
            component = "sync_queue",
            "Durable queue unavailable; jobs will execute inline with no retry"
        );
        Self { registry, jobs }
    }
}

#[async_trait]
impl JobQueue for SyncQueue {
    async fn dispatch(&self, tenant_id: Uuid, job_id: Uuid, job_type: JobType) -> Result<()> {
        let Some(job) = self.jobs.get(tenant_id, job_id).await? else {
            return Err(Error::JobNotFound(job_id));
        };

        self.jobs.mark_started(tenant_id, job_id).await?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let progress_jobs = self.jobs.clone();
        let drain = tokio::spawn(async move {
            while let Some((percent, metadata)) = rx.recv().await {
                if let Err(e) = progress_jobs
                    .update_progress(tenant_id, job_id, percent, metadata)
                    .await
                {
                    warn!(%job_id, error = %e, "Failed to persist inline progress");
                }
            }
        });

        let handler = self.registry.get(job_type);
        let ctx = JobContext::new(job).with_progress_sink(move |percent, metadata| {
            let _ = tx.send((percent, metadata));
        });
        let outcome = handler.execute(ctx).await;
        // Sink dropped with ctx; drain ends once buffered reports are applied.
        let _ = drain.await;

        match outcome {
            Outcome::Success(result) => {
                self.jobs.complete(tenant_id, job_id, result).await?;
                Ok(())
            }
            Outcome::Failed(message) | Outcome::Retry(message) => {
                error!(
                    subsystem = "queue",
                    component = "sync_queue",
                    %job_id,
                    job_type = %job_type,
                    error = %message,
                    "Inline job execution failed"
                );
                self.jobs.fail(tenant_id, job_id, &message).await?;
                Err(Error::Internal(message))
            }
        }
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Choose the queue implementation for this process.
///
/// The durable queue is used whenever a backend is available, unless
/// `QUEUE_MODE=sync` forces the inline fallback. With no backend the
/// fallback is the only option; `SyncQueue::new` logs the startup WARN
/// either way.
pub fn queue_from_env(
    durable: Option<Arc<dyn QueueStore>>,
    registry: HandlerRegistry,
    jobs: Arc<dyn JobStore>,
) -> Arc<dyn JobQueue> {
    let sync_forced = std::env::var("QUEUE_MODE")
        .map(|v| v == "sync")
        .unwrap_or(false);
    match durable {
        Some(store) if !sync_forced => Arc::new(DurableQueue::new(store)),
        _ => Arc::new(SyncQueue::new(registry, jobs)),
    }
}
