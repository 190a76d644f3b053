//! Worker pool draining the durable queues.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use studiora_core::{
    defaults, Disposition, JobStore, JobType, QueueEntry, QueueName, QueuePolicy, QueueStore,
};

use crate::handler::{JobContext, Outcome};
use crate::registry::HandlerRegistry;

/// Extra lease time beyond the job timeout, covering bookkeeping between
/// claim and completion. A lease must outlive the slowest legitimate
/// delivery or a second worker redelivers a job that is still running.
const LEASE_GRACE_SECS: u64 = 30;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval when a queue is empty, in milliseconds.
    pub poll_interval_ms: u64,
    /// Concurrent handlers on the upload queue.
    pub upload_concurrency: usize,
    /// Concurrent handlers on the generation queue.
    pub generation_concurrency: usize,
    /// Per-job execution timeout in seconds.
    pub job_timeout_secs: u64,
    /// Whether to process jobs at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            upload_concurrency: defaults::UPLOAD_CONCURRENCY,
            generation_concurrency: defaults::GENERATION_CONCURRENCY,
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `WORKER_POLL_INTERVAL_MS` | `500` | Polling interval when a queue is empty |
    /// | `WORKER_UPLOAD_CONCURRENCY` | `4` | Concurrent upload handlers |
    /// | `WORKER_GENERATION_CONCURRENCY` | `1` | Concurrent generation handlers |
    /// | `JOB_TIMEOUT_SECS` | `300` | Per-job execution timeout |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let poll_interval_ms = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::WORKER_POLL_INTERVAL_MS);

        let upload_concurrency = std::env::var("WORKER_UPLOAD_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::UPLOAD_CONCURRENCY)
            .max(1);

        let generation_concurrency = std::env::var("WORKER_GENERATION_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::GENERATION_CONCURRENCY)
            .max(1);

        let job_timeout_secs = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_TIMEOUT_SECS);

        Self {
            poll_interval_ms,
            upload_concurrency,
            generation_concurrency,
            job_timeout_secs,
            enabled,
        }
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the job timeout.
    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// Set per-queue concurrency.
    pub fn with_concurrency(mut self, queue: QueueName, concurrency: usize) -> Self {
        match queue {
            QueueName::Upload => self.upload_concurrency = concurrency.max(1),
            QueueName::Generation => self.generation_concurrency = concurrency.max(1),
        }
        self
    }

    fn concurrency(&self, queue: QueueName) -> usize {
        match queue {
            QueueName::Upload => self.upload_concurrency,
            QueueName::Generation => self.generation_concurrency,
        }
    }

    fn lease(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs + LEASE_GRACE_SECS)
    }
}

/// Event emitted by the worker pool.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Worker pool started.
    WorkerStarted,
    /// Worker pool stopped.
    WorkerStopped,
    /// A delivery began executing.
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
    },
    /// A handler reported progress.
    JobProgress { job_id: Uuid, percent: i32 },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// A delivery failed with attempts remaining.
    JobRetried {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
        error: String,
    },
    /// A job failed terminally.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
}

/// Handle for controlling a running worker pool.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    supervisor: Option<tokio::task::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal every queue loop to shut down gracefully. In-flight jobs run
    /// to completion; nothing new is claimed. Await [`join`](Self::join)
    /// before process exit so those jobs are not aborted with the runtime.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for every queue loop to finish.
    pub async fn join(self) {
        if let Some(supervisor) = self.supervisor {
            let _ = supervisor.await;
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker pool: one claim loop per durable queue.
pub struct WorkerPool {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn QueueStore>,
    registry: HandlerRegistry,
    config: WorkerConfig,
    upload_policy: QueuePolicy,
    generation_policy: QueuePolicy,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerPool {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn QueueStore>,
        registry: HandlerRegistry,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            queue,
            registry,
            config,
            upload_policy: QueuePolicy::from_env(QueueName::Upload),
            generation_policy: QueuePolicy::from_env(QueueName::Generation),
            event_tx,
        }
    }

    /// Override one queue's retry policy. Must match the policy entries were
    /// enqueued with, since the store enforces the attempt ceiling while the
    /// worker computes the backoff.
    pub fn with_policy(mut self, queue: QueueName, policy: QueuePolicy) -> Self {
        match queue {
            QueueName::Upload => self.upload_policy = policy,
            QueueName::Generation => self.generation_policy = policy,
        }
        self
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start one loop per queue and return a control handle.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let event_rx = self.event_tx.subscribe();

        let pool = Arc::new(self);
        let mut supervisor = None;
        if pool.config.enabled {
            info!(
                subsystem = "worker",
                poll_interval_ms = pool.config.poll_interval_ms,
                upload_concurrency = pool.config.upload_concurrency,
                generation_concurrency = pool.config.generation_concurrency,
                "Worker pool started"
            );
            let _ = pool.event_tx.send(WorkerEvent::WorkerStarted);

            let mut loops = Vec::new();
            for queue in QueueName::ALL {
                let pool = pool.clone();
                let shutdown_rx = shutdown_rx.clone();
                loops.push(tokio::spawn(async move {
                    pool.run_queue(queue, shutdown_rx).await;
                }));
            }

            // One stop event for the pool, after every loop has drained.
            let event_tx = pool.event_tx.clone();
            supervisor = Some(tokio::spawn(async move {
                for queue_loop in loops {
                    let _ = queue_loop.await;
                }
                let _ = event_tx.send(WorkerEvent::WorkerStopped);
                info!(subsystem = "worker", "Worker pool stopped");
            }));
        } else {
            info!(subsystem = "worker", "Worker pool is disabled, not starting");
        }

        WorkerHandle {
            shutdown_tx,
            event_rx,
            supervisor,
        }
    }

    /// Claim loop for one queue.
    ///
    /// Claims up to the queue's concurrency per batch and waits for the
    /// batch before claiming again; sleeps only when the queue is empty,
    /// woken early by the enqueue notify.
    async fn run_queue(&self, queue: QueueName, mut shutdown_rx: watch::Receiver<bool>) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let concurrency = self.config.concurrency(queue);
        let notify = self.queue.queue_notify();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.sweep(queue).await;

            let mut tasks = tokio::task::JoinSet::new();
            for _ in 0..concurrency {
                match self.queue.claim(queue, self.config.lease()).await {
                    Ok(Some(entry)) => {
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_entry(entry).await;
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(subsystem = "worker", %queue, error = %e, "Failed to claim entry");
                        break;
                    }
                }
            }

            if tasks.is_empty() {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = notify.notified() => {}
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(subsystem = "worker", %queue, claimed = tasks.len(), "Processing batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(subsystem = "worker", %queue, error = ?e, "Job task panicked");
                    }
                }
            }
        }

        info!(subsystem = "worker", %queue, "Queue loop stopped");
    }

    /// Dead-letter entries whose budget was consumed by crashed attempts,
    /// and fail their jobs. Normal in-process failures never reach here.
    async fn sweep(&self, queue: QueueName) {
        let swept = match self.queue.sweep_exhausted(queue).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(subsystem = "worker", %queue, error = %e, "Sweep failed");
                return;
            }
        };
        for entry in swept {
            let error = "retry budget exhausted before the job finished";
            warn!(
                subsystem = "worker",
                %queue,
                job_id = %entry.job_id,
                attempt = entry.attempt,
                "Dead-lettered abandoned entry"
            );
            if let Err(e) = self.jobs.fail(entry.tenant_id, entry.job_id, error).await {
                error!(subsystem = "worker", job_id = %entry.job_id, error = %e, "Failed to fail swept job");
            }
        }
    }

    fn clone_refs(&self) -> WorkerRef {
        WorkerRef {
            jobs: self.jobs.clone(),
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            event_tx: self.event_tx.clone(),
            job_timeout: Duration::from_secs(self.config.job_timeout_secs),
            upload_policy: self.upload_policy,
            generation_policy: self.generation_policy,
        }
    }
}

/// Reference bundle for executing a single delivery in a spawned task.
struct WorkerRef {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn QueueStore>,
    registry: HandlerRegistry,
    event_tx: broadcast::Sender<WorkerEvent>,
    job_timeout: Duration,
    upload_policy: QueuePolicy,
    generation_policy: QueuePolicy,
}

impl WorkerRef {
    fn policy(&self, queue: QueueName) -> QueuePolicy {
        match queue {
            QueueName::Upload => self.upload_policy,
            QueueName::Generation => self.generation_policy,
        }
    }

    async fn execute_entry(self, entry: QueueEntry) {
        let start = Instant::now();
        let tenant_id = entry.tenant_id;
        let job_id = entry.job_id;

        let job = match self.jobs.get(tenant_id, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                // Entry outlived its job; nothing to do.
                warn!(subsystem = "worker", %job_id, "Claimed entry has no job, dropping");
                let _ = self.queue.ack(entry.id).await;
                return;
            }
            Err(e) => {
                error!(subsystem = "worker", %job_id, error = %e, "Failed to load job, redelivering");
                return;
            }
        };

        // Duplicate delivery of an already-finished job (e.g. the previous
        // worker finished but crashed before acking).
        if job.status.is_terminal() {
            debug!(subsystem = "worker", %job_id, status = %job.status, "Job already terminal, acking");
            let _ = self.queue.ack(entry.id).await;
            return;
        }

        let job_type = job.job_type;
        if let Err(e) = self.jobs.mark_started(tenant_id, job_id).await {
            error!(subsystem = "worker", %job_id, error = %e, "Failed to mark job started, redelivering");
            return;
        }

        info!(
            subsystem = "worker",
            %job_id,
            job_type = %job_type,
            attempt = entry.attempt,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            job_type,
            attempt: entry.attempt,
        });

        // Progress flows through a channel so the sink stays synchronous;
        // the drain task persists and broadcasts each report.
        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
        let progress_jobs = self.jobs.clone();
        let progress_events = self.event_tx.clone();
        let drain = tokio::spawn(async move {
            while let Some((percent, metadata)) = progress_rx.recv().await {
                if let Err(e) = progress_jobs
                    .update_progress(tenant_id, job_id, percent, metadata)
                    .await
                {
                    warn!(subsystem = "worker", %job_id, error = %e, "Failed to persist progress");
                }
                let _ = progress_events.send(WorkerEvent::JobProgress { job_id, percent });
            }
        });

        let handler = self.registry.get(job_type);
        let ctx = JobContext::new(job)
            .with_attempt(entry.attempt)
            .with_progress_sink(move |percent, metadata| {
                let _ = progress_tx.send((percent, metadata));
            });

        let outcome = match tokio::time::timeout(self.job_timeout, handler.execute(ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Retry(format!(
                "handler exceeded timeout of {}s",
                self.job_timeout.as_secs()
            )),
        };
        // The sink died with the handler future; drain ends after applying
        // whatever was already reported.
        let _ = drain.await;

        match outcome {
            Outcome::Success(result) => {
                if let Err(e) = self.jobs.complete(tenant_id, job_id, result).await {
                    error!(subsystem = "worker", %job_id, error = %e, "Failed to complete job, redelivering");
                    return;
                }
                if let Err(e) = self.queue.ack(entry.id).await {
                    error!(subsystem = "worker", %job_id, error = %e, "Failed to ack entry");
                }
                info!(
                    subsystem = "worker",
                    %job_id,
                    job_type = %job_type,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job_id, job_type });
            }
            Outcome::Failed(error) | Outcome::Retry(error) => {
                let backoff = self.policy(entry.queue).backoff(entry.attempt);
                match self.queue.retry_or_bury(entry.id, backoff).await {
                    Ok(Disposition::Requeued { next_at }) => {
                        warn!(
                            subsystem = "worker",
                            %job_id,
                            job_type = %job_type,
                            attempt = entry.attempt,
                            %error,
                            %next_at,
                            "Job attempt failed, redelivery scheduled"
                        );
                        let _ = self.event_tx.send(WorkerEvent::JobRetried {
                            job_id,
                            job_type,
                            attempt: entry.attempt,
                            error,
                        });
                    }
                    Ok(Disposition::Dead) => {
                        warn!(
                            subsystem = "worker",
                            %job_id,
                            job_type = %job_type,
                            attempt = entry.attempt,
                            %error,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Job failed, retry budget exhausted"
                        );
                        if let Err(e) = self.jobs.fail(tenant_id, job_id, &error).await {
                            error!(subsystem = "worker", %job_id, error = %e, "Failed to mark job failed");
                        }
                        let _ = self.event_tx.send(WorkerEvent::JobFailed {
                            job_id,
                            job_type,
                            error,
                        });
                    }
                    Err(e) => {
                        error!(subsystem = "worker", %job_id, error = %e, "Failed to settle entry");
                    }
                }
            }
        }
    }
}
