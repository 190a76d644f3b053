//! Handler seam between the worker pool and job-type logic.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use studiora_core::{Job, JobType};

/// Progress sink type passed to job handlers.
///
/// Synchronous on purpose: handlers report, the worker persists. The worker
/// wires this to a channel whose drain task writes through to the job
/// tracker and broadcasts a progress event.
pub type ProgressSink = Box<dyn Fn(i32, Option<JsonValue>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
    /// Delivery attempt number (1-based).
    pub attempt: i32,
    progress_sink: Option<ProgressSink>,
}

impl JobContext {
    /// Create a new job context for a first delivery.
    pub fn new(job: Job) -> Self {
        Self {
            job,
            attempt: 1,
            progress_sink: None,
        }
    }

    /// Set the delivery attempt number.
    pub fn with_attempt(mut self, attempt: i32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Set the progress sink.
    pub fn with_progress_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(i32, Option<JsonValue>) + Send + Sync + 'static,
    {
        self.progress_sink = Some(Box::new(sink));
        self
    }

    /// Report progress; metadata merges into previously reported metadata.
    pub fn report_progress(&self, percent: i32, metadata: Option<JsonValue>) {
        if let Some(ref sink) = self.progress_sink {
            sink(percent, metadata);
        }
    }

    /// Get the tenant this job belongs to.
    pub fn tenant_id(&self) -> Uuid {
        self.job.tenant_id
    }

    /// Get the job payload.
    pub fn payload(&self) -> Option<&JsonValue> {
        self.job.payload.as_ref()
    }
}

/// Result of one handler invocation.
///
/// Both `Failed` and `Retry` consume delivery budget; the distinction is
/// the expectation, surfaced in logs, not the policy. The queue decides
/// requeue vs. dead-letter either way.
#[derive(Debug)]
pub enum Outcome {
    /// Job completed successfully with a result payload.
    Success(JsonValue),
    /// Permanent failure (validation, malformed input); a retry is not
    /// expected to succeed.
    Failed(String),
    /// Transient failure (provider or storage hiccup); worth retrying.
    Retry(String),
}

/// Trait for job handlers.
///
/// Delivery is at-least-once: a handler may run more than once for the
/// same job. Handlers must be idempotent with respect to effects observable
/// through the job tracker.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> Outcome;
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> Outcome {
        ctx.report_progress(50, None);
        ctx.report_progress(100, None);
        Outcome::Success(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use studiora_core::JobStatus;

    fn test_job(job_type: JobType, payload: Option<JsonValue>) -> Job {
        Job {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Processing,
            payload,
            result: None,
            error_message: None,
            progress_percent: 0,
            progress_metadata: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn context_exposes_tenant_and_payload() {
        let job = test_job(
            JobType::MaterialUpload,
            Some(json!({"material_id": "m1"})),
        );
        let tenant = job.tenant_id;

        let ctx = JobContext::new(job);
        assert_eq!(ctx.tenant_id(), tenant);
        assert_eq!(ctx.payload().unwrap()["material_id"], "m1");
        assert_eq!(ctx.attempt, 1);
    }

    #[test]
    fn report_progress_without_sink_is_harmless() {
        let ctx = JobContext::new(test_job(JobType::MaterialUpload, None));
        ctx.report_progress(50, None);
        ctx.report_progress(100, Some(json!({"phase": "done"})));
    }

    #[test]
    fn progress_sink_receives_reports_in_order() {
        use std::sync::{Arc, Mutex};

        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();

        let ctx = JobContext::new(test_job(JobType::LessonGeneration, None))
            .with_progress_sink(move |percent, metadata| {
                log_clone.lock().unwrap().push((percent, metadata));
            });

        ctx.report_progress(25, Some(json!({"phase": "fingerprint"})));
        ctx.report_progress(80, None);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].0, 25);
        assert_eq!(log[1], (80, None));
    }

    #[tokio::test]
    async fn noop_handler_succeeds_for_every_type() {
        for job_type in JobType::ALL {
            let handler = NoOpHandler::new(job_type);
            assert_eq!(handler.job_type(), job_type);

            let outcome = handler.execute(JobContext::new(test_job(job_type, None))).await;
            assert!(matches!(outcome, Outcome::Success(JsonValue::Null)));
        }
    }
}
