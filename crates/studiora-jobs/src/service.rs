//! Job submission and polling service.
//!
//! The single entry point tenant-facing code uses: admission control,
//! tracker creation, and queue dispatch in one call, plus the read side
//! (get, list, batch poll).

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info};
use uuid::Uuid;

use studiora_core::{
    Error, Job, JobStatusSnapshot, JobStore, JobType, ListJobsRequest, Result,
};
use studiora_limits::RateLimiter;

use crate::queue::JobQueue;

/// Facade over the rate limiter, job tracker, and queue.
#[derive(Clone)]
pub struct JobService {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    limiter: Arc<RateLimiter>,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            jobs,
            queue,
            limiter,
        }
    }

    /// Submit a job: admission check, durable create, dispatch.
    ///
    /// Returns the job id as soon as the job is tracked and dispatched;
    /// everything after that is observed through the job record. A rate
    /// rejection is [`Error::AdmissionRejected`] and creates nothing.
    pub async fn submit(
        &self,
        tenant_id: Uuid,
        job_type: JobType,
        payload: JsonValue,
    ) -> Result<Uuid> {
        let admission = self.limiter.check_admission(tenant_id, job_type).await;
        if !admission.allowed {
            let retry_after_secs = admission
                .retry_after
                .map(|d| d.as_secs())
                .unwrap_or_default();
            info!(
                subsystem = "service",
                %tenant_id,
                job_type = %job_type,
                retry_after_secs,
                "Job submission rejected by rate limiter"
            );
            return Err(Error::AdmissionRejected { retry_after_secs });
        }
        debug!(
            subsystem = "service",
            %tenant_id,
            job_type = %job_type,
            remaining = admission.remaining,
            "Admission granted"
        );

        let job_id = self.jobs.create(tenant_id, job_type, payload).await?;
        self.queue.dispatch(tenant_id, job_id, job_type).await?;

        info!(
            subsystem = "service",
            %tenant_id,
            %job_id,
            job_type = %job_type,
            "Job submitted"
        );
        Ok(job_id)
    }

    /// Fetch one of the tenant's jobs.
    pub async fn get_job(&self, tenant_id: Uuid, job_id: Uuid) -> Result<Option<Job>> {
        self.jobs.get(tenant_id, job_id).await
    }

    /// List the tenant's jobs, newest first.
    pub async fn list_jobs(&self, tenant_id: Uuid, req: ListJobsRequest) -> Result<Vec<Job>> {
        self.jobs.list(tenant_id, req).await
    }

    /// Batch status poll for long-lived UIs.
    pub async fn poll_many(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<JobStatusSnapshot>> {
        self.jobs.poll_many(tenant_id, ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use studiora_core::{JobStatus, QueueName, QueueStore};

    use crate::queue::DurableQueue;
    use crate::testing::{MemoryJobStore, MemoryQueueStore};

    fn service_with_limit(limit: u64) -> (JobService, Arc<MemoryJobStore>, Arc<MemoryQueueStore>) {
        let jobs = Arc::new(MemoryJobStore::new());
        let queue_store = Arc::new(MemoryQueueStore::new());
        let limiter = Arc::new(RateLimiter::in_memory(
            studiora_limits::RateLimitConfig {
                upload_limit: limit,
                generation_limit: limit,
                evaluation_limit: limit,
                ..Default::default()
            },
        ));
        let service = JobService::new(
            jobs.clone(),
            Arc::new(DurableQueue::new(queue_store.clone())),
            limiter,
        );
        (service, jobs, queue_store)
    }

    #[tokio::test]
    async fn submit_creates_queued_job_and_entry() {
        let (service, jobs, queue_store) = service_with_limit(10);
        let tenant = Uuid::new_v4();

        let job_id = service
            .submit(tenant, JobType::MaterialUpload, json!({"material_id": "m1"}))
            .await
            .unwrap();

        let job = jobs.get(tenant, job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress_percent, 0);
        assert_eq!(queue_store.depth(QueueName::Upload).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejected_submission_creates_nothing() {
        let (service, jobs, queue_store) = service_with_limit(1);
        let tenant = Uuid::new_v4();

        service
            .submit(tenant, JobType::LessonGeneration, json!({}))
            .await
            .unwrap();
        let err = service
            .submit(tenant, JobType::LessonGeneration, json!({}))
            .await
            .unwrap_err();

        let Error::AdmissionRejected { retry_after_secs } = err else {
            panic!("expected AdmissionRejected, got {err:?}");
        };
        assert!(retry_after_secs > 0);
        assert_eq!(
            jobs.list(tenant, ListJobsRequest::default()).await.unwrap().len(),
            1
        );
        assert_eq!(queue_store.depth(QueueName::Generation).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn read_side_is_tenant_scoped() {
        let (service, _, _) = service_with_limit(10);
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();

        let job_id = service
            .submit(owner, JobType::CheckInEvaluation, json!({}))
            .await
            .unwrap();

        assert!(service.get_job(other, job_id).await.unwrap().is_none());
        assert!(service
            .poll_many(other, &[job_id])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(service.poll_many(owner, &[job_id]).await.unwrap().len(), 1);
    }
}
