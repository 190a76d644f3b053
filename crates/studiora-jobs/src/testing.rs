//! In-memory store implementations for tests.
//!
//! These uphold the same contracts as the PostgreSQL stores (terminal
//! finality, monotone progress, tenant scoping, exclusive claims with
//! leases) so worker and service tests run without a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use uuid::Uuid;

use studiora_core::{
    new_v7, Disposition, Job, JobStatus, JobStatusSnapshot, JobStore, JobType, ListJobsRequest,
    QueueEntry, QueueName, QueuePolicy, QueueStore, Result,
};

/// In-memory job tracker.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a job without tenant scoping, for test assertions only.
    pub fn peek(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&job_id).cloned()
    }
}

fn merge_metadata(existing: &mut Option<JsonValue>, incoming: Option<JsonValue>) {
    let Some(incoming) = incoming else { return };
    match existing {
        Some(JsonValue::Object(base)) => {
            if let JsonValue::Object(map) = incoming {
                for (k, v) in map {
                    base.insert(k, v);
                }
            } else {
                *existing = Some(incoming);
            }
        }
        _ => *existing = Some(incoming),
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        tenant_id: Uuid,
        job_type: JobType,
        payload: JsonValue,
    ) -> Result<Uuid> {
        let id = new_v7();
        let job = Job {
            id,
            tenant_id,
            job_type,
            status: JobStatus::Queued,
            payload: Some(payload),
            result: None,
            error_message: None,
            progress_percent: 0,
            progress_metadata: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.jobs.lock().unwrap().insert(id, job);
        Ok(id)
    }

    async fn mark_started(&self, tenant_id: Uuid, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.tenant_id == tenant_id && !job.status.is_terminal() {
                job.status = JobStatus::Processing;
                job.started_at.get_or_insert_with(Utc::now);
            }
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        percent: i32,
        metadata: Option<JsonValue>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.tenant_id == tenant_id && !job.status.is_terminal() {
                job.progress_percent = job.progress_percent.max(percent.clamp(0, 100));
                merge_metadata(&mut job.progress_metadata, metadata);
            }
        }
        Ok(())
    }

    async fn complete(&self, tenant_id: Uuid, job_id: Uuid, result: JsonValue) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.tenant_id == tenant_id && !job.status.is_terminal() {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.progress_percent = 100;
                job.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn fail(&self, tenant_id: Uuid, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.tenant_id == tenant_id && !job.status.is_terminal() {
                job.status = JobStatus::Failed;
                job.error_message = Some(error.to_string());
                job.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn get(&self, tenant_id: Uuid, job_id: Uuid) -> Result<Option<Job>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .get(&job_id)
            .filter(|j| j.tenant_id == tenant_id)
            .cloned())
    }

    async fn list(&self, tenant_id: Uuid, req: ListJobsRequest) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .filter(|j| req.job_type.map_or(true, |t| j.job_type == t))
            .filter(|j| req.status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let offset = req.offset.unwrap_or(0).max(0) as usize;
        let limit = req
            .limit
            .unwrap_or(studiora_core::defaults::PAGE_LIMIT)
            .clamp(1, 500) as usize;
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn poll_many(&self, tenant_id: Uuid, ids: &[Uuid]) -> Result<Vec<JobStatusSnapshot>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(ids
            .iter()
            .take(studiora_core::defaults::POLL_BATCH_MAX)
            .filter_map(|id| jobs.get(id))
            .filter(|j| j.tenant_id == tenant_id)
            .map(|j| JobStatusSnapshot {
                id: j.id,
                status: j.status,
                progress_percent: j.progress_percent,
                error_message: j.error_message.clone(),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    Dead,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    id: Uuid,
    job_id: Uuid,
    tenant_id: Uuid,
    queue: QueueName,
    state: EntryState,
    attempts: i32,
    max_attempts: i32,
    scheduled_at: DateTime<Utc>,
}

/// In-memory durable queue entry store.
#[derive(Default)]
pub struct MemoryQueueStore {
    entries: Mutex<Vec<MemoryEntry>>,
    notify: Arc<Notify>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1000))
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        queue: QueueName,
        policy: QueuePolicy,
    ) -> Result<Uuid> {
        let id = new_v7();
        self.entries.lock().unwrap().push(MemoryEntry {
            id,
            job_id,
            tenant_id,
            queue,
            state: EntryState::Pending,
            attempts: 0,
            max_attempts: policy.max_attempts,
            scheduled_at: Utc::now(),
        });
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn claim(&self, queue: QueueName, lease: Duration) -> Result<Option<QueueEntry>> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let due = entries
            .iter_mut()
            .filter(|e| {
                e.queue == queue
                    && e.state == EntryState::Pending
                    && e.scheduled_at <= now
                    && e.attempts < e.max_attempts
            })
            .min_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));

        Ok(due.map(|entry| {
            entry.attempts += 1;
            entry.scheduled_at = now + chrono_duration(lease);
            QueueEntry {
                id: entry.id,
                job_id: entry.job_id,
                tenant_id: entry.tenant_id,
                queue: entry.queue,
                attempt: entry.attempts,
                max_attempts: entry.max_attempts,
                scheduled_at: entry.scheduled_at,
            }
        }))
    }

    async fn sweep_exhausted(&self, queue: QueueName) -> Result<Vec<QueueEntry>> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let mut swept = Vec::new();
        for entry in entries.iter_mut() {
            if entry.queue == queue
                && entry.state == EntryState::Pending
                && entry.scheduled_at <= now
                && entry.attempts >= entry.max_attempts
            {
                entry.state = EntryState::Dead;
                swept.push(QueueEntry {
                    id: entry.id,
                    job_id: entry.job_id,
                    tenant_id: entry.tenant_id,
                    queue: entry.queue,
                    attempt: entry.attempts,
                    max_attempts: entry.max_attempts,
                    scheduled_at: entry.scheduled_at,
                });
            }
        }
        Ok(swept)
    }

    async fn ack(&self, entry_id: Uuid) -> Result<()> {
        self.entries.lock().unwrap().retain(|e| e.id != entry_id);
        Ok(())
    }

    async fn retry_or_bury(&self, entry_id: Uuid, backoff: Duration) -> Result<Disposition> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.iter_mut().find(|e| e.id == entry_id) else {
            return Ok(Disposition::Dead);
        };
        if entry.attempts < entry.max_attempts {
            let next_at = Utc::now() + chrono_duration(backoff);
            entry.scheduled_at = next_at;
            self.notify.notify_waiters();
            Ok(Disposition::Requeued { next_at })
        } else {
            entry.state = EntryState::Dead;
            Ok(Disposition::Dead)
        }
    }

    async fn depth(&self, queue: QueueName) -> Result<i64> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| e.queue == queue && e.state == EntryState::Pending)
            .count() as i64)
    }

    async fn dead_count(&self, queue: QueueName) -> Result<i64> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| e.queue == queue && e.state == EntryState::Dead)
            .count() as i64)
    }

    fn queue_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_job_store_terminal_finality() {
        let store = MemoryJobStore::new();
        let tenant = Uuid::new_v4();
        let id = store
            .create(tenant, JobType::MaterialUpload, json!({}))
            .await
            .unwrap();

        store.complete(tenant, id, json!({"ok": true})).await.unwrap();
        store.complete(tenant, id, json!({"ok": false})).await.unwrap();
        store.fail(tenant, id, "late failure").await.unwrap();
        store.update_progress(tenant, id, 10, None).await.unwrap();

        let job = store.get(tenant, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        // The first result stands; the second complete changed nothing.
        assert_eq!(job.result, Some(json!({"ok": true})));
        assert!(job.error_message.is_none());
        assert_eq!(job.progress_percent, 100);
    }

    #[tokio::test]
    async fn memory_job_store_progress_is_monotone() {
        let store = MemoryJobStore::new();
        let tenant = Uuid::new_v4();
        let id = store
            .create(tenant, JobType::LessonGeneration, json!({}))
            .await
            .unwrap();

        store.update_progress(tenant, id, 60, Some(json!({"a": 1}))).await.unwrap();
        store.update_progress(tenant, id, 30, Some(json!({"b": 2}))).await.unwrap();

        let job = store.get(tenant, id).await.unwrap().unwrap();
        assert_eq!(job.progress_percent, 60);
        assert_eq!(job.progress_metadata, Some(json!({"a": 1, "b": 2})));
    }

    #[tokio::test]
    async fn memory_job_store_is_tenant_scoped() {
        let store = MemoryJobStore::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let id = store
            .create(owner, JobType::MaterialUpload, json!({}))
            .await
            .unwrap();

        assert!(store.get(other, id).await.unwrap().is_none());
        store.fail(other, id, "nope").await.unwrap();
        let job = store.get(owner, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn memory_queue_claim_is_exclusive_and_leased() {
        let store = MemoryQueueStore::new();
        let tenant = Uuid::new_v4();
        store
            .enqueue(
                tenant,
                Uuid::new_v4(),
                QueueName::Upload,
                QueuePolicy::for_queue(QueueName::Upload),
            )
            .await
            .unwrap();

        let first = store
            .claim(QueueName::Upload, Duration::from_secs(300))
            .await
            .unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().attempt, 1);

        let second = store
            .claim(QueueName::Upload, Duration::from_secs(300))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn memory_queue_buries_after_budget() {
        let store = MemoryQueueStore::new();
        let tenant = Uuid::new_v4();
        let policy = QueuePolicy::for_queue(QueueName::Generation);
        store
            .enqueue(tenant, Uuid::new_v4(), QueueName::Generation, policy)
            .await
            .unwrap();

        for attempt in 1..=policy.max_attempts {
            let entry = store
                .claim(QueueName::Generation, Duration::from_secs(300))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(entry.attempt, attempt);
            let disposition = store
                .retry_or_bury(entry.id, Duration::from_millis(0))
                .await
                .unwrap();
            if attempt < policy.max_attempts {
                assert!(matches!(disposition, Disposition::Requeued { .. }));
            } else {
                assert_eq!(disposition, Disposition::Dead);
            }
        }

        assert_eq!(store.dead_count(QueueName::Generation).await.unwrap(), 1);
        assert!(store
            .claim(QueueName::Generation, Duration::from_secs(300))
            .await
            .unwrap()
            .is_none());
    }
}
