//! Job tracker store implementation.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use studiora_core::{
    new_v7, Error, Job, JobStatus, JobStatusSnapshot, JobStore, JobType, ListJobsRequest, Result,
};

use crate::tenant::TenantContext;

/// PostgreSQL implementation of the job tracker.
///
/// Every operation runs through a [`TenantContext`] transaction, so row-level
/// security on the `jobs` table applies on top of the explicit `tenant_id`
/// predicates below. Terminal finality is enforced in SQL: completion and
/// failure updates carry `status IN ('queued', 'processing')` guards, which
/// turns a late write from a stale worker into a zero-row no-op.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Create a new PgJobStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn ctx(&self, tenant_id: Uuid) -> TenantContext {
        TenantContext::new(self.pool.clone(), tenant_id)
    }

    /// Convert string from database to JobType.
    fn str_to_job_type(s: &str) -> JobType {
        s.parse().unwrap_or(JobType::MaterialUpload)
    }

    /// Convert string from database to JobStatus.
    fn str_to_job_status(s: &str) -> JobStatus {
        s.parse().unwrap_or(JobStatus::Queued)
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Job {
        Job {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            job_type: Self::str_to_job_type(row.get("job_type")),
            status: Self::str_to_job_status(row.get("status")),
            payload: row.get("payload"),
            result: row.get("result"),
            error_message: row.get("error_message"),
            progress_percent: row.get("progress_percent"),
            progress_metadata: row.get("progress_metadata"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        }
    }
}

const JOB_COLUMNS: &str = "id, tenant_id, job_type, status, payload, result, error_message, \
     progress_percent, progress_metadata, created_at, started_at, completed_at";

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, tenant_id: Uuid, job_type: JobType, payload: JsonValue) -> Result<Uuid> {
        let job_id = new_v7();
        let now = Utc::now();

        self.ctx(tenant_id)
            .execute(move |tx| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO jobs (id, tenant_id, job_type, status, payload, progress_percent, created_at)
                         VALUES ($1, $2, $3, 'queued', $4, 0, $5)",
                    )
                    .bind(job_id)
                    .bind(tenant_id)
                    .bind(job_type.as_str())
                    .bind(&payload)
                    .bind(now)
                    .execute(&mut **tx)
                    .await
                    .map_err(Error::Database)?;
                    Ok(job_id)
                })
            })
            .await
    }

    async fn mark_started(&self, tenant_id: Uuid, job_id: Uuid) -> Result<()> {
        let now = Utc::now();

        self.ctx(tenant_id)
            .execute(move |tx| {
                Box::pin(async move {
                    sqlx::query(
                        "UPDATE jobs
                         SET status = 'processing', started_at = COALESCE(started_at, $1)
                         WHERE id = $2 AND tenant_id = $3
                           AND status IN ('queued', 'processing')",
                    )
                    .bind(now)
                    .bind(job_id)
                    .bind(tenant_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(Error::Database)?;
                    Ok(())
                })
            })
            .await
    }

    async fn update_progress(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        percent: i32,
        metadata: Option<JsonValue>,
    ) -> Result<()> {
        let percent = percent.clamp(0, 100);

        self.ctx(tenant_id)
            .execute(move |tx| {
                Box::pin(async move {
                    // GREATEST keeps progress monotone even when deliveries
                    // race; || merges metadata keys instead of replacing.
                    sqlx::query(
                        "UPDATE jobs
                         SET progress_percent = GREATEST(progress_percent, $1),
                             progress_metadata = COALESCE(progress_metadata, '{}'::jsonb)
                                 || COALESCE($2, '{}'::jsonb)
                         WHERE id = $3 AND tenant_id = $4
                           AND status IN ('queued', 'processing')",
                    )
                    .bind(percent)
                    .bind(&metadata)
                    .bind(job_id)
                    .bind(tenant_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(Error::Database)?;
                    Ok(())
                })
            })
            .await
    }

    async fn complete(&self, tenant_id: Uuid, job_id: Uuid, result: JsonValue) -> Result<()> {
        let now = Utc::now();

        self.ctx(tenant_id)
            .execute(move |tx| {
                Box::pin(async move {
                    sqlx::query(
                        "UPDATE jobs
                         SET status = 'completed', result = $1, progress_percent = 100,
                             completed_at = $2
                         WHERE id = $3 AND tenant_id = $4
                           AND status IN ('queued', 'processing')",
                    )
                    .bind(&result)
                    .bind(now)
                    .bind(job_id)
                    .bind(tenant_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(Error::Database)?;
                    Ok(())
                })
            })
            .await
    }

    async fn fail(&self, tenant_id: Uuid, job_id: Uuid, error: &str) -> Result<()> {
        let now = Utc::now();
        let error = error.to_string();

        self.ctx(tenant_id)
            .execute(move |tx| {
                Box::pin(async move {
                    sqlx::query(
                        "UPDATE jobs
                         SET status = 'failed', error_message = $1, completed_at = $2
                         WHERE id = $3 AND tenant_id = $4
                           AND status IN ('queued', 'processing')",
                    )
                    .bind(&error)
                    .bind(now)
                    .bind(job_id)
                    .bind(tenant_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(Error::Database)?;
                    Ok(())
                })
            })
            .await
    }

    async fn get(&self, tenant_id: Uuid, job_id: Uuid) -> Result<Option<Job>> {
        self.ctx(tenant_id)
            .query(move |tx| {
                Box::pin(async move {
                    let sql =
                        format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND tenant_id = $2");
                    let row = sqlx::query(&sql)
                        .bind(job_id)
                        .bind(tenant_id)
                        .fetch_optional(&mut **tx)
                        .await
                        .map_err(Error::Database)?;

                    Ok(row.map(Self::parse_job_row))
                })
            })
            .await
    }

    async fn list(&self, tenant_id: Uuid, req: ListJobsRequest) -> Result<Vec<Job>> {
        let limit = req
            .limit
            .unwrap_or(studiora_core::defaults::PAGE_LIMIT)
            .clamp(1, 500);
        let offset = req.offset.unwrap_or(studiora_core::defaults::PAGE_OFFSET).max(0);

        self.ctx(tenant_id)
            .query(move |tx| {
                Box::pin(async move {
                    let mut conditions = vec!["tenant_id = $1".to_string()];
                    let mut param_idx = 2;

                    if req.job_type.is_some() {
                        conditions.push(format!("job_type = ${param_idx}"));
                        param_idx += 1;
                    }
                    if req.status.is_some() {
                        conditions.push(format!("status = ${param_idx}"));
                        param_idx += 1;
                    }

                    let query = format!(
                        "SELECT {JOB_COLUMNS} FROM jobs
                         WHERE {}
                         ORDER BY created_at DESC, id DESC
                         LIMIT ${} OFFSET ${}",
                        conditions.join(" AND "),
                        param_idx,
                        param_idx + 1
                    );

                    let mut q = sqlx::query(&query).bind(tenant_id);
                    if let Some(jt) = req.job_type {
                        q = q.bind(jt.as_str());
                    }
                    if let Some(status) = req.status {
                        q = q.bind(status.as_str());
                    }
                    q = q.bind(limit).bind(offset);

                    let rows = q
                        .fetch_all(&mut **tx)
                        .await
                        .map_err(Error::Database)?;

                    Ok(rows.into_iter().map(Self::parse_job_row).collect())
                })
            })
            .await
    }

    async fn poll_many(&self, tenant_id: Uuid, ids: &[Uuid]) -> Result<Vec<JobStatusSnapshot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids
            .iter()
            .copied()
            .take(studiora_core::defaults::POLL_BATCH_MAX)
            .collect();

        self.ctx(tenant_id)
            .query(move |tx| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        "SELECT id, status, progress_percent, error_message
                         FROM jobs
                         WHERE tenant_id = $1 AND id = ANY($2)
                         ORDER BY id",
                    )
                    .bind(tenant_id)
                    .bind(&ids)
                    .fetch_all(&mut **tx)
                    .await
                    .map_err(Error::Database)?;

                    Ok(rows
                        .into_iter()
                        .map(|row| JobStatusSnapshot {
                            id: row.get("id"),
                            status: Self::str_to_job_status(row.get("status")),
                            progress_percent: row.get("progress_percent"),
                            error_message: row.get("error_message"),
                        })
                        .collect())
                })
            })
            .await
    }
}
