//! Durable queue entry store.
//!
//! Delivery bookkeeping lives in the `queue_entries` table, owned by the
//! queue alone. Tenant code never reads it; job visibility goes through the
//! `jobs` table. Claiming uses `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never double-claim, and a claim pushes `scheduled_at` past a
//! lease so an entry whose worker crashed becomes claimable again. This is
//! what makes delivery at-least-once rather than at-most-once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tokio::sync::Notify;
use uuid::Uuid;

use studiora_core::{
    new_v7, Disposition, Error, QueueEntry, QueueName, QueuePolicy, QueueStore, Result,
};

/// PostgreSQL store for durable queue entries.
pub struct PgQueueStore {
    pool: PgPool,
    /// Notify handle for event-driven worker wake on enqueue.
    notify: Arc<Notify>,
}

impl PgQueueStore {
    /// Create a new PgQueueStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    fn parse_entry_row(row: sqlx::postgres::PgRow) -> QueueEntry {
        let queue: String = row.get("queue");
        QueueEntry {
            id: row.get("id"),
            job_id: row.get("job_id"),
            tenant_id: row.get("tenant_id"),
            queue: queue.parse().unwrap_or(QueueName::Upload),
            attempt: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            scheduled_at: row.get("scheduled_at"),
        }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        queue: QueueName,
        policy: QueuePolicy,
    ) -> Result<Uuid> {
        let entry_id = new_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO queue_entries
                 (id, job_id, tenant_id, queue, state, attempts, max_attempts, scheduled_at, created_at)
             VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $6)",
        )
        .bind(entry_id)
        .bind(job_id)
        .bind(tenant_id)
        .bind(queue.as_str())
        .bind(policy.max_attempts)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_waiters();
        Ok(entry_id)
    }

    async fn claim(&self, queue: QueueName, lease: Duration) -> Result<Option<QueueEntry>> {
        let lease_until = Utc::now()
            + chrono::Duration::from_std(lease)
                .map_err(|e| Error::Config(format!("lease out of range: {e}")))?;

        let row = sqlx::query(
            "UPDATE queue_entries
             SET attempts = attempts + 1, scheduled_at = $2
             WHERE id = (
                 SELECT id FROM queue_entries
                 WHERE queue = $1 AND state = 'pending'
                   AND scheduled_at <= now()
                   AND attempts < max_attempts
                 ORDER BY scheduled_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, job_id, tenant_id, queue, attempts, max_attempts, scheduled_at",
        )
        .bind(queue.as_str())
        .bind(lease_until)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_entry_row))
    }

    /// `claim` never returns exhausted entries (it requires attempts below
    /// the budget), so without this sweep a crashed final attempt would sit
    /// pending forever.
    async fn sweep_exhausted(&self, queue: QueueName) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(
            "UPDATE queue_entries
             SET state = 'dead'
             WHERE queue = $1 AND state = 'pending'
               AND scheduled_at <= now()
               AND attempts >= max_attempts
             RETURNING id, job_id, tenant_id, queue, attempts, max_attempts, scheduled_at",
        )
        .bind(queue.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_entry_row).collect())
    }

    async fn ack(&self, entry_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM queue_entries WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn retry_or_bury(&self, entry_id: Uuid, backoff: Duration) -> Result<Disposition> {
        let next_at = Utc::now()
            + chrono::Duration::from_std(backoff)
                .map_err(|e| Error::Config(format!("backoff out of range: {e}")))?;

        let requeued = sqlx::query_scalar::<_, Uuid>(
            "UPDATE queue_entries
             SET scheduled_at = $2
             WHERE id = $1 AND state = 'pending' AND attempts < max_attempts
             RETURNING id",
        )
        .bind(entry_id)
        .bind(next_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if requeued.is_some() {
            self.notify.notify_waiters();
            return Ok(Disposition::Requeued { next_at });
        }

        sqlx::query("UPDATE queue_entries SET state = 'dead' WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(Disposition::Dead)
    }

    async fn depth(&self, queue: QueueName) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_entries WHERE queue = $1 AND state = 'pending'",
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn dead_count(&self, queue: QueueName) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_entries WHERE queue = $1 AND state = 'dead'",
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    fn queue_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}
