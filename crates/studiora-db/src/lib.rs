//! # studiora-db
//!
//! PostgreSQL storage layer for the studiora job system.
//!
//! This crate provides:
//! - Connection pool management
//! - The tenant context gate (`TenantContext`) binding transactions to a
//!   single tenant via `app.tenant_id` and row-level security
//! - The durable job tracker (`PgJobStore`)
//! - The durable queue entry store (`PgQueueStore`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use studiora_core::{JobStore, JobType};
//! use studiora_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/studiora").await?;
//!
//!     let job_id = db
//!         .jobs
//!         .create(tenant_id, JobType::MaterialUpload, payload)
//!         .await?;
//!
//!     println!("Created job: {}", job_id);
//!     Ok(())
//! }
//! ```

pub mod jobs;
pub mod pool;
pub mod queue_store;
pub mod tenant;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use studiora_core::*;

pub use jobs::PgJobStore;
pub use pool::{log_metrics, PoolConfig};
pub use queue_store::PgQueueStore;
pub use tenant::TenantContext;

use std::sync::Arc;

/// Combined database context with all stores.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Durable job tracker.
    pub jobs: Arc<PgJobStore>,
    /// Durable queue entry store.
    pub queue: Arc<PgQueueStore>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            queue: Arc::new(PgQueueStore::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL,
    /// with pool settings taken from the environment.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::from_env()).await
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = config.connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Create a tenant-scoped database context.
    ///
    /// All operations executed through the returned context run inside a
    /// transaction with `app.tenant_id` bound to the given tenant.
    pub fn for_tenant(&self, tenant_id: uuid::Uuid) -> TenantContext {
        TenantContext::new(self.pool.clone(), tenant_id)
    }
}
