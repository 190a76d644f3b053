//! Tenant-scoped database operations.
//!
//! Provides a `TenantContext` abstraction that binds every statement in a
//! transaction to a single tenant by setting the `app.tenant_id` session
//! variable, which the row-level security policies on tenant-owned tables
//! evaluate.

use std::future::Future;
use std::pin::Pin;

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use studiora_core::{Error, Result};

tokio::task_local! {
    /// Tenant id bound by the innermost active `TenantContext` scope.
    static BOUND_TENANT: Uuid;
}

/// A database context scoped to a single tenant.
///
/// All operations executed through this context run inside a transaction
/// with `app.tenant_id` set via `set_config(..., true)`, so the setting
/// reverts at transaction end and row-level security filters every
/// statement to the tenant's rows.
///
/// Binding is non-reentrant: opening a second tenant scope while one is
/// already active on the current task fails with `Error::TenantViolation`,
/// even for the same tenant. A handler that needs to touch two tenants is
/// a bug, and a nested scope for the same tenant hides exactly that bug.
///
/// # Examples
///
/// ```rust,ignore
/// use studiora_db::{Database, TenantContext};
///
/// let db = Database::connect("postgres://localhost/studiora").await?;
/// let ctx = db.for_tenant(tenant_id);
///
/// let job_id = ctx
///     .execute(|tx| {
///         Box::pin(async move {
///             sqlx::query("INSERT INTO jobs (id, tenant_id, ...) VALUES ($1, $2, ...)")
///                 .bind(id)
///                 .bind(tenant_id)
///                 .execute(&mut **tx)
///                 .await?;
///             Ok(id)
///         })
///     })
///     .await?;
/// ```
#[derive(Clone)]
pub struct TenantContext {
    pool: PgPool,
    tenant_id: Uuid,
}

impl TenantContext {
    /// Create a new TenantContext for the specified tenant.
    pub fn new(pool: PgPool, tenant_id: Uuid) -> Self {
        Self { pool, tenant_id }
    }

    /// Get the tenant id for this context.
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    /// Execute a write operation within a tenant-bound transaction.
    ///
    /// This method:
    /// 1. Rejects the call if the current task already holds a tenant scope
    /// 2. Begins a new transaction
    /// 3. Sets `app.tenant_id` for the transaction via `set_config`
    /// 4. Executes the provided closure with a mutable transaction reference
    /// 5. Commits on success, rolls back on error
    pub async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
            &'a mut Transaction<'_, Postgres>,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        if let Ok(held) = BOUND_TENANT.try_with(|t| *t) {
            return Err(Error::TenantViolation(format!(
                "tenant scope for {} opened while {} is already bound on this task",
                self.tenant_id, held
            )));
        }

        let tenant_id = self.tenant_id;
        BOUND_TENANT
            .scope(tenant_id, async move {
                let mut tx = self.pool.begin().await.map_err(Error::Database)?;

                // set_config with is_local = true scopes the setting to this
                // transaction, so it cannot leak onto a pooled connection.
                sqlx::query("SELECT set_config('app.tenant_id', $1, true)")
                    .bind(tenant_id.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(Error::Database)?;

                let result = f(&mut tx).await?;

                tx.commit().await.map_err(Error::Database)?;

                Ok(result)
            })
            .await
    }

    /// Execute a read-only query within a tenant-bound transaction.
    ///
    /// Identical to `execute` today; kept as a separate entry point so read
    /// paths can later move to a read-only transaction without touching
    /// callers.
    pub async fn query<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
            &'a mut Transaction<'_, Postgres>,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        self.execute(f).await
    }
}

impl std::fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContext")
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Transaction-level behavior is covered by the integration tests in
    // tests/tenant_context_test.rs; here we only exercise the scope guard,
    // which needs no database.

    #[tokio::test]
    async fn nested_scope_is_rejected() {
        let tenant = Uuid::new_v4();
        let result: Result<()> = BOUND_TENANT
            .scope(tenant, async {
                // Any pool works since execute() must fail before touching it.
                let pool = PgPool::connect_lazy("postgres://localhost/unused")
                    .map_err(Error::Database)?;
                let ctx = TenantContext::new(pool, Uuid::new_v4());
                ctx.execute(|_tx| Box::pin(async { Ok(()) })).await
            })
            .await;

        match result {
            Err(Error::TenantViolation(msg)) => {
                assert!(msg.contains(&tenant.to_string()));
            }
            other => panic!("expected TenantViolation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_tenant_nesting_is_also_rejected() {
        let tenant = Uuid::new_v4();
        let result: Result<()> = BOUND_TENANT
            .scope(tenant, async {
                let pool = PgPool::connect_lazy("postgres://localhost/unused")
                    .map_err(Error::Database)?;
                let ctx = TenantContext::new(pool, tenant);
                ctx.execute(|_tx| Box::pin(async { Ok(()) })).await
            })
            .await;

        assert!(matches!(result, Err(Error::TenantViolation(_))));
    }
}
