//! Connection pool setup and health reporting.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use studiora_core::{Error, Result};

/// Pool sizing and timeouts.
///
/// `from_env` reads the following variables, falling back to the defaults:
///
/// | Variable | Default |
/// |----------|---------|
/// | `DATABASE_MAX_CONNECTIONS` | `10` |
/// | `DATABASE_MIN_CONNECTIONS` | `1` |
/// | `DATABASE_CONNECT_TIMEOUT_SECS` | `30` |
/// | `DATABASE_IDLE_TIMEOUT_SECS` | `600` |
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Acquire timeout; covers both opening a connection and waiting for
    /// a free slot in a saturated pool.
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    /// Connections are recycled after this long regardless of idleness.
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PoolConfig {
    /// Default settings with environment overrides applied.
    pub fn from_env() -> Self {
        let base = Self::default();

        let var = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok());

        Self {
            max_connections: var("DATABASE_MAX_CONNECTIONS")
                .map(|v| (v as u32).max(1))
                .unwrap_or(base.max_connections),
            min_connections: var("DATABASE_MIN_CONNECTIONS")
                .map(|v| v as u32)
                .unwrap_or(base.min_connections),
            connect_timeout: var("DATABASE_CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.connect_timeout),
            idle_timeout: var("DATABASE_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.idle_timeout),
            max_lifetime: base.max_lifetime,
        }
    }

    /// Cap the pool size.
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    /// Open a pool against `database_url` with these settings.
    pub async fn connect(&self, database_url: &str) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.connect_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
            .connect(database_url)
            .await
            .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            connect_timeout_secs = self.connect_timeout.as_secs(),
            "Connected to database"
        );
        Ok(pool)
    }
}

/// Emit a pool health snapshot; warns when every connection is checked out.
pub fn log_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "db",
        pool_size = size,
        pool_idle = idle,
        "Pool health"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            pool_size = size,
            "All pool connections are in use"
        );
    }
}
