//! PostgreSQL pool for the sync loop and the ledger workers.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, instrument};

use custos_core::error::{StorageError, StorageResult};

/// Supervised tasks that may hold a connection at once: the sync loop,
/// the deposit worker, the four ledger poll workers and the cache refresh.
const ENGINE_TASKS: u32 = 7;

/// Pool settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Every task holds at most one ledger transaction at a time, plus
    /// short reads between ticks.
    pub max_connections: u32,
    /// How long a task waits for a connection before its attempt fails
    /// with a retryable error.
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    /// Pool sized for every engine task with one spare connection each.
    pub fn for_sync(url: &str) -> Self {
        Self {
            url: url.to_string(),
            max_connections: ENGINE_TASKS * 2,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection pool shared by every repository.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip_all, fields(max_conn = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        debug!("Connection pool created");
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the header log, registry and ledger schema.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::MigrationError(e.to_string()))?;
        debug!("Migrations completed");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
