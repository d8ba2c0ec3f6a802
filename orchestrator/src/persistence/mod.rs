mod change;
mod deployment;
mod environment;
mod project;
mod schema;
mod service;

use sqlx::SqlitePool;
use tracing::instrument;

use crate::error::Result;

pub use change::PendingChange;
pub use deployment::DeploymentRow;
pub use environment::EnvironmentRow;
pub use project::ProjectRow;
pub use service::ServiceRow;

/// sqlx-backed persistence over a single SQLite file. Every table is created
/// with `CREATE TABLE IF NOT EXISTS` on connect rather than shipping
/// migrations.
#[derive(Clone)]
pub struct Persistence {
    pool: SqlitePool,
}

impl Persistence {
    #[instrument]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        let persistence = Self { pool };
        persistence.init_schema().await?;
        Ok(persistence)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(schema::SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquires and immediately releases a connection. sqlx drops any
    /// connection that fails its liveness test on acquire, so a periodic
    /// ping is enough to flush connections a worker has been idly holding
    /// onto since its last tick.
    pub async fn close_stale_connections(&self) -> Result<()> {
        drop(self.pool.acquire().await?);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn test_persistence() -> Persistence {
    Persistence::connect("sqlite::memory:").await.expect("in-memory sqlite connects")
}
