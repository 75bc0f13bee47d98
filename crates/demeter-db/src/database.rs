use demeter_core::HarvestError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::job_repository::HarvestJobRepository;
use crate::status_repository::IngestionStatusRepository;

/// Owns the connection pool, runs migrations, and vends repositories.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, HarvestError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| HarvestError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Connects without touching the server; the first query opens a
    /// connection. Lets callers probe a backend that is still starting.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, HarvestError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(&config.url)
            .map_err(|e| HarvestError::Configuration(format!("Invalid DATABASE_URL: {e}")))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), HarvestError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| HarvestError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn job_repo(&self) -> HarvestJobRepository {
        HarvestJobRepository::new(self.pool.clone())
    }

    pub fn status_repo(&self) -> IngestionStatusRepository {
        IngestionStatusRepository::new(self.pool.clone())
    }
}
