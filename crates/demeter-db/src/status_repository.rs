use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use demeter_core::error::HarvestError;
use demeter_core::models::{IngestionStatus, RunStatus};
use demeter_core::traits::StatusStore;

/// Ingestion status documents in the `ingestion_status` table.
#[derive(Clone)]
pub struct IngestionStatusRepository {
    pool: Pool<Postgres>,
}

impl IngestionStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recent runs of a collection, newest first.
    pub async fn history(
        &self,
        collection_id: u64,
        limit: usize,
    ) -> Result<Vec<IngestionStatus>, HarvestError> {
        let rows = sqlx::query_as::<_, IngestionStatusRow>(
            r#"
            SELECT * FROM ingestion_status
            WHERE collection_id = $1
            ORDER BY start_time DESC
            LIMIT $2
            "#,
        )
        .bind(collection_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HarvestError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct IngestionStatusRow {
    id: Uuid,
    collection_id: i64,
    operator: String,
    status: String,
    data_dir: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    error: Option<String>,
    total_items: Option<i64>,
    total_collections: i32,
}

impl From<IngestionStatusRow> for IngestionStatus {
    fn from(row: IngestionStatusRow) -> Self {
        IngestionStatus {
            id: row.id,
            collection_id: row.collection_id as u64,
            operator: row.operator,
            status: row.status.parse().unwrap_or(RunStatus::Error),
            data_dir: row.data_dir,
            start_time: row.start_time,
            end_time: row.end_time,
            error: row.error,
            total_items: row.total_items.map(|n| n as u64),
            total_collections: row.total_collections as u32,
        }
    }
}

impl StatusStore for IngestionStatusRepository {
    async fn create(&self, status: &IngestionStatus) -> Result<(), HarvestError> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_status
                (id, collection_id, operator, status, data_dir, start_time,
                 end_time, error, total_items, total_collections)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(status.id)
        .bind(status.collection_id as i64)
        .bind(&status.operator)
        .bind(status.status.as_str())
        .bind(&status.data_dir)
        .bind(status.start_time)
        .bind(status.end_time)
        .bind(&status.error)
        .bind(status.total_items.map(|n| n as i64))
        .bind(status.total_collections as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| HarvestError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update(&self, status: &IngestionStatus) -> Result<(), HarvestError> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_status
            SET status = $2, end_time = $3, error = $4, total_items = $5
            WHERE id = $1
            "#,
        )
        .bind(status.id)
        .bind(status.status.as_str())
        .bind(status.end_time)
        .bind(&status.error)
        .bind(status.total_items.map(|n| n as i64))
        .execute(&self.pool)
        .await
        .map_err(|e| HarvestError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(HarvestError::Database(format!(
                "No ingestion status document {}",
                status.id
            )));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<IngestionStatus>, HarvestError> {
        let row = sqlx::query_as::<_, IngestionStatusRow>(
            r#"SELECT * FROM ingestion_status WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarvestError::Database(e.to_string()))?;

        Ok(row.map(Into::into))
    }
}
