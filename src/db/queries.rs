use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{JobRecord, JobStatus};
use crate::services::store::{ResultStore, StoreError};

/// PostgreSQL-backed result store over the `job_results` table.
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn upsert(&self, record: &JobRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_results (job_id, status, result_url, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_id) DO UPDATE
            SET status = EXCLUDED.status,
                result_url = EXCLUDED.result_url,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.job_id)
        .bind(record.status.as_ref())
        .bind(&record.result_url)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, status, result_url, updated_at
            FROM job_results
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, status, result_url, updated_at
            FROM job_results
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<JobRecord, StoreError> {
    let status: String = row.try_get("status")?;

    Ok(JobRecord {
        job_id: row.try_get("job_id")?,
        status: parse_status(&status)?,
        result_url: row.try_get("result_url")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Unknown status strings are corruption, not a default.
fn parse_status(raw: &str) -> Result<JobStatus, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown job status '{}'", raw)))
}
