use async_trait::async_trait;
use conductor_core::{
    models::{JobEvent, JobHostSummary},
    ConductorResult, JobEventRepository,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use super::{decode, encode};

pub struct SqliteJobEventRepository {
    pool: SqlitePool,
}

impl SqliteJobEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &SqliteRow) -> ConductorResult<JobEvent> {
        let event: JobEvent = decode(row)?;
        Ok(JobEvent {
            id: row.try_get("id")?,
            parent_id: row.try_get("parent_id")?,
            failed: row.try_get("failed")?,
            changed: row.try_get("changed")?,
            ..event
        })
    }

    fn row_to_summary(row: &SqliteRow) -> ConductorResult<JobHostSummary> {
        let summary: JobHostSummary = decode(row)?;
        Ok(JobHostSummary {
            id: row.try_get("id")?,
            ..summary
        })
    }
}

#[async_trait]
impl JobEventRepository for SqliteJobEventRepository {
    #[instrument(skip(self, event), fields(job.id = event.job_id, kind = event.kind.as_str()))]
    async fn create_event(&self, event: &JobEvent) -> ConductorResult<JobEvent> {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO job_events (job_id, counter, kind, parent_id, failed, changed, data)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(event.job_id)
        .bind(event.counter)
        .bind(event.kind.as_str())
        .bind(event.parent_id)
        .bind(event.failed)
        .bind(event.changed)
        .bind(encode(event)?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        Ok(JobEvent {
            id,
            ..event.clone()
        })
    }

    async fn list_events(&self, job_id: i64) -> ConductorResult<Vec<JobEvent>> {
        let rows = sqlx::query(
            "SELECT id, parent_id, failed, changed, data FROM job_events WHERE job_id = ? ORDER BY counter, id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn update_event_flags(&self, updates: &[(i64, bool, bool)]) -> ConductorResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (id, failed, changed) in updates {
            sqlx::query("UPDATE job_events SET failed = ?, changed = ? WHERE id = ?")
                .bind(failed)
                .bind(changed)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!("更新 {} 条事件标记", updates.len());
        Ok(())
    }

    async fn last_counter(&self, job_id: i64) -> ConductorResult<i64> {
        let counter: i64 =
            sqlx::query("SELECT COALESCE(MAX(counter), 0) FROM job_events WHERE job_id = ?")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await?
                .try_get(0)?;
        Ok(counter)
    }

    #[instrument(skip(self, summary), fields(job.id = summary.job_id, host = %summary.host_name))]
    async fn upsert_host_summary(
        &self,
        summary: &JobHostSummary,
    ) -> ConductorResult<JobHostSummary> {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO job_host_summaries (job_id, host_id, host_name, failed, data)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (job_id, host_name) DO UPDATE SET
                host_id = excluded.host_id,
                failed = excluded.failed,
                data = excluded.data
            RETURNING id
            "#,
        )
        .bind(summary.job_id)
        .bind(summary.host_id)
        .bind(&summary.host_name)
        .bind(summary.failed)
        .bind(encode(summary)?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        Ok(JobHostSummary {
            id,
            ..summary.clone()
        })
    }

    async fn list_host_summaries(&self, job_id: i64) -> ConductorResult<Vec<JobHostSummary>> {
        let rows = sqlx::query(
            "SELECT id, data FROM job_host_summaries WHERE job_id = ? ORDER BY host_name",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_summary).collect()
    }
}
