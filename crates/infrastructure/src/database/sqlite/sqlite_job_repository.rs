use async_trait::async_trait;
use conductor_core::{
    models::{JobStatus, UnifiedJob},
    ConductorError, ConductorResult, JobRepository,
};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use super::{decode, encode, to_millis};

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 取消标记与标准输出以独立列为准
    fn row_to_job(row: &SqliteRow) -> ConductorResult<UnifiedJob> {
        let job: UnifiedJob = decode(row)?;
        Ok(UnifiedJob {
            id: row.try_get("id")?,
            cancel_flag: row.try_get("cancel_flag")?,
            result_stdout: row.try_get("result_stdout")?,
            ..job
        })
    }

    /// 文档中不保存标准输出
    fn encode_job(job: &UnifiedJob) -> ConductorResult<String> {
        let mut doc = job.clone();
        doc.result_stdout.clear();
        encode(&doc)
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, job), fields(name = %job.name, kind = job.kind().as_str()))]
    async fn create(&self, job: &UnifiedJob) -> ConductorResult<UnifiedJob> {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO jobs (kind, status, template_id, cancel_flag, result_stdout, finished_at, data)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(job.kind().as_str())
        .bind(job.status.as_str())
        .bind(job.template_id)
        .bind(job.cancel_flag)
        .bind(&job.result_stdout)
        .bind(job.finished_at.map(to_millis))
        .bind(Self::encode_job(job)?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        debug!("创建作业: {} ({})", job.name, id);
        Ok(UnifiedJob {
            id,
            ..job.clone()
        })
    }

    #[instrument(skip(self, job), fields(job.id = job.id, status = %job.status))]
    async fn update(&self, job: &UnifiedJob) -> ConductorResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, template_id = ?, finished_at = ?, data = ? WHERE id = ?",
        )
        .bind(job.status.as_str())
        .bind(job.template_id)
        .bind(job.finished_at.map(to_millis))
        .bind(Self::encode_job(job)?)
        .bind(job.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::not_found("作业", job.id));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<UnifiedJob>> {
        let row = sqlx::query(
            "SELECT id, cancel_flag, result_stdout, data FROM jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> ConductorResult<Vec<UnifiedJob>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, cancel_flag, result_stdout, data FROM jobs WHERE status IN (",
        );
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(") ORDER BY id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn request_cancel(&self, id: i64) -> ConductorResult<bool> {
        let result = sqlx::query("UPDATE jobs SET cancel_flag = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_cancel_requested(&self, id: i64) -> ConductorResult<bool> {
        let flag: Option<bool> = sqlx::query("SELECT cancel_flag FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get("cancel_flag"))
            .transpose()?;
        Ok(flag.unwrap_or(false))
    }

    async fn append_stdout(&self, id: i64, text: &str) -> ConductorResult<()> {
        sqlx::query("UPDATE jobs SET result_stdout = result_stdout || ? WHERE id = ?")
            .bind(text)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
