use async_trait::async_trait;
use conductor_core::{models::Schedule, ConductorError, ConductorResult, ScheduleRepository};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::instrument;

use super::{decode, encode};

pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_schedule(row: &SqliteRow) -> ConductorResult<Schedule> {
        let schedule: Schedule = decode(row)?;
        Ok(Schedule {
            id: row.try_get("id")?,
            ..schedule
        })
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    #[instrument(skip(self, schedule), fields(name = %schedule.name, template_id = schedule.template_id))]
    async fn create(&self, schedule: &Schedule) -> ConductorResult<Schedule> {
        let id: i64 = sqlx::query(
            "INSERT INTO schedules (template_id, enabled, active, data) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(schedule.template_id)
        .bind(schedule.enabled)
        .bind(schedule.active)
        .bind(encode(schedule)?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        Ok(Schedule {
            id,
            ..schedule.clone()
        })
    }

    async fn update(&self, schedule: &Schedule) -> ConductorResult<()> {
        let result = sqlx::query(
            "UPDATE schedules SET template_id = ?, enabled = ?, active = ?, data = ? WHERE id = ?",
        )
        .bind(schedule.template_id)
        .bind(schedule.enabled)
        .bind(schedule.active)
        .bind(encode(schedule)?)
        .bind(schedule.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::not_found("计划", schedule.id));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<Schedule>> {
        let row = sqlx::query("SELECT id, data FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_schedule).transpose()
    }

    async fn list_enabled(&self) -> ConductorResult<Vec<Schedule>> {
        let rows = sqlx::query(
            "SELECT id, data FROM schedules WHERE enabled = 1 AND active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_schedule).collect()
    }
}
