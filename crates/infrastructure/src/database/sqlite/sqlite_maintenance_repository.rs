use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{ConductorResult, MaintenanceRepository};
use sqlx::SqlitePool;
use tracing::{info, instrument};

use super::to_millis;

/// 逻辑删除后物理清理的表，按依赖顺序排列
const PURGE_TABLES: &[&str] = &[
    "hosts",
    "inventory_groups",
    "templates",
    "credentials",
    "inventories",
];

pub struct SqliteMaintenanceRepository {
    pool: SqlitePool,
}

impl SqliteMaintenanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MaintenanceRepository for SqliteMaintenanceRepository {
    #[instrument(skip(self))]
    async fn delete_jobs_finished_before(&self, cutoff: DateTime<Utc>) -> ConductorResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE finished_at IS NOT NULL AND finished_at < ?",
        )
        .bind(to_millis(cutoff))
        .execute(&self.pool)
        .await?;

        info!("清理历史作业 {} 条", result.rows_affected());
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete_activity_before(&self, cutoff: DateTime<Utc>) -> ConductorResult<u64> {
        let result = sqlx::query("DELETE FROM activity_stream WHERE timestamp < ?")
            .bind(to_millis(cutoff))
            .execute(&self.pool)
            .await?;

        info!("清理活动流 {} 条", result.rows_affected());
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn purge_inactive(&self, cutoff: DateTime<Utc>) -> ConductorResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for table in PURGE_TABLES {
            let sql = format!(
                "DELETE FROM {table} WHERE active = 0 AND deactivated_at IS NOT NULL AND deactivated_at < ?"
            );
            removed += sqlx::query(&sql)
                .bind(to_millis(cutoff))
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        info!("清理已停用对象 {} 个", removed);
        Ok(removed)
    }
}
