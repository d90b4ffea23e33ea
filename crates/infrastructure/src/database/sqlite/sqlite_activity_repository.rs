use async_trait::async_trait;
use conductor_core::{models::ActivityEntry, ActivityStreamRepository, ConductorResult};
use sqlx::{Row, SqlitePool};

use super::{decode, encode, to_millis};

pub struct SqliteActivityStreamRepository {
    pool: SqlitePool,
}

impl SqliteActivityStreamRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityStreamRepository for SqliteActivityStreamRepository {
    async fn record(&self, entry: &ActivityEntry) -> ConductorResult<ActivityEntry> {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO activity_stream (operation, object_type, object_id, timestamp, data)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(entry.operation.as_str())
        .bind(&entry.object_type)
        .bind(entry.object_id)
        .bind(to_millis(entry.timestamp))
        .bind(encode(entry)?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        Ok(ActivityEntry {
            id,
            ..entry.clone()
        })
    }

    async fn list_for_object(
        &self,
        object_type: &str,
        object_id: i64,
    ) -> ConductorResult<Vec<ActivityEntry>> {
        let rows = sqlx::query(
            "SELECT id, data FROM activity_stream WHERE object_type = ? AND object_id = ? ORDER BY id",
        )
        .bind(object_type)
        .bind(object_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let entry: ActivityEntry = decode(row)?;
                Ok(ActivityEntry {
                    id: row.try_get("id")?,
                    ..entry
                })
            })
            .collect()
    }
}
