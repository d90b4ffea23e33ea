use async_trait::async_trait;
use conductor_core::{models::Credential, ConductorError, ConductorResult, CredentialRepository};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use super::{decode, encode};

/// 凭据仓储，`data` 列中的机密字段均为密文
pub struct SqliteCredentialRepository {
    pool: SqlitePool,
}

impl SqliteCredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for SqliteCredentialRepository {
    #[instrument(skip(self, credential), fields(name = %credential.name, kind = credential.kind.as_str()))]
    async fn create(&self, credential: &Credential) -> ConductorResult<Credential> {
        let id: i64 = sqlx::query(
            "INSERT INTO credentials (name, kind, active, data) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(&credential.name)
        .bind(credential.kind.as_str())
        .bind(credential.active)
        .bind(encode(credential)?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        debug!("创建凭据: {} ({})", credential.name, id);
        Ok(Credential {
            id,
            ..credential.clone()
        })
    }

    async fn update(&self, credential: &Credential) -> ConductorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET name = ?, kind = ?, active = ?, data = ?,
                deactivated_at = CASE WHEN ? THEN NULL ELSE COALESCE(deactivated_at, ?) END
            WHERE id = ?
            "#,
        )
        .bind(&credential.name)
        .bind(credential.kind.as_str())
        .bind(credential.active)
        .bind(encode(credential)?)
        .bind(credential.active)
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(credential.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::not_found("凭据", credential.id));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<Credential>> {
        let row = sqlx::query("SELECT id, data FROM credentials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let credential: Credential = decode(&row)?;
                Ok(Some(Credential {
                    id: row.try_get("id")?,
                    ..credential
                }))
            }
            None => Ok(None),
        }
    }
}
