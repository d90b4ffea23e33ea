use async_trait::async_trait;
use chrono::Utc;
use conductor_core::{
    models::{InventorySource, TemplateKind, UnifiedTemplate},
    ConductorError, ConductorResult, TemplateRepository,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use super::{decode, encode, to_millis};

pub struct SqliteTemplateRepository {
    pool: SqlitePool,
}

impl SqliteTemplateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_template(row: &SqliteRow) -> ConductorResult<UnifiedTemplate> {
        let mut template: UnifiedTemplate = decode(row)?;
        template.set_id(row.try_get("id")?);
        Ok(template)
    }
}

#[async_trait]
impl TemplateRepository for SqliteTemplateRepository {
    #[instrument(skip(self, template), fields(kind = template.kind().as_str(), name = %template.name()))]
    async fn create(&self, template: &UnifiedTemplate) -> ConductorResult<UnifiedTemplate> {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO templates (kind, name, active, inventory_id, project_id, data)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(template.kind().as_str())
        .bind(template.name())
        .bind(template.is_active())
        .bind(template.inventory_id())
        .bind(template_project_column(template))
        .bind(encode(template)?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        debug!("创建模板: {} ({})", template.name(), id);
        let mut created = template.clone();
        created.set_id(id);
        Ok(created)
    }

    async fn update(&self, template: &UnifiedTemplate) -> ConductorResult<()> {
        let deactivated_at = (!template.is_active()).then(|| to_millis(Utc::now()));
        let result = sqlx::query(
            r#"
            UPDATE templates
            SET name = ?, active = ?, inventory_id = ?, project_id = ?,
                deactivated_at = CASE WHEN ? THEN NULL ELSE COALESCE(deactivated_at, ?) END,
                data = ?
            WHERE id = ? AND kind = ?
            "#,
        )
        .bind(template.name())
        .bind(template.is_active())
        .bind(template.inventory_id())
        .bind(template_project_column(template))
        .bind(template.is_active())
        .bind(deactivated_at)
        .bind(encode(template)?)
        .bind(template.id())
        .bind(template.kind().as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::not_found("模板", template.id()));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<UnifiedTemplate>> {
        let row = sqlx::query("SELECT id, data FROM templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_template).transpose()
    }

    async fn list_inventory_sources(
        &self,
        inventory_id: i64,
    ) -> ConductorResult<Vec<InventorySource>> {
        let rows = sqlx::query(
            "SELECT id, data FROM templates WHERE kind = 'inventory_source' AND inventory_id = ? AND active = 1 ORDER BY id",
        )
        .bind(inventory_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .filter_map(|row| match Self::row_to_template(row) {
                Ok(UnifiedTemplate::InventorySource(source)) => Some(Ok(source)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
            .collect()
    }

    async fn list_by_kind(&self, kind: TemplateKind) -> ConductorResult<Vec<UnifiedTemplate>> {
        let rows =
            sqlx::query("SELECT id, data FROM templates WHERE kind = ? AND active = 1 ORDER BY id")
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::row_to_template).collect()
    }
}

/// 项目本身不填 project_id 列，只有作业模板引用项目
fn template_project_column(template: &UnifiedTemplate) -> Option<i64> {
    match template {
        UnifiedTemplate::JobTemplate(t) => t.project_id,
        _ => None,
    }
}
