use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{
    models::{
        ComputedFields, Group, Host, HostState, Inventory, InventorySnapshot, InventorySource,
        SourceState,
    },
    ConductorError, ConductorResult, InventoryRepository,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use super::{conflict_or, decode, deleted_name, encode, to_millis};

pub struct SqliteInventoryRepository {
    pool: SqlitePool,
}

impl SqliteInventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_host(row: &SqliteRow) -> ConductorResult<Host> {
        let host: Host = decode(row)?;
        Ok(Host {
            id: row.try_get("id")?,
            ..host
        })
    }

    fn row_to_group(row: &SqliteRow) -> ConductorResult<Group> {
        let group: Group = decode(row)?;
        Ok(Group {
            id: row.try_get("id")?,
            ..group
        })
    }

    fn pairs(rows: &[SqliteRow]) -> ConductorResult<Vec<(i64, i64)>> {
        rows.iter()
            .map(|row| Ok((row.try_get(0)?, row.try_get(1)?)))
            .collect()
    }
}

#[async_trait]
impl InventoryRepository for SqliteInventoryRepository {
    #[instrument(skip(self, inventory), fields(name = %inventory.name))]
    async fn create_inventory(&self, inventory: &Inventory) -> ConductorResult<Inventory> {
        let id: i64 = sqlx::query(
            "INSERT INTO inventories (organization_id, name, active, data) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(inventory.organization_id)
        .bind(&inventory.name)
        .bind(inventory.active)
        .bind(encode(inventory)?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        debug!("创建清单: {} ({})", inventory.name, id);
        Ok(Inventory {
            id,
            ..inventory.clone()
        })
    }

    async fn get_inventory(&self, id: i64) -> ConductorResult<Option<Inventory>> {
        let row = sqlx::query("SELECT id, data FROM inventories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let inventory: Inventory = decode(&row)?;
                Ok(Some(Inventory {
                    id: row.try_get("id")?,
                    ..inventory
                }))
            }
            None => Ok(None),
        }
    }

    async fn update_inventory(&self, inventory: &Inventory) -> ConductorResult<()> {
        let result =
            sqlx::query("UPDATE inventories SET name = ?, active = ?, data = ? WHERE id = ?")
                .bind(&inventory.name)
                .bind(inventory.active)
                .bind(encode(inventory)?)
                .bind(inventory.id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(ConductorError::not_found("清单", inventory.id));
        }
        Ok(())
    }

    #[instrument(skip(self, host), fields(inventory_id = host.inventory_id, name = %host.name))]
    async fn create_host(&self, host: &Host) -> ConductorResult<Host> {
        let id: i64 = sqlx::query(
            "INSERT INTO hosts (inventory_id, name, active, data) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(host.inventory_id)
        .bind(&host.name)
        .bind(host.active)
        .bind(encode(host)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or(e, &format!("主机 {}", host.name)))?
        .try_get("id")?;

        Ok(Host {
            id,
            ..host.clone()
        })
    }

    async fn get_host(&self, id: i64) -> ConductorResult<Option<Host>> {
        let row = sqlx::query("SELECT id, data FROM hosts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_host).transpose()
    }

    async fn update_host(&self, host: &Host) -> ConductorResult<()> {
        let result = sqlx::query(
            "UPDATE hosts SET name = ?, active = ?, last_job_host_summary_id = ?, data = ? WHERE id = ?",
        )
        .bind(&host.name)
        .bind(host.active)
        .bind(host.last_job_host_summary_id)
        .bind(encode(host)?)
        .bind(host.id)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, &format!("主机 {}", host.name)))?;
        if result.rows_affected() == 0 {
            return Err(ConductorError::not_found("主机", host.id));
        }
        Ok(())
    }

    async fn list_hosts(&self, inventory_id: i64) -> ConductorResult<Vec<Host>> {
        let rows = sqlx::query(
            "SELECT id, data FROM hosts WHERE inventory_id = ? AND active = 1 ORDER BY id",
        )
        .bind(inventory_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_host).collect()
    }

    async fn find_host(&self, inventory_id: i64, name: &str) -> ConductorResult<Option<Host>> {
        let row = sqlx::query(
            "SELECT id, data FROM hosts WHERE inventory_id = ? AND name = ? AND active = 1",
        )
        .bind(inventory_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_host).transpose()
    }

    async fn count_hosts(&self, inventory_id: i64) -> ConductorResult<i64> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) FROM hosts WHERE inventory_id = ? AND active = 1")
                .bind(inventory_id)
                .fetch_one(&self.pool)
                .await?
                .try_get(0)?;
        Ok(count)
    }

    #[instrument(skip(self, group), fields(inventory_id = group.inventory_id, name = %group.name))]
    async fn create_group(&self, group: &Group) -> ConductorResult<Group> {
        let id: i64 = sqlx::query(
            "INSERT INTO inventory_groups (inventory_id, name, active, data) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(group.inventory_id)
        .bind(&group.name)
        .bind(group.active)
        .bind(encode(group)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or(e, &format!("组 {}", group.name)))?
        .try_get("id")?;

        Ok(Group {
            id,
            ..group.clone()
        })
    }

    async fn get_group(&self, id: i64) -> ConductorResult<Option<Group>> {
        let row = sqlx::query("SELECT id, data FROM inventory_groups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_group).transpose()
    }

    async fn list_groups(&self, inventory_id: i64) -> ConductorResult<Vec<Group>> {
        let rows = sqlx::query(
            "SELECT id, data FROM inventory_groups WHERE inventory_id = ? AND active = 1 ORDER BY id",
        )
        .bind(inventory_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_group).collect()
    }

    async fn add_group_child(&self, parent_id: i64, child_id: i64) -> ConductorResult<()> {
        sqlx::query("INSERT OR IGNORE INTO group_parents (child_id, parent_id) VALUES (?, ?)")
            .bind(child_id)
            .bind(parent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_group_child(&self, parent_id: i64, child_id: i64) -> ConductorResult<()> {
        sqlx::query("DELETE FROM group_parents WHERE child_id = ? AND parent_id = ?")
            .bind(child_id)
            .bind(parent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_group_host(&self, group_id: i64, host_id: i64) -> ConductorResult<()> {
        sqlx::query("INSERT OR IGNORE INTO group_hosts (group_id, host_id) VALUES (?, ?)")
            .bind(group_id)
            .bind(host_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_group_host(&self, group_id: i64, host_id: i64) -> ConductorResult<()> {
        sqlx::query("DELETE FROM group_hosts WHERE group_id = ? AND host_id = ?")
            .bind(group_id)
            .bind(host_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_source_host(&self, source_id: i64, host_id: i64) -> ConductorResult<()> {
        sqlx::query("INSERT OR IGNORE INTO source_hosts (source_id, host_id) VALUES (?, ?)")
            .bind(source_id)
            .bind(host_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_source_group(&self, source_id: i64, group_id: i64) -> ConductorResult<()> {
        sqlx::query("INSERT OR IGNORE INTO source_groups (source_id, group_id) VALUES (?, ?)")
            .bind(source_id)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_snapshot(&self, inventory_id: i64) -> ConductorResult<InventorySnapshot> {
        let mut tx = self.pool.begin().await?;

        let host_rows = sqlx::query(
            r#"
            SELECT h.id,
                   CASE WHEN s.failed = 1 AND j.id IS NOT NULL THEN 1 ELSE 0 END AS last_failed
            FROM hosts h
            LEFT JOIN job_host_summaries s ON s.id = h.last_job_host_summary_id
            LEFT JOIN jobs j ON j.id = s.job_id
            WHERE h.inventory_id = ? AND h.active = 1
            ORDER BY h.id
            "#,
        )
        .bind(inventory_id)
        .fetch_all(&mut *tx)
        .await?;
        let hosts = host_rows
            .iter()
            .map(|row| {
                Ok(HostState {
                    id: row.try_get("id")?,
                    last_summary_failed: row.try_get::<i64, _>("last_failed")? == 1,
                })
            })
            .collect::<ConductorResult<Vec<_>>>()?;

        let groups = sqlx::query(
            "SELECT id FROM inventory_groups WHERE inventory_id = ? AND active = 1 ORDER BY id",
        )
        .bind(inventory_id)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| row.try_get::<i64, _>(0))
        .collect::<Result<Vec<_>, _>>()?;

        let group_parents = Self::pairs(
            &sqlx::query(
                r#"
                SELECT gp.child_id, gp.parent_id
                FROM group_parents gp
                JOIN inventory_groups c ON c.id = gp.child_id
                JOIN inventory_groups p ON p.id = gp.parent_id
                WHERE c.inventory_id = ? AND c.active = 1 AND p.active = 1
                "#,
            )
            .bind(inventory_id)
            .fetch_all(&mut *tx)
            .await?,
        )?;

        let group_hosts = Self::pairs(
            &sqlx::query(
                r#"
                SELECT gh.group_id, gh.host_id
                FROM group_hosts gh
                JOIN inventory_groups g ON g.id = gh.group_id
                JOIN hosts h ON h.id = gh.host_id
                WHERE g.inventory_id = ? AND g.active = 1 AND h.active = 1
                "#,
            )
            .bind(inventory_id)
            .fetch_all(&mut *tx)
            .await?,
        )?;

        let source_rows = sqlx::query(
            "SELECT id, data FROM templates WHERE kind = 'inventory_source' AND inventory_id = ? AND active = 1",
        )
        .bind(inventory_id)
        .fetch_all(&mut *tx)
        .await?;
        let sources = source_rows
            .iter()
            .map(|row| {
                let source: InventorySource = decode(row)?;
                Ok(SourceState {
                    id: row.try_get("id")?,
                    cloud: source.source.is_cloud(),
                    last_update_failed: source.last_update_failed,
                })
            })
            .collect::<ConductorResult<Vec<_>>>()?;

        let source_hosts = Self::pairs(
            &sqlx::query(
                r#"
                SELECT sh.source_id, sh.host_id
                FROM source_hosts sh
                JOIN templates t ON t.id = sh.source_id
                JOIN hosts h ON h.id = sh.host_id
                WHERE h.inventory_id = ? AND t.active = 1 AND h.active = 1
                "#,
            )
            .bind(inventory_id)
            .fetch_all(&mut *tx)
            .await?,
        )?;

        let source_groups = Self::pairs(
            &sqlx::query(
                r#"
                SELECT sg.source_id, sg.group_id
                FROM source_groups sg
                JOIN templates t ON t.id = sg.source_id
                JOIN inventory_groups g ON g.id = sg.group_id
                WHERE g.inventory_id = ? AND t.active = 1 AND g.active = 1
                "#,
            )
            .bind(inventory_id)
            .fetch_all(&mut *tx)
            .await?,
        )?;

        tx.commit().await?;

        Ok(InventorySnapshot {
            inventory_id,
            hosts,
            groups,
            group_parents,
            group_hosts,
            sources,
            source_hosts,
            source_groups,
        })
    }

    #[instrument(skip(self, fields), fields(inventory_id = fields.inventory_id))]
    async fn apply_computed_fields(
        &self,
        fields: &ComputedFields,
        batch_size: usize,
    ) -> ConductorResult<()> {
        let batch_size = batch_size.max(1);

        for chunk in fields.hosts.chunks(batch_size) {
            let mut tx = self.pool.begin().await?;
            for (host_id, has_active_failures, has_inventory_sources) in chunk {
                sqlx::query(
                    r#"
                    UPDATE hosts
                    SET data = json_set(data, '$.has_active_failures', json(?), '$.has_inventory_sources', json(?))
                    WHERE id = ? AND active = 1
                    "#,
                )
                .bind(has_active_failures.to_string())
                .bind(has_inventory_sources.to_string())
                .bind(host_id)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        }

        for chunk in fields.groups.chunks(batch_size) {
            let mut tx = self.pool.begin().await?;
            for (group_id, counters) in chunk {
                sqlx::query(
                    "UPDATE inventory_groups SET data = json_set(data, '$.counters', json(?)) WHERE id = ? AND active = 1",
                )
                .bind(encode(counters)?)
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        }

        sqlx::query(
            "UPDATE inventories SET data = json_set(data, '$.counters', json(?)) WHERE id = ? AND active = 1",
        )
        .bind(encode(&fields.inventory)?)
        .bind(fields.inventory_id)
        .execute(&self.pool)
        .await?;

        debug!(
            "写入派生字段: 主机 {} 个, 组 {} 个",
            fields.hosts.len(),
            fields.groups.len()
        );
        Ok(())
    }

    #[instrument(skip(self, group_ids, host_ids), fields(groups = group_ids.len(), hosts = host_ids.len()))]
    async fn mark_inactive(
        &self,
        inventory_id: i64,
        group_ids: &[i64],
        host_ids: &[i64],
        at: DateTime<Utc>,
    ) -> ConductorResult<()> {
        let mut tx = self.pool.begin().await?;

        for group_id in group_ids {
            let row = sqlx::query(
                "SELECT name FROM inventory_groups WHERE id = ? AND inventory_id = ? AND active = 1",
            )
            .bind(group_id)
            .bind(inventory_id)
            .fetch_optional(&mut *tx)
            .await?;
            let Some(row) = row else { continue };
            let name: String = row.try_get("name")?;
            let new_name = deleted_name(&name, at);

            sqlx::query(
                r#"
                UPDATE inventory_groups
                SET name = ?, active = 0, deactivated_at = ?,
                    data = json_set(data, '$.name', ?, '$.active', json('false'))
                WHERE id = ?
                "#,
            )
            .bind(&new_name)
            .bind(to_millis(at))
            .bind(&new_name)
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE templates
                SET active = 0, deactivated_at = ?, data = json_set(data, '$.active', json('false'))
                WHERE kind = 'inventory_source' AND active = 1
                  AND json_extract(data, '$.group_id') = ?
                "#,
            )
            .bind(to_millis(at))
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        }

        for host_id in host_ids {
            let row = sqlx::query(
                "SELECT name FROM hosts WHERE id = ? AND inventory_id = ? AND active = 1",
            )
            .bind(host_id)
            .bind(inventory_id)
            .fetch_optional(&mut *tx)
            .await?;
            let Some(row) = row else { continue };
            let name: String = row.try_get("name")?;
            let new_name = deleted_name(&name, at);

            sqlx::query(
                r#"
                UPDATE hosts
                SET name = ?, active = 0, deactivated_at = ?,
                    data = json_set(data, '$.name', ?, '$.active', json('false'))
                WHERE id = ?
                "#,
            )
            .bind(&new_name)
            .bind(to_millis(at))
            .bind(&new_name)
            .bind(host_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "停用清单 {} 中的 {} 个组、{} 个主机",
            inventory_id,
            group_ids.len(),
            host_ids.len()
        );
        Ok(())
    }
}
