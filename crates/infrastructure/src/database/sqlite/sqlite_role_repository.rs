use std::collections::HashMap;

use async_trait::async_trait;
use conductor_core::{
    models::{ContentType, Permissions, Role, RoleAncestorEntry},
    ConductorResult, RoleRepository,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use super::conflict_or;

const ROLE_COLUMNS: &str = "id, singleton_name, role_field, content_type, object_id, permissions";

pub struct SqliteRoleRepository {
    pool: SqlitePool,
}

impl SqliteRoleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_role(row: &SqliteRow) -> ConductorResult<Role> {
        let content_type: Option<String> = row.try_get("content_type")?;
        let permissions: i64 = row.try_get("permissions")?;
        Ok(Role {
            id: row.try_get("id")?,
            singleton_name: row.try_get("singleton_name")?,
            role_field: row.try_get("role_field")?,
            content_type: content_type.as_deref().and_then(ContentType::parse),
            object_id: row.try_get("object_id")?,
            permissions: Permissions::from_bits(permissions as u8),
            parents: Vec::new(),
        })
    }

    async fn load_parents(&self, role_id: i64) -> ConductorResult<Vec<i64>> {
        let rows =
            sqlx::query("SELECT parent_id FROM role_parents WHERE role_id = ? ORDER BY parent_id")
                .bind(role_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("parent_id")?))
            .collect()
    }

    async fn fetch_one_role(&self, row: Option<SqliteRow>) -> ConductorResult<Option<Role>> {
        match row {
            Some(row) => {
                let mut role = Self::row_to_role(&row)?;
                role.parents = self.load_parents(role.id).await?;
                Ok(Some(role))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RoleRepository for SqliteRoleRepository {
    #[instrument(skip(self, role), fields(role_field = %role.role_field, object_id = ?role.object_id))]
    async fn create_role(&self, role: &Role) -> ConductorResult<Role> {
        let mut tx = self.pool.begin().await?;
        let id = insert_role(&mut tx, role, &role.parents).await?;
        tx.commit().await?;

        Ok(Role {
            id,
            ..role.clone()
        })
    }

    async fn get_role(&self, id: i64) -> ConductorResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        self.fetch_one_role(row).await
    }

    async fn find_role(
        &self,
        content_type: ContentType,
        object_id: i64,
        role_field: &str,
    ) -> ConductorResult<Option<Role>> {
        let sql = format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE content_type = ? AND object_id = ? AND role_field = ?"
        );
        let row = sqlx::query(&sql)
            .bind(content_type.as_str())
            .bind(object_id)
            .bind(role_field)
            .fetch_optional(&self.pool)
            .await?;
        self.fetch_one_role(row).await
    }

    async fn find_singleton(&self, name: &str) -> ConductorResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE singleton_name = ?");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        self.fetch_one_role(row).await
    }

    async fn list_roles(&self) -> ConductorResult<Vec<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY id");
        let mut roles = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(Self::row_to_role)
            .collect::<ConductorResult<Vec<_>>>()?;

        let mut parents: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in sqlx::query("SELECT role_id, parent_id FROM role_parents ORDER BY role_id, parent_id")
            .fetch_all(&self.pool)
            .await?
        {
            parents
                .entry(row.try_get("role_id")?)
                .or_default()
                .push(row.try_get("parent_id")?);
        }
        for role in &mut roles {
            role.parents = parents.remove(&role.id).unwrap_or_default();
        }
        Ok(roles)
    }

    #[instrument(skip(self, parents, entries), fields(parents = parents.len(), entries = entries.len()))]
    async fn set_parents_and_ancestors(
        &self,
        role_id: i64,
        parents: &[i64],
        entries: &[RoleAncestorEntry],
    ) -> ConductorResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM role_parents WHERE role_id = ?")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        for parent_id in parents {
            sqlx::query("INSERT OR IGNORE INTO role_parents (role_id, parent_id) VALUES (?, ?)")
                .bind(role_id)
                .bind(parent_id)
                .execute(&mut *tx)
                .await?;
        }

        write_ancestors(&mut tx, entries).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, roles, entries), fields(roles = roles.len(), entries = entries.len()))]
    async fn create_roles_and_ancestors(
        &self,
        roles: &[Role],
        entries: &[RoleAncestorEntry],
    ) -> ConductorResult<Vec<Role>> {
        let mut tx = self.pool.begin().await?;
        let mut ids: HashMap<i64, i64> = HashMap::new();
        let resolve = |ids: &HashMap<i64, i64>, id: i64| ids.get(&id).copied().unwrap_or(id);

        let mut created = Vec::with_capacity(roles.len());
        for role in roles {
            let parents: Vec<i64> = role.parents.iter().map(|p| resolve(&ids, *p)).collect();
            let id = insert_role(&mut tx, role, &parents).await?;
            ids.insert(role.id, id);
            created.push(Role {
                id,
                parents,
                ..role.clone()
            });
        }

        let entries: Vec<RoleAncestorEntry> = entries
            .iter()
            .map(|e| RoleAncestorEntry {
                ancestor_id: resolve(&ids, e.ancestor_id),
                descendant_id: resolve(&ids, e.descendant_id),
                ..e.clone()
            })
            .collect();
        write_ancestors(&mut tx, &entries).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn add_member(&self, role_id: i64, user_id: i64) -> ConductorResult<()> {
        sqlx::query("INSERT OR IGNORE INTO role_members (role_id, user_id) VALUES (?, ?)")
            .bind(role_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_member(&self, role_id: i64, user_id: i64) -> ConductorResult<()> {
        sqlx::query("DELETE FROM role_members WHERE role_id = ? AND user_id = ?")
            .bind(role_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn roles_of_user(&self, user_id: i64) -> ConductorResult<Vec<i64>> {
        let rows =
            sqlx::query("SELECT role_id FROM role_members WHERE user_id = ? ORDER BY role_id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(|row| Ok(row.try_get("role_id")?)).collect()
    }

    async fn user_has_role(&self, user_id: i64, role_id: i64) -> ConductorResult<bool> {
        let found: i64 = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM role_members m
                JOIN role_ancestors a ON a.ancestor_id = m.role_id
                WHERE m.user_id = ? AND a.descendant_id = ?
            )
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_one(&self.pool)
        .await?
        .try_get(0)?;
        Ok(found == 1)
    }

    async fn accessible_object_ids(
        &self,
        user_id: i64,
        content_type: ContentType,
        role_field: &str,
    ) -> ConductorResult<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT a.object_id
            FROM role_members m
            JOIN role_ancestors a ON a.ancestor_id = m.role_id
            WHERE m.user_id = ? AND a.content_type = ? AND a.role_field = ?
              AND a.object_id IS NOT NULL
            ORDER BY a.object_id
            "#,
        )
        .bind(user_id)
        .bind(content_type.as_str())
        .bind(role_field)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|row| Ok(row.try_get("object_id")?)).collect()
    }
}

async fn insert_role(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    role: &Role,
    parents: &[i64],
) -> ConductorResult<i64> {
    let id: i64 = sqlx::query(
        r#"
        INSERT INTO roles (singleton_name, role_field, content_type, object_id, permissions)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&role.singleton_name)
    .bind(&role.role_field)
    .bind(role.content_type.map(|ct| ct.as_str()))
    .bind(role.object_id)
    .bind(role.permissions.bits() as i64)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| conflict_or(e, &format!("角色 {}", role.role_field)))?
    .try_get("id")?;

    for parent_id in parents {
        sqlx::query("INSERT OR IGNORE INTO role_parents (role_id, parent_id) VALUES (?, ?)")
            .bind(id)
            .bind(parent_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(id)
}

async fn write_ancestors(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entries: &[RoleAncestorEntry],
) -> ConductorResult<()> {
    sqlx::query("DELETE FROM role_ancestors")
        .execute(&mut **tx)
        .await?;
    for entry in entries {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO role_ancestors (ancestor_id, descendant_id, role_field, content_type, object_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.ancestor_id)
        .bind(entry.descendant_id)
        .bind(&entry.role_field)
        .bind(entry.content_type.map(|ct| ct.as_str()))
        .bind(entry.object_id)
        .execute(&mut **tx)
        .await?;
    }
    debug!("重建角色祖先表: {} 行", entries.len());
    Ok(())
}
