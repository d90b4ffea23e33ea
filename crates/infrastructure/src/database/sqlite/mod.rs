pub mod sqlite_activity_repository;
pub mod sqlite_credential_repository;
pub mod sqlite_event_repository;
pub mod sqlite_inventory_repository;
pub mod sqlite_job_repository;
pub mod sqlite_maintenance_repository;
pub mod sqlite_organization_repository;
pub mod sqlite_role_repository;
pub mod sqlite_schedule_repository;
pub mod sqlite_template_repository;

pub use sqlite_activity_repository::SqliteActivityStreamRepository;
pub use sqlite_credential_repository::SqliteCredentialRepository;
pub use sqlite_event_repository::SqliteJobEventRepository;
pub use sqlite_inventory_repository::SqliteInventoryRepository;
pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_maintenance_repository::SqliteMaintenanceRepository;
pub use sqlite_organization_repository::SqliteOrganizationRepository;
pub use sqlite_role_repository::SqliteRoleRepository;
pub use sqlite_schedule_repository::SqliteScheduleRepository;
pub use sqlite_template_repository::SqliteTemplateRepository;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use conductor_core::{
    config::DatabaseConfig, ConductorError, ConductorResult, Repositories,
};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

/// 表结构，启动时幂等创建
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        active INTEGER NOT NULL DEFAULT 1,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        organization_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS credentials (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        deactivated_at INTEGER,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        organization_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        deactivated_at INTEGER,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS hosts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        inventory_id INTEGER NOT NULL REFERENCES inventories(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        last_job_host_summary_id INTEGER,
        deactivated_at INTEGER,
        data TEXT NOT NULL,
        UNIQUE (inventory_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        inventory_id INTEGER NOT NULL REFERENCES inventories(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        deactivated_at INTEGER,
        data TEXT NOT NULL,
        UNIQUE (inventory_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_parents (
        child_id INTEGER NOT NULL REFERENCES inventory_groups(id) ON DELETE CASCADE,
        parent_id INTEGER NOT NULL REFERENCES inventory_groups(id) ON DELETE CASCADE,
        PRIMARY KEY (child_id, parent_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_hosts (
        group_id INTEGER NOT NULL REFERENCES inventory_groups(id) ON DELETE CASCADE,
        host_id INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        PRIMARY KEY (group_id, host_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS templates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        inventory_id INTEGER,
        project_id INTEGER,
        deactivated_at INTEGER,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_hosts (
        source_id INTEGER NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
        host_id INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        PRIMARY KEY (source_id, host_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_groups (
        source_id INTEGER NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
        group_id INTEGER NOT NULL REFERENCES inventory_groups(id) ON DELETE CASCADE,
        PRIMARY KEY (source_id, group_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        template_id INTEGER,
        cancel_flag INTEGER NOT NULL DEFAULT 0,
        result_stdout TEXT NOT NULL DEFAULT '',
        finished_at INTEGER,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        counter INTEGER NOT NULL,
        kind TEXT NOT NULL,
        parent_id INTEGER,
        failed INTEGER NOT NULL DEFAULT 0,
        changed INTEGER NOT NULL DEFAULT 0,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_host_summaries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        host_id INTEGER,
        host_name TEXT NOT NULL,
        failed INTEGER NOT NULL DEFAULT 0,
        data TEXT NOT NULL,
        UNIQUE (job_id, host_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        template_id INTEGER NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        active INTEGER NOT NULL DEFAULT 1,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        singleton_name TEXT UNIQUE,
        role_field TEXT NOT NULL,
        content_type TEXT,
        object_id INTEGER,
        permissions INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS role_parents (
        role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        parent_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, parent_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS role_ancestors (
        ancestor_id INTEGER NOT NULL,
        descendant_id INTEGER NOT NULL,
        role_field TEXT NOT NULL,
        content_type TEXT,
        object_id INTEGER,
        PRIMARY KEY (ancestor_id, descendant_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS role_members (
        role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL,
        PRIMARY KEY (role_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS activity_stream (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation TEXT NOT NULL,
        object_type TEXT NOT NULL,
        object_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        data TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_hosts_inventory ON hosts(inventory_id)",
    "CREATE INDEX IF NOT EXISTS idx_groups_inventory ON inventory_groups(inventory_id)",
    "CREATE INDEX IF NOT EXISTS idx_templates_inventory ON templates(kind, inventory_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
    "CREATE INDEX IF NOT EXISTS idx_job_events_job ON job_events(job_id, counter)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_roles_object ON roles(content_type, object_id, role_field)",
    "CREATE INDEX IF NOT EXISTS idx_role_ancestors_descendant ON role_ancestors(descendant_id)",
    "CREATE INDEX IF NOT EXISTS idx_role_ancestors_lookup ON role_ancestors(content_type, role_field)",
    "CREATE INDEX IF NOT EXISTS idx_activity_object ON activity_stream(object_type, object_id)",
];

/// SQLite 存储，持有连接池并创建各仓储
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(config: &DatabaseConfig) -> ConductorResult<Self> {
        let in_memory = config.url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| ConductorError::Configuration(format!("解析数据库URL失败: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // 内存库每个连接各自独立，只能使用单连接
        let max_connections = if in_memory { 1 } else { config.max_connections };
        let min_connections = config.min_connections.min(max_connections);

        info!("创建SQLite数据库连接池: {}", config.url);
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
        pool_options = if in_memory {
            // 连接被回收时内存库随之丢失
            pool_options.idle_timeout(None).max_lifetime(None)
        } else {
            pool_options.idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
        };
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// 单连接内存库
    pub async fn in_memory() -> ConductorResult<Self> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        Self::connect(&config).await
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> ConductorResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("数据库表结构已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> ConductorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn repositories(&self) -> Repositories {
        let pool = self.pool.clone();
        Repositories {
            organizations: Arc::new(SqliteOrganizationRepository::new(pool.clone())),
            credentials: Arc::new(SqliteCredentialRepository::new(pool.clone())),
            inventories: Arc::new(SqliteInventoryRepository::new(pool.clone())),
            templates: Arc::new(SqliteTemplateRepository::new(pool.clone())),
            jobs: Arc::new(SqliteJobRepository::new(pool.clone())),
            events: Arc::new(SqliteJobEventRepository::new(pool.clone())),
            schedules: Arc::new(SqliteScheduleRepository::new(pool.clone())),
            roles: Arc::new(SqliteRoleRepository::new(pool.clone())),
            activity: Arc::new(SqliteActivityStreamRepository::new(pool.clone())),
            maintenance: Arc::new(SqliteMaintenanceRepository::new(pool)),
        }
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> ConductorResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// 读取 `data` 列
pub(crate) fn decode<T: DeserializeOwned>(row: &SqliteRow) -> ConductorResult<T> {
    let data: String = row.try_get("data")?;
    Ok(serde_json::from_str(&data)?)
}

/// 唯一约束冲突转换为 `Conflict`
pub(crate) fn conflict_or(err: sqlx::Error, what: &str) -> ConductorError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ConductorError::Conflict(format!("{what}已存在"))
        }
        _ => ConductorError::Database(err),
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// 逻辑删除时使用的名称
pub(crate) fn deleted_name(name: &str, at: DateTime<Utc>) -> String {
    format!("_deleted_{}_{}", at.format("%Y-%m-%dT%H:%M:%S%.6f"), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.health_check().await.unwrap();
    }

    #[test]
    fn test_deleted_name_prefix() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            deleted_name("web1", at),
            "_deleted_2024-01-02T03:04:05.000000_web1"
        );
    }
}
