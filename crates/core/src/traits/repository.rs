//! 数据仓储层接口定义
//!
//! 每个仓储只负责一类实体。所有实现必须是 `Send + Sync`，以便以
//! `Arc<dyn Trait>` 的形式在调度器、worker 与服务之间共享。
//!
//! 删除均为逻辑删除（`active = false`），物理删除只由维护仓储执行。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ActivityEntry, ComputedFields, ContentType, Credential, Group, Host, Inventory,
    InventorySnapshot, InventorySource, JobEvent, JobHostSummary, JobStatus, Organization, Role,
    RoleAncestorEntry, Schedule, Team, TemplateKind, UnifiedJob, UnifiedTemplate, User,
};
use crate::ConductorResult;

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn create_organization(&self, organization: &Organization)
        -> ConductorResult<Organization>;
    async fn get_organization(&self, id: i64) -> ConductorResult<Option<Organization>>;
    async fn create_user(&self, user: &User) -> ConductorResult<User>;
    async fn get_user(&self, id: i64) -> ConductorResult<Option<User>>;
    async fn create_team(&self, team: &Team) -> ConductorResult<Team>;
    async fn get_team(&self, id: i64) -> ConductorResult<Option<Team>>;
}

/// 凭据仓储，只存储密文
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn create(&self, credential: &Credential) -> ConductorResult<Credential>;
    async fn update(&self, credential: &Credential) -> ConductorResult<()>;
    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<Credential>>;
}

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn create_inventory(&self, inventory: &Inventory) -> ConductorResult<Inventory>;
    async fn get_inventory(&self, id: i64) -> ConductorResult<Option<Inventory>>;
    async fn update_inventory(&self, inventory: &Inventory) -> ConductorResult<()>;

    /// 同一清单内主机名重复时返回 `Conflict`
    async fn create_host(&self, host: &Host) -> ConductorResult<Host>;
    async fn get_host(&self, id: i64) -> ConductorResult<Option<Host>>;
    async fn update_host(&self, host: &Host) -> ConductorResult<()>;
    /// 活跃主机
    async fn list_hosts(&self, inventory_id: i64) -> ConductorResult<Vec<Host>>;
    async fn find_host(&self, inventory_id: i64, name: &str) -> ConductorResult<Option<Host>>;
    async fn count_hosts(&self, inventory_id: i64) -> ConductorResult<i64>;

    /// 同一清单内组名重复时返回 `Conflict`
    async fn create_group(&self, group: &Group) -> ConductorResult<Group>;
    async fn get_group(&self, id: i64) -> ConductorResult<Option<Group>>;
    /// 活跃组
    async fn list_groups(&self, inventory_id: i64) -> ConductorResult<Vec<Group>>;

    async fn add_group_child(&self, parent_id: i64, child_id: i64) -> ConductorResult<()>;
    async fn remove_group_child(&self, parent_id: i64, child_id: i64) -> ConductorResult<()>;
    async fn add_group_host(&self, group_id: i64, host_id: i64) -> ConductorResult<()>;
    async fn remove_group_host(&self, group_id: i64, host_id: i64) -> ConductorResult<()>;
    async fn add_source_host(&self, source_id: i64, host_id: i64) -> ConductorResult<()>;
    async fn add_source_group(&self, source_id: i64, group_id: i64) -> ConductorResult<()>;

    /// 在单个事务内读取活跃主机、组、边与来源
    async fn load_snapshot(&self, inventory_id: i64) -> ConductorResult<InventorySnapshot>;

    /// 分批写入派生字段，跳过已失效的行
    async fn apply_computed_fields(
        &self,
        fields: &ComputedFields,
        batch_size: usize,
    ) -> ConductorResult<()>;

    /// 在单个事务内停用组与主机并改名，挂在这些组上的清单来源一并停用
    async fn mark_inactive(
        &self,
        inventory_id: i64,
        group_ids: &[i64],
        host_ids: &[i64],
        at: DateTime<Utc>,
    ) -> ConductorResult<()>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn create(&self, template: &UnifiedTemplate) -> ConductorResult<UnifiedTemplate>;
    async fn update(&self, template: &UnifiedTemplate) -> ConductorResult<()>;
    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<UnifiedTemplate>>;
    /// 清单下的活跃来源
    async fn list_inventory_sources(&self, inventory_id: i64)
        -> ConductorResult<Vec<InventorySource>>;
    async fn list_by_kind(&self, kind: TemplateKind) -> ConductorResult<Vec<UnifiedTemplate>>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &UnifiedJob) -> ConductorResult<UnifiedJob>;
    /// 不覆盖 `cancel_flag` 与 `result_stdout`
    async fn update(&self, job: &UnifiedJob) -> ConductorResult<()>;
    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<UnifiedJob>>;
    /// 按 id 升序
    async fn list_by_status(&self, statuses: &[JobStatus]) -> ConductorResult<Vec<UnifiedJob>>;
    /// 设置取消标记，作业不存在时返回 false
    async fn request_cancel(&self, id: i64) -> ConductorResult<bool>;
    async fn is_cancel_requested(&self, id: i64) -> ConductorResult<bool>;
    async fn append_stdout(&self, id: i64, text: &str) -> ConductorResult<()>;
}

#[async_trait]
pub trait JobEventRepository: Send + Sync {
    async fn create_event(&self, event: &JobEvent) -> ConductorResult<JobEvent>;
    /// 按 counter 升序
    async fn list_events(&self, job_id: i64) -> ConductorResult<Vec<JobEvent>>;
    /// (event_id, failed, changed)
    async fn update_event_flags(&self, updates: &[(i64, bool, bool)]) -> ConductorResult<()>;
    async fn last_counter(&self, job_id: i64) -> ConductorResult<i64>;
    /// 以 (job, host_name) 为键插入或覆盖
    async fn upsert_host_summary(&self, summary: &JobHostSummary)
        -> ConductorResult<JobHostSummary>;
    async fn list_host_summaries(&self, job_id: i64) -> ConductorResult<Vec<JobHostSummary>>;
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn create(&self, schedule: &Schedule) -> ConductorResult<Schedule>;
    async fn update(&self, schedule: &Schedule) -> ConductorResult<()>;
    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<Schedule>>;
    /// 启用且活跃的计划
    async fn list_enabled(&self) -> ConductorResult<Vec<Schedule>>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn create_role(&self, role: &Role) -> ConductorResult<Role>;
    async fn get_role(&self, id: i64) -> ConductorResult<Option<Role>>;
    async fn find_role(
        &self,
        content_type: ContentType,
        object_id: i64,
        role_field: &str,
    ) -> ConductorResult<Option<Role>>;
    async fn find_singleton(&self, name: &str) -> ConductorResult<Option<Role>>;
    async fn list_roles(&self) -> ConductorResult<Vec<Role>>;

    /// 在同一事务内替换角色的父角色并重建祖先表
    async fn set_parents_and_ancestors(
        &self,
        role_id: i64,
        parents: &[i64],
        entries: &[RoleAncestorEntry],
    ) -> ConductorResult<()>;
    /// 在同一事务内创建一批角色并重建祖先表
    ///
    /// `roles` 使用负数占位 id，父角色与 `entries` 可以引用这些占位 id，
    /// 写入时替换为真实 id。返回的角色与 `roles` 顺序一致。
    async fn create_roles_and_ancestors(
        &self,
        roles: &[Role],
        entries: &[RoleAncestorEntry],
    ) -> ConductorResult<Vec<Role>>;

    async fn add_member(&self, role_id: i64, user_id: i64) -> ConductorResult<()>;
    async fn remove_member(&self, role_id: i64, user_id: i64) -> ConductorResult<()>;
    async fn roles_of_user(&self, user_id: i64) -> ConductorResult<Vec<i64>>;
    /// 用户直接持有的角色中是否有目标角色的祖先
    async fn user_has_role(&self, user_id: i64, role_id: i64) -> ConductorResult<bool>;
    async fn accessible_object_ids(
        &self,
        user_id: i64,
        content_type: ContentType,
        role_field: &str,
    ) -> ConductorResult<Vec<i64>>;
}

#[async_trait]
pub trait ActivityStreamRepository: Send + Sync {
    async fn record(&self, entry: &ActivityEntry) -> ConductorResult<ActivityEntry>;
    async fn list_for_object(
        &self,
        object_type: &str,
        object_id: i64,
    ) -> ConductorResult<Vec<ActivityEntry>>;
}

/// 系统维护作业使用的物理删除
#[async_trait]
pub trait MaintenanceRepository: Send + Sync {
    async fn delete_jobs_finished_before(&self, cutoff: DateTime<Utc>) -> ConductorResult<u64>;
    async fn delete_activity_before(&self, cutoff: DateTime<Utc>) -> ConductorResult<u64>;
    /// 删除已停用的主机、组、模板、凭据与清单
    async fn purge_inactive(&self, cutoff: DateTime<Utc>) -> ConductorResult<u64>;
}

/// 仓储集合
#[derive(Clone)]
pub struct Repositories {
    pub organizations: Arc<dyn OrganizationRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub inventories: Arc<dyn InventoryRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub events: Arc<dyn JobEventRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub activity: Arc<dyn ActivityStreamRepository>,
    pub maintenance: Arc<dyn MaintenanceRepository>,
}
