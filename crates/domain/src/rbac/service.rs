use std::collections::HashMap;
use std::sync::Arc;

use conductor_core::models::{ContentType, Permissions, Role, User, SYSTEM_ADMINISTRATOR, SYSTEM_AUDITOR};
use conductor_core::{ConductorError, ConductorResult, RoleRepository};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::catalogue::{definition, definitions, parse_parent, ParentPath, SINGLETONS};
use super::closure::compute_ancestors;

/// 对象关联：父角色路径前缀 -> 关联对象
///
/// 例如作业模板的 `project.organization` 指向项目所属组织。
pub type RoleLinks<'a> = &'a [(&'a str, ContentType, i64)];

/// 尚未写入的角色，使用负数占位 id
#[derive(Debug, Default)]
struct RoleBatch {
    roles: Vec<Role>,
}

impl RoleBatch {
    fn add(&mut self, mut role: Role) -> i64 {
        let placeholder = -(self.roles.len() as i64) - 1;
        role.id = placeholder;
        self.roles.push(role);
        placeholder
    }
}

/// 缺失的单例角色加入待建列表，返回名称到 id（可能是占位 id）的映射
fn plan_singletons(existing: &[Role], batch: &mut RoleBatch) -> HashMap<&'static str, i64> {
    let mut ids = HashMap::new();
    for (name, permissions) in SINGLETONS {
        let found = existing
            .iter()
            .find(|r| r.singleton_name.as_deref() == Some(name));
        let id = match found {
            Some(role) => role.id,
            None => {
                info!("创建单例角色 {}", name);
                batch.add(Role::singleton(name, permissions))
            }
        };
        ids.insert(name, id);
    }
    ids
}

/// 角色图服务
///
/// 所有改动父边的操作串行执行，祖先表与父边在同一事务内更新。
pub struct RoleService {
    repo: Arc<dyn RoleRepository>,
    rebuild_lock: Mutex<()>,
}

impl RoleService {
    pub fn new(repo: Arc<dyn RoleRepository>) -> Self {
        Self {
            repo,
            rebuild_lock: Mutex::new(()),
        }
    }

    /// 创建缺失的单例角色
    pub async fn ensure_singletons(&self) -> ConductorResult<()> {
        let _guard = self.rebuild_lock.lock().await;
        let existing = self.repo.list_roles().await?;
        let mut batch = RoleBatch::default();
        plan_singletons(&existing, &mut batch);
        self.commit(existing, batch).await?;
        Ok(())
    }

    async fn singleton(&self, name: &str) -> ConductorResult<Role> {
        self.repo
            .find_singleton(name)
            .await?
            .ok_or_else(|| ConductorError::not_found("单例角色", name))
    }

    /// 为对象创建其全部隐式角色，已存在的角色直接复用
    ///
    /// 新角色与重建后的祖先表在同一事务内写入。
    pub async fn create_object_roles(
        &self,
        content_type: ContentType,
        object_id: i64,
        links: RoleLinks<'_>,
    ) -> ConductorResult<Vec<Role>> {
        let _guard = self.rebuild_lock.lock().await;
        let existing = self.repo.list_roles().await?;
        let mut batch = RoleBatch::default();
        let singletons = plan_singletons(&existing, &mut batch);

        let find = |ct: ContentType, id: i64, field: &str| {
            existing.iter().find(|r| {
                r.content_type == Some(ct) && r.object_id == Some(id) && r.role_field == field
            })
        };

        let mut local: HashMap<&str, i64> = HashMap::new();
        let mut roles = Vec::new();
        for def in definitions(content_type) {
            if let Some(found) = find(content_type, object_id, def.field) {
                local.insert(def.field, found.id);
                roles.push(found.clone());
                continue;
            }

            let mut parents = Vec::new();
            for path in def.parents {
                let parent = match parse_parent(path) {
                    ParentPath::Singleton(name) => singletons.get(name).copied(),
                    ParentPath::Local(field) => local.get(field).copied(),
                    ParentPath::Linked(prefix, field) => links
                        .iter()
                        .find(|(p, _, _)| *p == prefix)
                        .and_then(|(_, ct, id)| find(*ct, *id, field))
                        .map(|r| r.id),
                };
                match parent {
                    Some(id) => parents.push(id),
                    None => debug!(
                        "{}({}) 的 {} 缺少父角色 {}",
                        content_type.as_str(),
                        object_id,
                        def.field,
                        path
                    ),
                }
            }

            let mut role = Role::implicit(content_type, object_id, def.field, def.permissions);
            role.parents = parents;
            let placeholder = batch.add(role.clone());
            role.id = placeholder;
            local.insert(def.field, placeholder);
            roles.push(role);
        }

        let created = self.commit(existing, batch).await?;
        let roles: Vec<Role> = roles
            .into_iter()
            .map(|role| created.get(&role.id).cloned().unwrap_or(role))
            .collect();
        debug!(
            "创建 {}({}) 的 {} 个隐式角色",
            content_type.as_str(),
            object_id,
            roles.len()
        );
        Ok(roles)
    }

    /// 写入待建角色并重建祖先表，返回占位 id 到新角色的映射
    async fn commit(
        &self,
        existing: Vec<Role>,
        batch: RoleBatch,
    ) -> ConductorResult<HashMap<i64, Role>> {
        if batch.roles.is_empty() {
            return Ok(HashMap::new());
        }
        let mut all = existing;
        all.extend(batch.roles.iter().cloned());
        let entries = compute_ancestors(&all)?;

        let created = self
            .repo
            .create_roles_and_ancestors(&batch.roles, &entries)
            .await?;
        Ok(batch
            .roles
            .iter()
            .map(|r| r.id)
            .zip(created)
            .collect())
    }

    /// 替换父角色，形成环时返回 `Conflict` 且不做任何修改
    pub async fn set_parents(&self, role_id: i64, parents: &[i64]) -> ConductorResult<()> {
        let _guard = self.rebuild_lock.lock().await;
        let mut roles = self.repo.list_roles().await?;
        let role = roles
            .iter_mut()
            .find(|r| r.id == role_id)
            .ok_or_else(|| ConductorError::not_found("角色", role_id))?;
        role.parents = parents.to_vec();

        let entries = compute_ancestors(&roles)?;
        self.repo
            .set_parents_and_ancestors(role_id, parents, &entries)
            .await
    }

    pub async fn role_for(
        &self,
        content_type: ContentType,
        object_id: i64,
        role_field: &str,
    ) -> ConductorResult<Role> {
        self.repo
            .find_role(content_type, object_id, role_field)
            .await?
            .ok_or_else(|| {
                ConductorError::not_found(
                    "角色",
                    format!("{}({}).{}", content_type.as_str(), object_id, role_field),
                )
            })
    }

    pub async fn add_member(&self, role_id: i64, user_id: i64) -> ConductorResult<()> {
        self.repo.add_member(role_id, user_id).await
    }

    pub async fn remove_member(&self, role_id: i64, user_id: i64) -> ConductorResult<()> {
        self.repo.remove_member(role_id, user_id).await
    }

    /// 按用户的超级管理员/系统审计员标记同步单例角色成员
    pub async fn grant_user_flags(&self, user: &User) -> ConductorResult<()> {
        for (name, flag) in [
            (SYSTEM_ADMINISTRATOR, user.is_superuser),
            (SYSTEM_AUDITOR, user.is_system_auditor),
        ] {
            let role = self.singleton(name).await?;
            if flag {
                self.repo.add_member(role.id, user.id).await?;
            } else {
                self.repo.remove_member(role.id, user.id).await?;
            }
        }
        Ok(())
    }

    pub async fn has_role(&self, user_id: i64, role_id: i64) -> ConductorResult<bool> {
        self.repo.user_has_role(user_id, role_id).await
    }

    /// 用户是否持有对象上的某个角色（直接或继承）
    pub async fn has_object_role(
        &self,
        user_id: i64,
        content_type: ContentType,
        object_id: i64,
        role_field: &str,
    ) -> ConductorResult<bool> {
        match self
            .repo
            .find_role(content_type, object_id, role_field)
            .await?
        {
            Some(role) => self.repo.user_has_role(user_id, role.id).await,
            None => Ok(false),
        }
    }

    /// 用户在对象上是否拥有某项权限
    pub async fn has_permission(
        &self,
        user_id: i64,
        content_type: ContentType,
        object_id: i64,
        permission: Permissions,
    ) -> ConductorResult<bool> {
        for def in definitions(content_type) {
            if !def.permissions.contains(permission) {
                continue;
            }
            if self
                .has_object_role(user_id, content_type, object_id, def.field)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 权限检查，未通过时返回 `Permission` 错误
    pub async fn check(
        &self,
        user_id: i64,
        content_type: ContentType,
        object_id: i64,
        role_field: &str,
    ) -> ConductorResult<()> {
        if definition(content_type, role_field).is_none() {
            return Err(ConductorError::validation(format!(
                "{} 没有角色 {}",
                content_type.as_str(),
                role_field
            )));
        }
        if self
            .has_object_role(user_id, content_type, object_id, role_field)
            .await?
        {
            return Ok(());
        }

        warn!(
            user_id = user_id,
            content_type = content_type.as_str(),
            object_id = object_id,
            role_field = role_field,
            "权限检查未通过"
        );
        Err(ConductorError::permission(format!(
            "用户 {} 没有 {}({}) 的 {}",
            user_id,
            content_type.as_str(),
            object_id,
            role_field
        )))
    }

    /// 用户可访问的对象 id
    pub async fn accessible(
        &self,
        user_id: i64,
        content_type: ContentType,
        role_field: &str,
    ) -> ConductorResult<Vec<i64>> {
        self.repo
            .accessible_object_ids(user_id, content_type, role_field)
            .await
    }
}
