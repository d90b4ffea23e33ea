//! 各类资源的隐式角色定义

use conductor_core::models::{ContentType, Permissions, SYSTEM_ADMINISTRATOR, SYSTEM_AUDITOR};

/// 单个隐式角色
///
/// 父角色路径有三种写法：
/// - `admin_role`：同一对象上的角色
/// - `organization.admin_role`：关联对象上的角色，前缀由调用方解析
/// - `singleton:system_administrator`：全局单例角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleDefinition {
    pub field: &'static str,
    pub permissions: Permissions,
    pub parents: &'static [&'static str],
}

const fn role(
    field: &'static str,
    permissions: Permissions,
    parents: &'static [&'static str],
) -> RoleDefinition {
    RoleDefinition {
        field,
        permissions,
        parents,
    }
}

const ADMIN: Permissions = Permissions::ALL;
const READ: Permissions = Permissions::READ;
const USE: Permissions = Permissions::READ.union(Permissions::USE);
const EXECUTE: Permissions = Permissions::READ.union(Permissions::EXECUTE);
const UPDATE: Permissions = Permissions::READ.union(Permissions::WRITE);

const ORGANIZATION: &[RoleDefinition] = &[
    role("admin_role", ADMIN, &["singleton:system_administrator"]),
    role("auditor_role", READ, &["singleton:system_auditor"]),
    role("member_role", READ, &["admin_role"]),
    role("read_role", READ, &["member_role", "auditor_role"]),
];

const TEAM: &[RoleDefinition] = &[
    role("admin_role", ADMIN, &["organization.admin_role"]),
    role("member_role", READ, &["admin_role"]),
    role(
        "read_role",
        READ,
        &["admin_role", "member_role", "organization.auditor_role"],
    ),
];

const CREDENTIAL: &[RoleDefinition] = &[
    role(
        "admin_role",
        ADMIN,
        &["singleton:system_administrator", "team.admin_role"],
    ),
    role("use_role", USE, &["admin_role"]),
    role("read_role", READ, &["use_role", "singleton:system_auditor"]),
];

const PROJECT: &[RoleDefinition] = &[
    role("admin_role", ADMIN, &["organization.admin_role"]),
    role("use_role", USE, &["admin_role"]),
    role("update_role", UPDATE, &["admin_role"]),
    role(
        "read_role",
        READ,
        &["organization.auditor_role", "use_role", "update_role"],
    ),
];

const INVENTORY: &[RoleDefinition] = &[
    role("admin_role", ADMIN, &["organization.admin_role"]),
    role("update_role", UPDATE, &["admin_role"]),
    role("use_role", USE, &["admin_role"]),
    role("adhoc_role", EXECUTE, &["admin_role"]),
    role(
        "read_role",
        READ,
        &[
            "organization.auditor_role",
            "update_role",
            "use_role",
            "adhoc_role",
        ],
    ),
];

const JOB_TEMPLATE: &[RoleDefinition] = &[
    role(
        "admin_role",
        ADMIN,
        &[
            "project.organization.admin_role",
            "inventory.organization.admin_role",
        ],
    ),
    role("execute_role", EXECUTE, &["admin_role"]),
    role(
        "read_role",
        READ,
        &[
            "project.organization.auditor_role",
            "inventory.organization.auditor_role",
            "execute_role",
        ],
    ),
];

/// 按声明顺序返回，本地父角色总在子角色之前
pub fn definitions(content_type: ContentType) -> &'static [RoleDefinition] {
    match content_type {
        ContentType::Organization => ORGANIZATION,
        ContentType::Team => TEAM,
        ContentType::Credential => CREDENTIAL,
        ContentType::Project => PROJECT,
        ContentType::Inventory => INVENTORY,
        ContentType::JobTemplate => JOB_TEMPLATE,
    }
}

pub fn definition(content_type: ContentType, field: &str) -> Option<&'static RoleDefinition> {
    definitions(content_type).iter().find(|d| d.field == field)
}

/// 单例角色及其权限
pub const SINGLETONS: [(&str, Permissions); 2] = [
    (SYSTEM_ADMINISTRATOR, Permissions::ALL),
    (SYSTEM_AUDITOR, Permissions::READ),
];

/// 解析后的父角色路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentPath<'a> {
    Singleton(&'a str),
    Local(&'a str),
    /// (关联前缀, 角色字段)
    Linked(&'a str, &'a str),
}

pub fn parse_parent(path: &str) -> ParentPath<'_> {
    if let Some(name) = path.strip_prefix("singleton:") {
        return ParentPath::Singleton(name);
    }
    match path.rsplit_once('.') {
        Some((prefix, field)) => ParentPath::Linked(prefix, field),
        None => ParentPath::Local(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_parents_declared_first() {
        for ct in [
            ContentType::Organization,
            ContentType::Team,
            ContentType::Credential,
            ContentType::Project,
            ContentType::Inventory,
            ContentType::JobTemplate,
        ] {
            let defs = definitions(ct);
            for (index, def) in defs.iter().enumerate() {
                for parent in def.parents {
                    if let ParentPath::Local(field) = parse_parent(parent) {
                        let position = defs.iter().position(|d| d.field == field).unwrap();
                        assert!(position < index, "{:?}.{} 的父角色 {}", ct, def.field, field);
                    }
                }
            }
        }
    }

    #[test]
    fn test_parse_parent_paths() {
        assert_eq!(
            parse_parent("singleton:system_auditor"),
            ParentPath::Singleton("system_auditor")
        );
        assert_eq!(parse_parent("admin_role"), ParentPath::Local("admin_role"));
        assert_eq!(
            parse_parent("project.organization.admin_role"),
            ParentPath::Linked("project.organization", "admin_role")
        );
    }

    #[test]
    fn test_permissions() {
        let use_role = definition(ContentType::Credential, "use_role").unwrap();
        assert!(use_role.permissions.contains(Permissions::USE));
        assert!(use_role.permissions.contains(Permissions::READ));
        assert!(!use_role.permissions.contains(Permissions::ADMIN));

        let execute = definition(ContentType::JobTemplate, "execute_role").unwrap();
        assert!(execute.permissions.contains(Permissions::EXECUTE));
        assert!(definition(ContentType::Team, "use_role").is_none());
    }
}
