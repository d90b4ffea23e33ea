use serde::{Deserialize, Serialize};

/// 角色携带的本地权限位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const READ: Permissions = Permissions(1);
    pub const WRITE: Permissions = Permissions(1 << 1);
    pub const ADMIN: Permissions = Permissions(1 << 2);
    pub const USE: Permissions = Permissions(1 << 3);
    pub const EXECUTE: Permissions = Permissions(1 << 4);
    pub const ALL: Permissions = Permissions(0b1_1111);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Permissions(bits & Self::ALL.0)
    }

    pub fn contains(&self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Permissions) -> Permissions {
        Permissions(self.0 | other.0)
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        self.union(rhs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Organization,
    Team,
    Credential,
    Project,
    Inventory,
    JobTemplate,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Organization => "organization",
            ContentType::Team => "team",
            ContentType::Credential => "credential",
            ContentType::Project => "project",
            ContentType::Inventory => "inventory",
            ContentType::JobTemplate => "job_template",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "organization" => Some(ContentType::Organization),
            "team" => Some(ContentType::Team),
            "credential" => Some(ContentType::Credential),
            "project" => Some(ContentType::Project),
            "inventory" => Some(ContentType::Inventory),
            "job_template" => Some(ContentType::JobTemplate),
            _ => None,
        }
    }
}

pub const SYSTEM_ADMINISTRATOR: &str = "system_administrator";
pub const SYSTEM_AUDITOR: &str = "system_auditor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    /// 单例角色名
    pub singleton_name: Option<String>,
    pub role_field: String,
    pub content_type: Option<ContentType>,
    pub object_id: Option<i64>,
    pub permissions: Permissions,
    pub parents: Vec<i64>,
}

impl Role {
    pub fn singleton(name: impl Into<String>, permissions: Permissions) -> Self {
        let name = name.into();
        Self {
            id: 0,
            role_field: name.clone(),
            singleton_name: Some(name),
            content_type: None,
            object_id: None,
            permissions,
            parents: Vec::new(),
        }
    }

    pub fn implicit(
        content_type: ContentType,
        object_id: i64,
        role_field: impl Into<String>,
        permissions: Permissions,
    ) -> Self {
        Self {
            id: 0,
            singleton_name: None,
            role_field: role_field.into(),
            content_type: Some(content_type),
            object_id: Some(object_id),
            permissions,
            parents: Vec::new(),
        }
    }
}

/// 角色祖先闭包中的一行
///
/// 后代所属对象信息冗余存储，以便按对象类型和角色字段查询可访问对象。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAncestorEntry {
    pub ancestor_id: i64,
    pub descendant_id: i64,
    pub role_field: String,
    pub content_type: Option<ContentType>,
    pub object_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_bits() {
        let perms = Permissions::READ | Permissions::USE;
        assert!(perms.contains(Permissions::READ));
        assert!(perms.contains(Permissions::USE));
        assert!(!perms.contains(Permissions::ADMIN));
        assert!(Permissions::ALL.contains(perms));
        assert_eq!(Permissions::from_bits(0xff), Permissions::ALL);
    }

    #[test]
    fn test_content_type_names() {
        for ct in [
            ContentType::Organization,
            ContentType::Team,
            ContentType::Credential,
            ContentType::Project,
            ContentType::Inventory,
            ContentType::JobTemplate,
        ] {
            assert_eq!(ContentType::parse(ct.as_str()), Some(ct));
        }
    }
}
