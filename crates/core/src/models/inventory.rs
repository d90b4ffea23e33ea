use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 清单级派生计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryCounters {
    pub total_hosts: i64,
    pub hosts_with_active_failures: i64,
    pub total_groups: i64,
    pub groups_with_active_failures: i64,
    pub has_inventory_sources: bool,
    pub total_inventory_sources: i64,
    pub inventory_sources_with_failures: i64,
    pub has_active_failures: bool,
}

/// 组级派生计数，`total_hosts` 为传递闭包内的活跃主机数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupCounters {
    pub total_hosts: i64,
    pub hosts_with_active_failures: i64,
    pub total_groups: i64,
    pub groups_with_active_failures: i64,
    pub has_active_failures: bool,
    pub has_inventory_sources: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub id: i64,
    pub name: String,
    pub organization_id: i64,
    pub description: String,
    pub variables: serde_json::Value,
    pub counters: InventoryCounters,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            organization_id: 0,
            description: String::new(),
            variables: serde_json::Value::Object(Default::default()),
            counters: InventoryCounters::default(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Host {
    pub id: i64,
    pub inventory_id: i64,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub instance_id: String,
    pub variables: serde_json::Value,
    pub last_job_id: Option<i64>,
    pub last_job_host_summary_id: Option<i64>,
    pub has_active_failures: bool,
    pub has_inventory_sources: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for Host {
    fn default() -> Self {
        Self {
            id: 0,
            inventory_id: 0,
            name: String::new(),
            description: String::new(),
            enabled: true,
            instance_id: String::new(),
            variables: serde_json::Value::Object(Default::default()),
            last_job_id: None,
            last_job_host_summary_id: None,
            has_active_failures: false,
            has_inventory_sources: false,
            active: true,
            created_at: Utc::now(),
        }
    }
}

impl Host {
    pub fn new(inventory_id: i64, name: impl Into<String>) -> Self {
        Self {
            inventory_id,
            name: name.into(),
            ..Default::default()
        }
    }

    /// `ansible_ssh_host` / `ansible_host` 变量
    pub fn connection_address(&self) -> Option<&str> {
        ["ansible_ssh_host", "ansible_host"]
            .iter()
            .find_map(|key| self.variables.get(*key).and_then(|v| v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    pub id: i64,
    pub inventory_id: i64,
    pub name: String,
    pub description: String,
    pub variables: serde_json::Value,
    pub counters: GroupCounters,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            id: 0,
            inventory_id: 0,
            name: String::new(),
            description: String::new(),
            variables: serde_json::Value::Object(Default::default()),
            counters: GroupCounters::default(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

impl Group {
    pub fn new(inventory_id: i64, name: impl Into<String>) -> Self {
        Self {
            inventory_id,
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventorySourceKind {
    #[default]
    Manual,
    File,
    Rax,
    Ec2,
    Gce,
    Azure,
    Vmware,
    Openstack,
    Custom,
}

impl InventorySourceKind {
    pub fn is_cloud(&self) -> bool {
        !matches!(self, InventorySourceKind::Manual | InventorySourceKind::File)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InventorySourceKind::Manual => "manual",
            InventorySourceKind::File => "file",
            InventorySourceKind::Rax => "rax",
            InventorySourceKind::Ec2 => "ec2",
            InventorySourceKind::Gce => "gce",
            InventorySourceKind::Azure => "azure",
            InventorySourceKind::Vmware => "vmware",
            InventorySourceKind::Openstack => "openstack",
            InventorySourceKind::Custom => "custom",
        }
    }
}

/// 清单来源，同时是清单同步作业的模板
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySource {
    pub id: i64,
    pub name: String,
    pub inventory_id: i64,
    pub group_id: Option<i64>,
    pub source: InventorySourceKind,
    pub source_path: String,
    pub source_script: String,
    pub source_vars: String,
    pub credential_id: Option<i64>,
    pub source_regions: String,
    pub instance_filters: String,
    pub group_by: String,
    pub overwrite: bool,
    pub overwrite_vars: bool,
    pub update_on_launch: bool,
    /// 秒
    pub update_cache_timeout: i64,
    pub last_update_failed: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_job_run: Option<DateTime<Utc>>,
    pub last_job_failed: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for InventorySource {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            inventory_id: 0,
            group_id: None,
            source: InventorySourceKind::Manual,
            source_path: String::new(),
            source_script: String::new(),
            source_vars: String::new(),
            credential_id: None,
            source_regions: String::new(),
            instance_filters: String::new(),
            group_by: String::new(),
            overwrite: false,
            overwrite_vars: false,
            update_on_launch: false,
            update_cache_timeout: 0,
            last_update_failed: false,
            last_updated: None,
            last_job_run: None,
            last_job_failed: false,
            active: true,
            created_at: Utc::now(),
        }
    }
}

impl InventorySource {
    pub fn needs_update_on_launch(&self, now: DateTime<Utc>) -> bool {
        if !self.active || self.source == InventorySourceKind::Manual || !self.update_on_launch {
            return false;
        }
        match self.last_updated {
            None => true,
            Some(last) => now >= last + Duration::seconds(self.update_cache_timeout),
        }
    }
}

/// 计算派生字段所需的清单快照，在同一事务内读取
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    pub inventory_id: i64,
    pub hosts: Vec<HostState>,
    pub groups: Vec<i64>,
    /// (child, parent)
    pub group_parents: Vec<(i64, i64)>,
    /// (group, host)
    pub group_hosts: Vec<(i64, i64)>,
    pub sources: Vec<SourceState>,
    /// (source, host)
    pub source_hosts: Vec<(i64, i64)>,
    /// (source, group)
    pub source_groups: Vec<(i64, i64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostState {
    pub id: i64,
    /// 最近一次活跃作业的主机汇总是否失败
    pub last_summary_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceState {
    pub id: i64,
    pub cloud: bool,
    pub last_update_failed: bool,
}

/// 一次重算的写入结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputedFields {
    pub inventory_id: i64,
    pub inventory: InventoryCounters,
    pub groups: Vec<(i64, GroupCounters)>,
    /// (host, has_active_failures, has_inventory_sources)
    pub hosts: Vec<(i64, bool, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_address() {
        let mut host = Host::new(1, "web1");
        assert_eq!(host.connection_address(), None);

        host.variables = json!({"ansible_host": "10.0.0.5"});
        assert_eq!(host.connection_address(), Some("10.0.0.5"));

        host.variables = json!({"ansible_ssh_host": "10.0.0.6", "ansible_host": "10.0.0.5"});
        assert_eq!(host.connection_address(), Some("10.0.0.6"));
    }

    #[test]
    fn test_source_needs_update() {
        let now = Utc::now();
        let mut source = InventorySource {
            source: InventorySourceKind::Ec2,
            update_on_launch: true,
            update_cache_timeout: 300,
            ..Default::default()
        };
        assert!(source.needs_update_on_launch(now));

        source.last_updated = Some(now - Duration::seconds(10));
        assert!(!source.needs_update_on_launch(now));

        source.source = InventorySourceKind::Manual;
        source.last_updated = None;
        assert!(!source.needs_update_on_launch(now));
    }
}
