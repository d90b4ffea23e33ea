//! 清单同步结果导入
//!
//! 解析 `ansible-inventory --list` 的输出：顶层每个键是一个组，
//! `_meta.hostvars` 保存主机变量。导入的主机和组都关联到来源，
//! 开启覆盖时来源下不再出现的主机和组会被停用。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use conductor_core::models::{Group, Host, InventoryUpdateFields};
use conductor_core::{ConductorError, ConductorResult, InventoryRepository};
use conductor_domain::InventoryService;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

const IMPLICIT_GROUPS: &[&str] = &["all", "ungrouped"];

/// 解析后的清单
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedInventory {
    pub hosts: BTreeMap<String, Value>,
    /// 组名 -> (直接主机, 子组, 变量)
    pub groups: BTreeMap<String, ImportedGroup>,
    /// 没有任何组的主机
    pub ungrouped: BTreeSet<String>,
    /// `all` 的直接子组
    pub top_level: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedGroup {
    pub hosts: BTreeSet<String>,
    pub children: BTreeSet<String>,
    pub variables: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub hosts_added: usize,
    pub hosts_updated: usize,
    pub groups_added: usize,
    pub hosts_removed: usize,
    pub groups_removed: usize,
}

fn names(value: Option<&Value>) -> BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn object_or_empty(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    }
}

/// 解析 `--list` 输出
pub fn parse_inventory(data: &Value) -> ConductorResult<ImportedInventory> {
    let root = data
        .as_object()
        .ok_or_else(|| ConductorError::validation("清单输出必须是 JSON 对象"))?;

    let mut imported = ImportedInventory::default();
    if let Some(Value::Object(hostvars)) = root.get("_meta").and_then(|m| m.get("hostvars")) {
        for (name, vars) in hostvars {
            imported
                .hosts
                .insert(name.clone(), object_or_empty(Some(vars)));
        }
    }

    for (name, entry) in root {
        if name == "_meta" {
            continue;
        }
        // 旧格式允许组直接是主机名列表
        let (hosts, children, variables) = match entry {
            Value::Array(_) => (names(Some(entry)), BTreeSet::new(), object_or_empty(None)),
            Value::Object(group) => (
                names(group.get("hosts")),
                names(group.get("children")),
                object_or_empty(group.get("vars")),
            ),
            _ => continue,
        };
        for host in &hosts {
            imported
                .hosts
                .entry(host.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        match name.as_str() {
            "all" => imported.top_level.extend(children),
            "ungrouped" => imported.ungrouped.extend(hosts),
            _ => {
                imported.groups.insert(
                    name.clone(),
                    ImportedGroup {
                        hosts,
                        children,
                        variables,
                    },
                );
            }
        }
    }

    imported.top_level.retain(|g| !IMPLICIT_GROUPS.contains(&g.as_str()));
    if imported.top_level.is_empty() {
        let nested: HashSet<&String> = imported
            .groups
            .values()
            .flat_map(|g| g.children.iter())
            .collect();
        imported.top_level = imported
            .groups
            .keys()
            .filter(|name| !nested.contains(name))
            .cloned()
            .collect();
    }
    Ok(imported)
}

pub struct InventoryImporter {
    inventories: Arc<dyn InventoryRepository>,
    service: Arc<InventoryService>,
}

impl InventoryImporter {
    pub fn new(inventories: Arc<dyn InventoryRepository>, service: Arc<InventoryService>) -> Self {
        Self {
            inventories,
            service,
        }
    }

    #[instrument(skip(self, fields, data), fields(source.id = fields.inventory_source_id))]
    pub async fn import(
        &self,
        fields: &InventoryUpdateFields,
        data: &Value,
    ) -> ConductorResult<ImportSummary> {
        let imported = parse_inventory(data)?;
        let summary = {
            // 逐条编辑不重算，导入结束后统一重算一次
            let _updating = self.service.triggers().updating_inventory(fields.inventory_id);
            self.apply(fields, &imported).await?
        };
        self.service.update_computed_fields(fields.inventory_id).await?;

        info!(
            "清单来源 {} 导入完成: 新增主机 {}, 更新主机 {}, 新增组 {}, 停用主机 {}, 停用组 {}",
            fields.inventory_source_id,
            summary.hosts_added,
            summary.hosts_updated,
            summary.groups_added,
            summary.hosts_removed,
            summary.groups_removed
        );
        Ok(summary)
    }

    async fn apply(
        &self,
        fields: &InventoryUpdateFields,
        imported: &ImportedInventory,
    ) -> ConductorResult<ImportSummary> {
        let inventory_id = fields.inventory_id;
        let source_id = fields.inventory_source_id;
        let mut summary = ImportSummary::default();

        let mut group_ids: HashMap<String, i64> = self
            .inventories
            .list_groups(inventory_id)
            .await?
            .into_iter()
            .filter(|g| g.active)
            .map(|g| (g.name, g.id))
            .collect();

        for (name, group) in &imported.groups {
            let id = match group_ids.get(name) {
                Some(id) => *id,
                None => {
                    let mut new_group = Group::new(inventory_id, name.clone());
                    new_group.variables = group.variables.clone();
                    let created = self.service.create_group(&new_group).await?;
                    summary.groups_added += 1;
                    group_ids.insert(name.clone(), created.id);
                    created.id
                }
            };
            self.service.link_source_group(source_id, id).await?;
        }

        let mut host_ids: HashMap<String, i64> = HashMap::new();
        for (name, variables) in &imported.hosts {
            let id = match self.inventories.find_host(inventory_id, name).await? {
                Some(mut existing) => {
                    let merged = merge_variables(&existing.variables, variables, fields.overwrite_vars);
                    if merged != existing.variables {
                        existing.variables = merged;
                        self.inventories.update_host(&existing).await?;
                        summary.hosts_updated += 1;
                    }
                    existing.id
                }
                None => {
                    let mut host = Host::new(inventory_id, name.clone());
                    host.variables = variables.clone();
                    let created = self.service.create_host(&host).await?;
                    summary.hosts_added += 1;
                    created.id
                }
            };
            self.service.link_source_host(source_id, id).await?;
            host_ids.insert(name.clone(), id);
        }

        for (name, group) in &imported.groups {
            let Some(group_id) = group_ids.get(name).copied() else {
                continue;
            };
            for host in &group.hosts {
                if let Some(host_id) = host_ids.get(host) {
                    self.service.add_group_host(group_id, *host_id).await?;
                }
            }
            for child in &group.children {
                let Some(child_id) = group_ids.get(child).copied() else {
                    continue;
                };
                if let Err(e) = self.service.add_group_child(group_id, child_id).await {
                    warn!("无法添加子组 {} -> {}: {}", name, child, e);
                }
            }
        }

        // 挂到来源所属的组下
        if let Some(parent_id) = fields.group_id {
            for name in &imported.top_level {
                if let Some(child_id) = group_ids.get(name).copied() {
                    if child_id != parent_id {
                        self.service.add_group_child(parent_id, child_id).await?;
                    }
                }
            }
            for host in &imported.ungrouped {
                if let Some(host_id) = host_ids.get(host) {
                    self.service.add_group_host(parent_id, *host_id).await?;
                }
            }
        }

        if fields.overwrite {
            let snapshot = self.inventories.load_snapshot(inventory_id).await?;
            let kept_hosts: HashSet<i64> = host_ids.values().copied().collect();
            let kept_groups: HashSet<i64> = imported
                .groups
                .keys()
                .filter_map(|name| group_ids.get(name).copied())
                .collect();

            for (source, host_id) in &snapshot.source_hosts {
                if *source == source_id && !kept_hosts.contains(host_id) {
                    self.service.mark_host_inactive(*host_id).await?;
                    summary.hosts_removed += 1;
                }
            }
            for (source, group_id) in &snapshot.source_groups {
                if *source == source_id && !kept_groups.contains(group_id) {
                    self.service.mark_group_inactive(*group_id, false).await?;
                    summary.groups_removed += 1;
                }
            }
        }

        Ok(summary)
    }
}

/// 覆盖模式直接替换，否则只补充缺少的键
fn merge_variables(existing: &Value, incoming: &Value, overwrite: bool) -> Value {
    if overwrite {
        return incoming.clone();
    }
    let mut merged = match existing {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(incoming) = incoming {
        for (key, value) in incoming {
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Value::Object(merged)
}
