use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use conductor_core::models::{Group, Host};
use conductor_core::{
    ConductorError, ConductorResult, InventoryRepository, RetryConfig, TriggerContext,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::computed::compute;
use super::graph::InventoryGraph;

/// 每个清单一个槽位：锁串行化重算，`waiting` 标记已有请求在排队
#[derive(Default)]
struct RecomputeSlot {
    lock: Mutex<()>,
    waiting: AtomicBool,
}

/// 清单图服务
///
/// 单条编辑后自动重算派生字段，全局 `updating`/`removing` 作用域或
/// 该清单自身的作用域内跳过。
pub struct InventoryService {
    inventories: Arc<dyn InventoryRepository>,
    triggers: Arc<TriggerContext>,
    slots: std::sync::Mutex<HashMap<i64, Arc<RecomputeSlot>>>,
    retry: RetryConfig,
    batch_size: usize,
}

impl InventoryService {
    pub fn new(inventories: Arc<dyn InventoryRepository>, triggers: Arc<TriggerContext>) -> Self {
        Self {
            inventories,
            triggers,
            slots: std::sync::Mutex::new(HashMap::new()),
            retry: RetryConfig::default(),
            batch_size: 500,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn triggers(&self) -> &Arc<TriggerContext> {
        &self.triggers
    }

    fn slot(&self, inventory_id: i64) -> Arc<RecomputeSlot> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(inventory_id).or_default().clone()
    }

    /// 重算清单派生字段
    ///
    /// 同一清单已有请求在排队时直接并入该请求，返回 `false`。
    #[instrument(skip(self))]
    pub async fn update_computed_fields(&self, inventory_id: i64) -> ConductorResult<bool> {
        let slot = self.slot(inventory_id);
        if slot.waiting.swap(true, Ordering::SeqCst) {
            debug!("清单 {} 已有排队的重算请求，合并", inventory_id);
            return Ok(false);
        }

        let _lock = slot.lock.lock().await;
        slot.waiting.store(false, Ordering::SeqCst);

        let inventories = &self.inventories;
        let batch_size = self.batch_size;
        let fields = self
            .retry
            .run("inventory_recompute", move || async move {
                let snapshot = inventories.load_snapshot(inventory_id).await?;
                let fields = compute(&snapshot);
                inventories.apply_computed_fields(&fields, batch_size).await?;
                Ok(fields)
            })
            .await?;

        debug!(
            "清单 {} 派生字段已更新: {} 台主机, {} 个组",
            inventory_id, fields.inventory.total_hosts, fields.inventory.total_groups
        );
        Ok(true)
    }

    async fn after_edit(&self, inventory_id: i64) -> ConductorResult<()> {
        if self.triggers.recompute_enabled_for(inventory_id) {
            self.update_computed_fields(inventory_id).await?;
        }
        Ok(())
    }

    async fn group(&self, id: i64) -> ConductorResult<Group> {
        self.inventories
            .get_group(id)
            .await?
            .filter(|g| g.active)
            .ok_or_else(|| ConductorError::not_found("组", id))
    }

    async fn host(&self, id: i64) -> ConductorResult<Host> {
        self.inventories
            .get_host(id)
            .await?
            .filter(|h| h.active)
            .ok_or_else(|| ConductorError::not_found("主机", id))
    }

    pub async fn create_host(&self, host: &Host) -> ConductorResult<Host> {
        if host.name.trim().is_empty() {
            return Err(ConductorError::validation("主机名不能为空"));
        }
        let created = self.inventories.create_host(host).await?;
        self.after_edit(created.inventory_id).await?;
        Ok(created)
    }

    pub async fn create_group(&self, group: &Group) -> ConductorResult<Group> {
        if group.name.trim().is_empty() {
            return Err(ConductorError::validation("组名不能为空"));
        }
        let created = self.inventories.create_group(group).await?;
        self.after_edit(created.inventory_id).await?;
        Ok(created)
    }

    /// 添加子组，两者必须属于同一清单
    pub async fn add_group_child(&self, parent_id: i64, child_id: i64) -> ConductorResult<()> {
        if parent_id == child_id {
            return Err(ConductorError::validation("组不能成为自己的子组"));
        }
        let parent = self.group(parent_id).await?;
        let child = self.group(child_id).await?;
        if parent.inventory_id != child.inventory_id {
            return Err(ConductorError::validation("子组必须属于同一清单"));
        }
        self.inventories.add_group_child(parent_id, child_id).await?;
        self.after_edit(parent.inventory_id).await
    }

    pub async fn remove_group_child(&self, parent_id: i64, child_id: i64) -> ConductorResult<()> {
        let parent = self.group(parent_id).await?;
        self.inventories
            .remove_group_child(parent_id, child_id)
            .await?;
        self.after_edit(parent.inventory_id).await
    }

    pub async fn add_group_host(&self, group_id: i64, host_id: i64) -> ConductorResult<()> {
        let group = self.group(group_id).await?;
        let host = self.host(host_id).await?;
        if group.inventory_id != host.inventory_id {
            return Err(ConductorError::validation("主机必须属于组所在的清单"));
        }
        self.inventories.add_group_host(group_id, host_id).await?;
        self.after_edit(group.inventory_id).await
    }

    pub async fn remove_group_host(&self, group_id: i64, host_id: i64) -> ConductorResult<()> {
        let group = self.group(group_id).await?;
        self.inventories.remove_group_host(group_id, host_id).await?;
        self.after_edit(group.inventory_id).await
    }

    /// 记录主机来自某个清单来源
    pub async fn link_source_host(&self, source_id: i64, host_id: i64) -> ConductorResult<()> {
        let host = self.host(host_id).await?;
        self.inventories.add_source_host(source_id, host_id).await?;
        self.after_edit(host.inventory_id).await
    }

    pub async fn link_source_group(&self, source_id: i64, group_id: i64) -> ConductorResult<()> {
        let group = self.group(group_id).await?;
        self.inventories.add_source_group(source_id, group_id).await?;
        self.after_edit(group.inventory_id).await
    }

    pub async fn mark_host_inactive(&self, host_id: i64) -> ConductorResult<()> {
        let host = self.host(host_id).await?;
        self.inventories
            .mark_inactive(host.inventory_id, &[], &[host_id], Utc::now())
            .await?;
        info!("停用主机 {} ({})", host.name, host_id);
        self.after_edit(host.inventory_id).await
    }

    /// 停用组
    ///
    /// 递归模式下，没有其他活跃父组的子组一并停用，不再属于任何活跃组的
    /// 主机也一并停用。整个过程基于同一份快照，结束后只重算一次。
    #[instrument(skip(self))]
    pub async fn mark_group_inactive(&self, group_id: i64, recursive: bool) -> ConductorResult<()> {
        let group = self.group(group_id).await?;
        let inventory_id = group.inventory_id;

        let (groups, hosts) = {
            let _removing = self.triggers.updating_inventory(inventory_id);
            let (groups, hosts) = if recursive {
                let snapshot = self.inventories.load_snapshot(inventory_id).await?;
                removal_set(&InventoryGraph::from_snapshot(&snapshot), group_id)
            } else {
                (vec![group_id], Vec::new())
            };
            self.inventories
                .mark_inactive(inventory_id, &groups, &hosts, Utc::now())
                .await?;
            (groups, hosts)
        };

        info!(
            "停用组 {}: 共 {} 个组, {} 台主机",
            group.name,
            groups.len(),
            hosts.len()
        );
        self.after_edit(inventory_id).await
    }
}

/// 递归停用时需要一并停用的组与主机
fn removal_set(graph: &InventoryGraph, root: i64) -> (Vec<i64>, Vec<i64>) {
    let candidates = graph.all_children(root);
    let mut removed: HashSet<i64> = HashSet::from([root]);
    loop {
        let mut changed = false;
        for &child in &candidates {
            if removed.contains(&child) {
                continue;
            }
            if graph
                .direct_parents(child)
                .iter()
                .all(|parent| removed.contains(parent))
            {
                removed.insert(child);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut hosts: Vec<i64> = removed
        .iter()
        .flat_map(|g| graph.direct_hosts(*g))
        .collect::<HashSet<_>>()
        .into_iter()
        .filter(|host| {
            graph
                .groups_of_host(*host)
                .iter()
                .all(|g| removed.contains(g))
        })
        .collect();
    hosts.sort_unstable();

    let mut groups: Vec<i64> = removed.into_iter().collect();
    groups.sort_unstable();
    (groups, hosts)
}
