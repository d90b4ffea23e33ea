//! 派生字段计算

use std::collections::HashSet;

use conductor_core::models::{ComputedFields, GroupCounters, InventoryCounters, InventorySnapshot};

use super::graph::InventoryGraph;

/// 根据快照计算主机、组与清单的全部派生字段
pub fn compute(snapshot: &InventorySnapshot) -> ComputedFields {
    let graph = InventoryGraph::from_snapshot(snapshot);

    let active_hosts: HashSet<i64> = snapshot.hosts.iter().map(|h| h.id).collect();
    let failed_hosts: HashSet<i64> = snapshot
        .hosts
        .iter()
        .filter(|h| h.last_summary_failed)
        .map(|h| h.id)
        .collect();

    let cloud_sources: HashSet<i64> = snapshot
        .sources
        .iter()
        .filter(|s| s.cloud)
        .map(|s| s.id)
        .collect();
    let sourced_hosts: HashSet<i64> = snapshot
        .source_hosts
        .iter()
        .filter(|(source, _)| cloud_sources.contains(source))
        .map(|(_, host)| *host)
        .collect();
    let sourced_groups: HashSet<i64> = snapshot
        .source_groups
        .iter()
        .filter(|(source, _)| cloud_sources.contains(source))
        .map(|(_, group)| *group)
        .collect();

    let hosts = snapshot
        .hosts
        .iter()
        .map(|h| (h.id, h.last_summary_failed, sourced_hosts.contains(&h.id)))
        .collect();

    let mut failed_groups: HashSet<i64> = HashSet::new();
    let mut groups = Vec::with_capacity(snapshot.groups.len());
    for group in graph.deepest_first() {
        let transitive_hosts = graph.all_hosts(group);
        let transitive_children = graph.all_children(group);

        let total_hosts = transitive_hosts.intersection(&active_hosts).count() as i64;
        let hosts_with_active_failures =
            transitive_hosts.intersection(&failed_hosts).count() as i64;
        let groups_with_active_failures =
            transitive_children.intersection(&failed_groups).count() as i64;
        let has_active_failures = hosts_with_active_failures > 0 || groups_with_active_failures > 0;
        if has_active_failures {
            failed_groups.insert(group);
        }

        groups.push((
            group,
            GroupCounters {
                total_hosts,
                hosts_with_active_failures,
                total_groups: transitive_children.len() as i64,
                groups_with_active_failures,
                has_active_failures,
                has_inventory_sources: sourced_groups.contains(&group),
            },
        ));
    }

    let total_inventory_sources = cloud_sources.len() as i64;
    let inventory_sources_with_failures = snapshot
        .sources
        .iter()
        .filter(|s| s.cloud && s.last_update_failed)
        .count() as i64;

    ComputedFields {
        inventory_id: snapshot.inventory_id,
        inventory: InventoryCounters {
            total_hosts: active_hosts.len() as i64,
            hosts_with_active_failures: failed_hosts.len() as i64,
            total_groups: snapshot.groups.len() as i64,
            groups_with_active_failures: failed_groups.len() as i64,
            has_inventory_sources: total_inventory_sources > 0,
            total_inventory_sources,
            inventory_sources_with_failures,
            has_active_failures: !failed_hosts.is_empty(),
        },
        groups,
        hosts,
    }
}
