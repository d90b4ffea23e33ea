//! 组/主机邻接表与传递闭包
//!
//! 组之间允许出现环，遍历统一使用工作队列加已访问集合。

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use conductor_core::models::InventorySnapshot;

/// 深度标注的上限
pub const MAX_DEPTH: usize = 100;

#[derive(Debug, Default, Clone)]
pub struct InventoryGraph {
    groups: BTreeSet<i64>,
    group_hosts: HashMap<i64, HashSet<i64>>,
    group_parents: HashMap<i64, HashSet<i64>>,
    group_children: HashMap<i64, HashSet<i64>>,
}

impl InventoryGraph {
    pub fn from_snapshot(snapshot: &InventorySnapshot) -> Self {
        let mut graph = InventoryGraph {
            groups: snapshot.groups.iter().copied().collect(),
            ..Default::default()
        };
        for &(child, parent) in &snapshot.group_parents {
            graph.group_parents.entry(child).or_default().insert(parent);
            graph.group_children.entry(parent).or_default().insert(child);
        }
        for &(group, host) in &snapshot.group_hosts {
            graph.group_hosts.entry(group).or_default().insert(host);
        }
        graph
    }

    pub fn groups(&self) -> impl Iterator<Item = i64> + '_ {
        self.groups.iter().copied()
    }

    pub fn direct_parents(&self, group: i64) -> HashSet<i64> {
        self.group_parents.get(&group).cloned().unwrap_or_default()
    }

    pub fn direct_children(&self, group: i64) -> HashSet<i64> {
        self.group_children.get(&group).cloned().unwrap_or_default()
    }

    pub fn direct_hosts(&self, group: i64) -> HashSet<i64> {
        self.group_hosts.get(&group).cloned().unwrap_or_default()
    }

    /// 主机直接所属的组
    pub fn groups_of_host(&self, host: i64) -> HashSet<i64> {
        self.group_hosts
            .iter()
            .filter(|(_, hosts)| hosts.contains(&host))
            .map(|(group, _)| *group)
            .collect()
    }

    fn walk(edges: &HashMap<i64, HashSet<i64>>, start: i64) -> HashSet<i64> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<i64> = edges
            .get(&start)
            .map(|next| next.iter().copied().collect())
            .unwrap_or_default();
        while let Some(current) = queue.pop_front() {
            if current == start || !visited.insert(current) {
                continue;
            }
            if let Some(next) = edges.get(&current) {
                queue.extend(next.iter().copied());
            }
        }
        visited
    }

    /// 传递子组，不含自身
    pub fn all_children(&self, group: i64) -> HashSet<i64> {
        Self::walk(&self.group_children, group)
    }

    /// 传递父组，不含自身
    pub fn all_parents(&self, group: i64) -> HashSet<i64> {
        Self::walk(&self.group_parents, group)
    }

    /// 自身及传递子组中的全部主机
    pub fn all_hosts(&self, group: i64) -> HashSet<i64> {
        let mut hosts = self.direct_hosts(group);
        for child in self.all_children(group) {
            if let Some(direct) = self.group_hosts.get(&child) {
                hosts.extend(direct.iter().copied());
            }
        }
        hosts
    }

    /// 组的深度：到任意根组的最长无环路径，上限 `MAX_DEPTH`
    pub fn depths(&self) -> HashMap<i64, usize> {
        let mut depths: HashMap<i64, usize> = self.groups.iter().map(|&g| (g, 0)).collect();
        let mut queue: VecDeque<(i64, usize)> = self
            .groups
            .iter()
            .filter(|g| self.direct_parents(**g).is_empty())
            .map(|&g| (g, 0))
            .collect();

        // 环上没有根组时，从任意未访问的组开始
        if queue.is_empty() {
            queue.extend(self.groups.iter().next().map(|&g| (g, 0)));
        }

        while let Some((group, depth)) = queue.pop_front() {
            let next = (depth + 1).min(MAX_DEPTH);
            for child in self.direct_children(group) {
                let slot = depths.entry(child).or_insert(0);
                if *slot < next {
                    *slot = next;
                    queue.push_back((child, next));
                }
            }
        }
        depths
    }

    /// 按深度从深到浅排序，深度相同按 id
    pub fn deepest_first(&self) -> Vec<i64> {
        let depths = self.depths();
        let mut order: Vec<i64> = self.groups.iter().copied().collect();
        order.sort_by(|a, b| {
            depths
                .get(b)
                .cmp(&depths.get(a))
                .then_with(|| a.cmp(b))
        });
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(groups: &[i64], parents: &[(i64, i64)], hosts: &[(i64, i64)]) -> InventorySnapshot {
        InventorySnapshot {
            inventory_id: 1,
            groups: groups.to_vec(),
            group_parents: parents.to_vec(),
            group_hosts: hosts.to_vec(),
            ..Default::default()
        }
    }

    fn sorted(set: HashSet<i64>) -> Vec<i64> {
        let mut v: Vec<i64> = set.into_iter().collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn test_closures_on_tree() {
        // 1 -> 2 -> 3, 1 -> 4
        let graph = InventoryGraph::from_snapshot(&snapshot(
            &[1, 2, 3, 4],
            &[(2, 1), (3, 2), (4, 1)],
            &[(3, 30), (4, 40), (1, 10)],
        ));
        assert_eq!(sorted(graph.all_children(1)), vec![2, 3, 4]);
        assert_eq!(sorted(graph.all_parents(3)), vec![1, 2]);
        assert_eq!(sorted(graph.all_hosts(1)), vec![10, 30, 40]);
        assert_eq!(sorted(graph.all_hosts(2)), vec![30]);
        assert_eq!(sorted(graph.groups_of_host(30)), vec![3]);
    }

    #[test]
    fn test_cycles_terminate() {
        // 1 -> 2 -> 3 -> 1
        let graph = InventoryGraph::from_snapshot(&snapshot(
            &[1, 2, 3],
            &[(2, 1), (3, 2), (1, 3)],
            &[(3, 30)],
        ));
        assert_eq!(sorted(graph.all_children(1)), vec![2, 3]);
        assert_eq!(sorted(graph.all_parents(1)), vec![2, 3]);
        assert_eq!(sorted(graph.all_hosts(2)), vec![30]);
        assert_eq!(graph.deepest_first().len(), 3);
    }

    #[test]
    fn test_deepest_first_order() {
        let graph = InventoryGraph::from_snapshot(&snapshot(
            &[1, 2, 3, 4],
            &[(2, 1), (3, 2), (4, 1)],
            &[],
        ));
        let order = graph.deepest_first();
        assert_eq!(order[0], 3);
        assert_eq!(*order.last().unwrap(), 1);
        assert_eq!(graph.depths()[&3], 2);
    }

    #[test]
    fn test_depth_is_capped() {
        let groups: Vec<i64> = (0..150).collect();
        let parents: Vec<(i64, i64)> = (1..150).map(|i| (i, i - 1)).collect();
        let graph = InventoryGraph::from_snapshot(&snapshot(&groups, &parents, &[]));
        assert_eq!(graph.depths()[&149], MAX_DEPTH);
    }
}
