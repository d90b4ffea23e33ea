//! 角色祖先闭包

use std::collections::{HashMap, HashSet, VecDeque};

use conductor_core::models::{Role, RoleAncestorEntry};
use conductor_core::{ConductorError, ConductorResult};

/// 计算完整的祖先表，每个角色都是自己的祖先
///
/// 父边形成环时返回 `Conflict`。
pub fn compute_ancestors(roles: &[Role]) -> ConductorResult<Vec<RoleAncestorEntry>> {
    let parents: HashMap<i64, &[i64]> = roles
        .iter()
        .map(|r| (r.id, r.parents.as_slice()))
        .collect();

    let mut entries = Vec::new();
    for role in roles {
        let mut visited: HashSet<i64> = HashSet::new();
        let mut queue: VecDeque<i64> = role.parents.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            if current == role.id {
                return Err(ConductorError::Conflict(format!(
                    "角色 {} 的父角色形成环",
                    role.id
                )));
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = parents.get(&current) {
                queue.extend(next.iter().copied());
            }
        }

        visited.insert(role.id);
        let mut ancestors: Vec<i64> = visited.into_iter().collect();
        ancestors.sort_unstable();
        entries.extend(ancestors.into_iter().map(|ancestor_id| RoleAncestorEntry {
            ancestor_id,
            descendant_id: role.id,
            role_field: role.role_field.clone(),
            content_type: role.content_type,
            object_id: role.object_id,
        }));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::models::{ContentType, Permissions};

    fn role(id: i64, parents: &[i64]) -> Role {
        let mut role = Role::implicit(ContentType::Inventory, 1, format!("r{id}"), Permissions::READ);
        role.id = id;
        role.parents = parents.to_vec();
        role
    }

    fn ancestors_of(entries: &[RoleAncestorEntry], id: i64) -> Vec<i64> {
        let mut out: Vec<i64> = entries
            .iter()
            .filter(|e| e.descendant_id == id)
            .map(|e| e.ancestor_id)
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_transitive_and_reflexive() {
        // 1 <- 2 <- 3, 4 <- 3
        let roles = vec![role(1, &[]), role(2, &[1]), role(3, &[2, 4]), role(4, &[])];
        let entries = compute_ancestors(&roles).unwrap();
        assert_eq!(ancestors_of(&entries, 1), vec![1]);
        assert_eq!(ancestors_of(&entries, 2), vec![1, 2]);
        assert_eq!(ancestors_of(&entries, 3), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_diamond_has_no_duplicates() {
        let roles = vec![role(1, &[]), role(2, &[1]), role(3, &[1]), role(4, &[2, 3])];
        let entries = compute_ancestors(&roles).unwrap();
        assert_eq!(ancestors_of(&entries, 4), vec![1, 2, 3, 4]);
        let entry = entries.iter().find(|e| e.descendant_id == 4).unwrap();
        assert_eq!(entry.role_field, "r4");
        assert_eq!(entry.object_id, Some(1));
    }

    #[test]
    fn test_cycle_is_conflict() {
        let roles = vec![role(1, &[3]), role(2, &[1]), role(3, &[2])];
        assert!(matches!(
            compute_ancestors(&roles),
            Err(ConductorError::Conflict(_))
        ));
    }
}
