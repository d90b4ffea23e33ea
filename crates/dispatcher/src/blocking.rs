//! 作业间的阻塞规则

use conductor_core::models::{JobDetails, LaunchType, UnifiedJob};

fn same<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// 两个回调作业的 limit 不同时可以并行
fn distinct_callbacks(a: &UnifiedJob, b: &UnifiedJob) -> bool {
    if a.launch_type != LaunchType::Callback || b.launch_type != LaunchType::Callback {
        return false;
    }
    match (a.job_fields(), b.job_fields()) {
        (Some(x), Some(y)) => x.limit != y.limit,
        _ => false,
    }
}

/// `candidate` 是否被正在运行（或本周期已放行）的 `other` 阻塞
pub fn blocked_by(candidate: &UnifiedJob, other: &UnifiedJob) -> bool {
    if candidate.id != 0 && candidate.id == other.id {
        return false;
    }
    use JobDetails::*;
    match (&candidate.details, &other.details) {
        (SystemJob(_), _) | (_, SystemJob(_)) => true,
        (Job(a), Job(b)) => {
            let same_template = same(candidate.template_id, other.template_id)
                && same(a.inventory_id, b.inventory_id);
            let simultaneous = a.allow_simultaneous || b.allow_simultaneous;
            same_template && !simultaneous && !distinct_callbacks(candidate, other)
        }
        (Job(a), InventoryUpdate(b)) | (InventoryUpdate(b), Job(a)) => {
            a.inventory_id == Some(b.inventory_id)
        }
        (Job(a), ProjectUpdate(b)) | (ProjectUpdate(b), Job(a)) => a.project_id == Some(b.project_id),
        (InventoryUpdate(a), InventoryUpdate(b)) => a.inventory_id == b.inventory_id,
        (ProjectUpdate(a), ProjectUpdate(b)) => a.project_id == b.project_id,
        (InventoryUpdate(_), ProjectUpdate(_)) | (ProjectUpdate(_), InventoryUpdate(_)) => false,
    }
}

/// 第一个阻塞 `candidate` 的作业
pub fn first_blocker<'a>(
    candidate: &UnifiedJob,
    active: impl IntoIterator<Item = &'a UnifiedJob>,
) -> Option<&'a UnifiedJob> {
    active.into_iter().find(|other| blocked_by(candidate, other))
}
