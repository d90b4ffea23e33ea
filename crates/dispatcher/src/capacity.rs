//! 作业资源占用与节点容量

use conductor_core::models::{JobDetails, LaunchType, UnifiedJob};
use tracing::{debug, warn};

/// 未设置 forks 时的默认并发
pub const DEFAULT_FORKS: i64 = 5;

pub const CALLBACK_IMPACT: i64 = 10;
pub const INVENTORY_UPDATE_IMPACT: i64 = 50;
pub const PROJECT_UPDATE_IMPACT: i64 = 20;
pub const SYSTEM_JOB_IMPACT: i64 = 150;

/// 容量下限
pub const MIN_CAPACITY: i64 = 50;

/// 作业的资源占用
///
/// playbook 作业为 `min(主机数, forks) × 10`；回调作业固定为 10。
pub fn task_impact(job: &UnifiedJob, host_count: i64) -> i64 {
    match &job.details {
        JobDetails::Job(fields) => {
            if job.launch_type == LaunchType::Callback {
                return CALLBACK_IMPACT;
            }
            let forks = if fields.forks > 0 {
                fields.forks as i64
            } else {
                DEFAULT_FORKS
            };
            host_count.max(0).min(forks) * 10
        }
        JobDetails::ProjectUpdate(_) => PROJECT_UPDATE_IMPACT,
        JobDetails::InventoryUpdate(_) => INVENTORY_UPDATE_IMPACT,
        JobDetails::SystemJob(_) => SYSTEM_JOB_IMPACT,
    }
}

/// 按内存估算容量：`50 + max(0, GB - 2) × 75`
pub fn capacity_for_memory(memory_gb: i64) -> i64 {
    (50 + (memory_gb - 2).max(0) * 75).max(MIN_CAPACITY)
}

/// 读取本机内存（GB，向下取整）
pub fn detect_memory_gb() -> Option<i64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let kb: i64 = meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;
    Some(kb / 1024 / 1024)
}

/// 节点总容量，配置了覆盖值时直接使用
pub fn system_capacity(capacity_override: Option<u32>) -> i64 {
    if let Some(capacity) = capacity_override {
        return capacity as i64;
    }
    match detect_memory_gb() {
        Some(gb) => {
            let capacity = capacity_for_memory(gb);
            debug!("内存 {}GB，容量 {}", gb, capacity);
            capacity
        }
        None => {
            warn!("无法读取内存信息，使用最小容量 {}", MIN_CAPACITY);
            MIN_CAPACITY
        }
    }
}

/// 单个调度周期内的容量账本
#[derive(Debug, Clone)]
pub struct CapacityLedger {
    total: i64,
    used: i64,
    admitted: usize,
}

impl CapacityLedger {
    pub fn new(total: i64) -> Self {
        Self {
            total,
            used: 0,
            admitted: 0,
        }
    }

    /// 计入已在运行的作业
    pub fn occupy(&mut self, impact: i64) {
        self.used += impact;
        self.admitted += 1;
    }

    /// 空闲节点总能接纳一个作业，即使其占用超过总容量
    pub fn fits(&self, impact: i64) -> bool {
        self.admitted == 0 || self.used + impact <= self.total
    }

    pub fn remaining(&self) -> i64 {
        self.total - self.used
    }

    pub fn total(&self) -> i64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::models::{
        InventoryUpdateFields, JobFields, ProjectUpdateFields, SystemJobFields, SystemJobType,
    };

    fn playbook(forks: i32) -> UnifiedJob {
        UnifiedJob::new(
            "deploy",
            Some(1),
            JobDetails::Job(JobFields {
                forks,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_playbook_impact_uses_forks_or_default() {
        assert_eq!(task_impact(&playbook(0), 3), 30);
        assert_eq!(task_impact(&playbook(0), 40), 50);
        assert_eq!(task_impact(&playbook(20), 40), 200);
        assert_eq!(task_impact(&playbook(2), 0), 0);
    }

    #[test]
    fn test_fixed_impacts() {
        let mut callback = playbook(10);
        callback.launch_type = LaunchType::Callback;
        assert_eq!(task_impact(&callback, 100), CALLBACK_IMPACT);

        let update = UnifiedJob::new(
            "sync",
            Some(2),
            JobDetails::InventoryUpdate(InventoryUpdateFields::default()),
        );
        assert_eq!(task_impact(&update, 0), 50);

        let scm = UnifiedJob::new(
            "scm",
            Some(3),
            JobDetails::ProjectUpdate(ProjectUpdateFields::default()),
        );
        assert_eq!(task_impact(&scm, 0), 20);

        let system = UnifiedJob::new(
            "cleanup",
            Some(4),
            JobDetails::SystemJob(SystemJobFields {
                job_type: SystemJobType::CleanupJobs,
                extra_vars: String::new(),
            }),
        );
        assert_eq!(task_impact(&system, 0), 150);
    }

    #[test]
    fn test_capacity_for_memory() {
        assert_eq!(capacity_for_memory(1), 50);
        assert_eq!(capacity_for_memory(2), 50);
        assert_eq!(capacity_for_memory(4), 200);
        assert_eq!(capacity_for_memory(16), 1100);
        assert_eq!(system_capacity(Some(75)), 75);
    }

    #[test]
    fn test_idle_system_admits_oversized_job() {
        let mut ledger = CapacityLedger::new(50);
        assert!(ledger.fits(150));
        ledger.occupy(150);
        assert!(!ledger.fits(10));
        assert_eq!(ledger.remaining(), -100);

        let mut ledger = CapacityLedger::new(100);
        ledger.occupy(30);
        assert!(ledger.fits(70));
        assert!(!ledger.fits(71));
    }
}
