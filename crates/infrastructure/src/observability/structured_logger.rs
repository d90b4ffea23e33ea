//! 结构化日志
//!
//! 作业生命周期中的关键节点统一从这里输出，字段名保持稳定以便检索。

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_job_launched(job_id: i64, name: &str, kind: &str, launch_type: &str) {
        info!(
            event = "job_launched",
            job.id = job_id,
            job.name = name,
            job.kind = kind,
            job.launch_type = launch_type,
            "作业已创建"
        );
    }

    pub fn log_dependencies_injected(job_id: i64, dependencies: &[i64]) {
        if dependencies.is_empty() {
            return;
        }
        info!(
            event = "dependencies_injected",
            job.id = job_id,
            job.dependencies = ?dependencies,
            "注入前置更新作业"
        );
    }

    pub fn log_job_blocked(job_id: i64, blocked_by: i64) {
        debug!(
            event = "job_blocked",
            job.id = job_id,
            job.blocked_by = blocked_by,
            "作业被阻塞"
        );
    }

    pub fn log_job_dispatched(job_id: i64, impact: i64, capacity_remaining: i64) {
        info!(
            event = "job_dispatched",
            job.id = job_id,
            job.impact = impact,
            scheduler.capacity_remaining = capacity_remaining,
            "作业已派发"
        );
    }

    pub fn log_job_started(job_id: i64, kind: &str, node: &str) {
        info!(
            event = "job_started",
            job.id = job_id,
            job.kind = kind,
            worker.node = node,
            "作业开始执行"
        );
    }

    pub fn log_job_finished(
        job_id: i64,
        status: &str,
        finished_at: Option<DateTime<Utc>>,
        explanation: &str,
    ) {
        match status {
            "successful" => info!(
                event = "job_finished",
                job.id = job_id,
                job.status = status,
                job.finished_at = ?finished_at,
                "作业执行成功"
            ),
            "canceled" => warn!(
                event = "job_finished",
                job.id = job_id,
                job.status = status,
                job.explanation = explanation,
                "作业已取消"
            ),
            _ => error!(
                event = "job_finished",
                job.id = job_id,
                job.status = status,
                job.explanation = explanation,
                "作业执行失败"
            ),
        }
    }

    pub fn log_cancel_requested(job_id: i64, status: &str) {
        info!(
            event = "job_cancel_requested",
            job.id = job_id,
            job.status = status,
            "收到取消请求"
        );
    }

    pub fn log_inventory_recomputed(inventory_id: i64, hosts: usize, groups: usize, duration_ms: u64) {
        debug!(
            event = "inventory_recomputed",
            inventory.id = inventory_id,
            inventory.hosts = hosts,
            inventory.groups = groups,
            inventory.duration_ms = duration_ms,
            "清单派生字段已更新"
        );
    }

    pub fn log_schedule_fired(schedule_id: i64, template_id: i64, next_run: Option<DateTime<Utc>>) {
        info!(
            event = "schedule_fired",
            schedule.id = schedule_id,
            schedule.template_id = template_id,
            schedule.next_run = ?next_run,
            "计划触发"
        );
    }

    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            error.component = component,
            error.operation = operation,
            error.message = %error,
            "系统错误"
        );
    }
}
