use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobStatus;

/// 命名队列
pub mod queues {
    pub const DEFAULT: &str = "default";
    pub const JOBS: &str = "jobs";
    pub const SCHEDULER: &str = "scheduler";
    pub const CALLBACK_TASKS: &str = "callback_tasks";
    pub const FACTS: &str = "facts";

    pub const ALL: [&str; 5] = [DEFAULT, JOBS, SCHEDULER, CALLBACK_TASKS, FACTS];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub retry_count: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// 调度器将作业交给 worker
    JobDispatch { job_id: i64 },
    /// worker 报告作业结束
    JobCompleted { job_id: i64, status: JobStatus },
    /// 请求重新计算清单派生字段
    InventoryRecompute { inventory_id: i64 },
    /// 主机配置回调
    HostCallback { template_id: i64, host_name: String },
}

impl Message {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn job_dispatch(job_id: i64) -> Self {
        Self::new(MessageType::JobDispatch { job_id })
    }

    pub fn job_completed(job_id: i64, status: JobStatus) -> Self {
        Self::new(MessageType::JobCompleted { job_id, status })
    }

    pub fn inventory_recompute(inventory_id: i64) -> Self {
        Self::new(MessageType::InventoryRecompute { inventory_id })
    }

    pub fn host_callback(template_id: i64, host_name: impl Into<String>) -> Self {
        Self::new(MessageType::HostCallback {
            template_id,
            host_name: host_name.into(),
        })
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn is_retry_exhausted(&self, max_retries: i32) -> bool {
        self.retry_count >= max_retries
    }

    /// 消息应投递的队列
    pub fn queue(&self) -> &'static str {
        match &self.message_type {
            MessageType::JobDispatch { .. } => queues::JOBS,
            MessageType::JobCompleted { .. } => queues::SCHEDULER,
            MessageType::InventoryRecompute { .. } => queues::DEFAULT,
            MessageType::HostCallback { .. } => queues::CALLBACK_TASKS,
        }
    }

    pub fn message_type_str(&self) -> &'static str {
        match &self.message_type {
            MessageType::JobDispatch { .. } => "job_dispatch",
            MessageType::JobCompleted { .. } => "job_completed",
            MessageType::InventoryRecompute { .. } => "inventory_recompute",
            MessageType::HostCallback { .. } => "host_callback",
        }
    }
}
