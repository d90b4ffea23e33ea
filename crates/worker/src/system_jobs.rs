//! 系统维护作业
//!
//! 清理过期的作业、活动流和已停用的对象，不需要外部执行器。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use conductor_core::models::{SystemJobFields, SystemJobType};
use conductor_core::vars::parse_vars;
use conductor_core::{ConductorError, ConductorResult, MaintenanceRepository};
use serde_json::Value;
use tracing::{info, instrument};

/// 默认保留天数
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// 一次清理的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub job_type: SystemJobType,
    pub cutoff: DateTime<Utc>,
    pub deleted: u64,
}

impl CleanupReport {
    /// 写入作业输出的摘要
    pub fn summary(&self) -> String {
        let target = match self.job_type {
            SystemJobType::CleanupJobs => "作业",
            SystemJobType::CleanupActivitystream => "活动流记录",
            SystemJobType::CleanupDeleted => "已停用对象",
        };
        format!(
            "{}: 删除 {} 条早于 {} 的{}\n",
            self.job_type.as_str(),
            self.deleted,
            self.cutoff.to_rfc3339(),
            target
        )
    }
}

/// 从额外变量中读取 `days`
fn retention_days(extra_vars: &str) -> ConductorResult<i64> {
    let vars = parse_vars(extra_vars)?;
    let days = match vars.get("days") {
        None | Some(Value::Null) => DEFAULT_RETENTION_DAYS,
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ConductorError::validation("days 必须是整数"))?,
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| ConductorError::validation(format!("无效的保留天数: {s}")))?,
        Some(other) => {
            return Err(ConductorError::validation(format!(
                "无效的保留天数: {other}"
            )))
        }
    };
    if days < 0 {
        return Err(ConductorError::validation("保留天数不能为负数"));
    }
    Ok(days)
}

pub struct SystemJobRunner {
    maintenance: Arc<dyn MaintenanceRepository>,
}

impl SystemJobRunner {
    pub fn new(maintenance: Arc<dyn MaintenanceRepository>) -> Self {
        Self { maintenance }
    }

    #[instrument(skip(self, fields), fields(job_type = fields.job_type.as_str()))]
    pub async fn run(&self, fields: &SystemJobFields) -> ConductorResult<CleanupReport> {
        self.run_at(fields, Utc::now()).await
    }

    /// 以指定时间为基准执行
    pub async fn run_at(
        &self,
        fields: &SystemJobFields,
        now: DateTime<Utc>,
    ) -> ConductorResult<CleanupReport> {
        let days = retention_days(&fields.extra_vars)?;
        let cutoff = now - Duration::days(days);

        let deleted = match fields.job_type {
            SystemJobType::CleanupJobs => self.maintenance.delete_jobs_finished_before(cutoff).await?,
            SystemJobType::CleanupActivitystream => {
                self.maintenance.delete_activity_before(cutoff).await?
            }
            SystemJobType::CleanupDeleted => self.maintenance.purge_inactive(cutoff).await?,
        };

        info!(
            "系统作业 {} 完成，保留 {} 天，删除 {} 条",
            fields.job_type.as_str(),
            days,
            deleted
        );
        Ok(CleanupReport {
            job_type: fields.job_type,
            cutoff,
            deleted,
        })
    }
}
