use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InventorySourceKind, JobType, ScmType, SystemJobType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    New,
    Pending,
    Waiting,
    Running,
    Successful,
    Failed,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Pending => "pending",
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(JobStatus::New),
            "pending" => Some(JobStatus::Pending),
            "waiting" => Some(JobStatus::Waiting),
            "running" => Some(JobStatus::Running),
            "successful" => Some(JobStatus::Successful),
            "failed" => Some(JobStatus::Failed),
            "error" => Some(JobStatus::Error),
            "canceled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Failed | JobStatus::Error | JobStatus::Canceled
        )
    }

    /// 已排队或正在运行
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Waiting | JobStatus::Running
        )
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            JobStatus::New | JobStatus::Pending | JobStatus::Waiting | JobStatus::Running
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchType {
    #[default]
    Manual,
    Relaunch,
    Callback,
    Scheduled,
    Dependency,
}

impl LaunchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchType::Manual => "manual",
            LaunchType::Relaunch => "relaunch",
            LaunchType::Callback => "callback",
            LaunchType::Scheduled => "scheduled",
            LaunchType::Dependency => "dependency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Job,
    ProjectUpdate,
    InventoryUpdate,
    SystemJob,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Job => "job",
            JobKind::ProjectUpdate => "project_update",
            JobKind::InventoryUpdate => "inventory_update",
            JobKind::SystemJob => "system_job",
        }
    }
}

/// playbook 作业的冻结字段
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFields {
    pub job_type: JobType,
    pub inventory_id: Option<i64>,
    pub project_id: Option<i64>,
    pub playbook: String,
    pub credential_id: Option<i64>,
    pub cloud_credential_id: Option<i64>,
    pub network_credential_id: Option<i64>,
    pub forks: i32,
    pub limit: String,
    pub verbosity: i32,
    /// JSON 文本
    pub extra_vars: String,
    pub job_tags: String,
    pub skip_tags: String,
    pub become_enabled: bool,
    pub allow_simultaneous: bool,
    /// 输出中需要遮蔽的调查密码变量
    pub survey_passwords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectUpdateFields {
    pub project_id: i64,
    pub scm_type: ScmType,
    pub scm_url: String,
    pub scm_branch: String,
    pub scm_clean: bool,
    pub credential_id: Option<i64>,
    pub local_path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryUpdateFields {
    pub inventory_source_id: i64,
    pub inventory_id: i64,
    pub group_id: Option<i64>,
    pub source: InventorySourceKind,
    pub source_path: String,
    pub source_script: String,
    pub source_vars: String,
    pub source_regions: String,
    pub instance_filters: String,
    pub group_by: String,
    pub credential_id: Option<i64>,
    pub overwrite: bool,
    pub overwrite_vars: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemJobFields {
    pub job_type: SystemJobType,
    #[serde(default)]
    pub extra_vars: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobDetails {
    Job(JobFields),
    ProjectUpdate(ProjectUpdateFields),
    InventoryUpdate(InventoryUpdateFields),
    SystemJob(SystemJobFields),
}

/// 统一作业实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedJob {
    pub id: i64,
    pub name: String,
    /// 模板删除后仍保留作业
    pub template_id: Option<i64>,
    pub status: JobStatus,
    pub launch_type: LaunchType,
    pub failed: bool,
    pub cancel_flag: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub job_explanation: String,
    pub result_traceback: String,
    pub result_stdout: String,
    /// 加密保存的启动时密码
    pub start_args: String,
    /// 注入的前置作业
    pub dependent_job_ids: Vec<i64>,
    pub execution_node: Option<String>,
    pub details: JobDetails,
}

impl UnifiedJob {
    pub fn new(name: impl Into<String>, template_id: Option<i64>, details: JobDetails) -> Self {
        Self {
            id: 0,
            name: name.into(),
            template_id,
            status: JobStatus::New,
            launch_type: LaunchType::Manual,
            failed: false,
            cancel_flag: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            job_explanation: String::new(),
            result_traceback: String::new(),
            result_stdout: String::new(),
            start_args: String::new(),
            dependent_job_ids: Vec::new(),
            execution_node: None,
            details,
        }
    }

    pub fn kind(&self) -> JobKind {
        match &self.details {
            JobDetails::Job(_) => JobKind::Job,
            JobDetails::ProjectUpdate(_) => JobKind::ProjectUpdate,
            JobDetails::InventoryUpdate(_) => JobKind::InventoryUpdate,
            JobDetails::SystemJob(_) => JobKind::SystemJob,
        }
    }

    pub fn inventory_id(&self) -> Option<i64> {
        match &self.details {
            JobDetails::Job(f) => f.inventory_id,
            JobDetails::InventoryUpdate(f) => Some(f.inventory_id),
            _ => None,
        }
    }

    pub fn project_id(&self) -> Option<i64> {
        match &self.details {
            JobDetails::Job(f) => f.project_id,
            JobDetails::ProjectUpdate(f) => Some(f.project_id),
            _ => None,
        }
    }

    pub fn job_fields(&self) -> Option<&JobFields> {
        match &self.details {
            JobDetails::Job(f) => Some(f),
            _ => None,
        }
    }

    /// 更新状态并维护开始/结束时间与失败标记
    pub fn update_status(&mut self, status: JobStatus) {
        self.status = status;
        match status {
            JobStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            s if s.is_finished() => {
                if self.finished_at.is_none() {
                    self.finished_at = Some(Utc::now());
                }
                self.failed = matches!(s, JobStatus::Failed | JobStatus::Error);
            }
            _ => {}
        }
    }

    /// 以错误结束并记录原因
    pub fn fail_with(&mut self, status: JobStatus, explanation: impl Into<String>) {
        self.job_explanation = explanation.into();
        self.update_status(status);
    }

    pub fn elapsed_seconds(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playbook_job() -> UnifiedJob {
        UnifiedJob::new(
            "deploy",
            Some(1),
            JobDetails::Job(JobFields {
                inventory_id: Some(3),
                project_id: Some(2),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_update_status_timestamps() {
        let mut job = playbook_job();
        job.update_status(JobStatus::Running);
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_none());

        job.update_status(JobStatus::Failed);
        assert!(job.finished_at.is_some());
        assert!(job.failed);
        assert!(job.elapsed_seconds().is_some());
    }

    #[test]
    fn test_canceled_is_not_failed() {
        let mut job = playbook_job();
        job.update_status(JobStatus::Canceled);
        assert!(!job.failed);
        assert!(job.status.is_finished());
    }

    #[test]
    fn test_accessors_by_kind() {
        let job = playbook_job();
        assert_eq!(job.kind(), JobKind::Job);
        assert_eq!(job.inventory_id(), Some(3));
        assert_eq!(job.project_id(), Some(2));

        let update = UnifiedJob::new(
            "sync",
            Some(5),
            JobDetails::InventoryUpdate(InventoryUpdateFields {
                inventory_source_id: 5,
                inventory_id: 3,
                ..Default::default()
            }),
        );
        assert_eq!(update.kind(), JobKind::InventoryUpdate);
        assert_eq!(update.inventory_id(), Some(3));
        assert_eq!(update.project_id(), None);
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            JobStatus::New,
            JobStatus::Pending,
            JobStatus::Waiting,
            JobStatus::Running,
            JobStatus::Successful,
            JobStatus::Failed,
            JobStatus::Error,
            JobStatus::Canceled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }
}
