use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InventorySource, Project, SurveySpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    #[default]
    Run,
    Check,
    Scan,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Run => "run",
            JobType::Check => "check",
            JobType::Scan => "scan",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemJobType {
    CleanupJobs,
    CleanupActivitystream,
    CleanupDeleted,
}

impl SystemJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemJobType::CleanupJobs => "cleanup_jobs",
            SystemJobType::CleanupActivitystream => "cleanup_activitystream",
            SystemJobType::CleanupDeleted => "cleanup_deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobTemplate {
    pub id: i64,
    pub name: String,
    pub description: String,
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
    /// 规范化后的 JSON 文本
    pub extra_vars: String,
    pub job_tags: String,
    pub skip_tags: String,
    pub become_enabled: bool,
    pub host_config_key: String,
    pub ask_variables_on_launch: bool,
    pub ask_limit_on_launch: bool,
    pub ask_tags_on_launch: bool,
    pub ask_skip_tags_on_launch: bool,
    pub ask_job_type_on_launch: bool,
    pub ask_inventory_on_launch: bool,
    pub ask_credential_on_launch: bool,
    pub survey_enabled: bool,
    pub survey_spec: Option<SurveySpec>,
    pub allow_simultaneous: bool,
    pub last_job_run: Option<DateTime<Utc>>,
    pub last_job_failed: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for JobTemplate {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            description: String::new(),
            job_type: JobType::Run,
            inventory_id: None,
            project_id: None,
            playbook: String::new(),
            credential_id: None,
            cloud_credential_id: None,
            network_credential_id: None,
            forks: 0,
            limit: String::new(),
            verbosity: 0,
            extra_vars: "{}".to_string(),
            job_tags: String::new(),
            skip_tags: String::new(),
            become_enabled: false,
            host_config_key: String::new(),
            ask_variables_on_launch: false,
            ask_limit_on_launch: false,
            ask_tags_on_launch: false,
            ask_skip_tags_on_launch: false,
            ask_job_type_on_launch: false,
            ask_inventory_on_launch: false,
            ask_credential_on_launch: false,
            survey_enabled: false,
            survey_spec: None,
            allow_simultaneous: false,
            last_job_run: None,
            last_job_failed: false,
            active: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemJobTemplate {
    pub id: i64,
    pub name: String,
    pub job_type: SystemJobType,
    #[serde(default)]
    pub last_job_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_job_failed: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    JobTemplate,
    Project,
    InventorySource,
    SystemJobTemplate,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::JobTemplate => "job_template",
            TemplateKind::Project => "project",
            TemplateKind::InventorySource => "inventory_source",
            TemplateKind::SystemJobTemplate => "system_job_template",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "job_template" => Some(TemplateKind::JobTemplate),
            "project" => Some(TemplateKind::Project),
            "inventory_source" => Some(TemplateKind::InventorySource),
            "system_job_template" => Some(TemplateKind::SystemJobTemplate),
            _ => None,
        }
    }
}

/// 统一模板：四种可启动对象共享同一 id 空间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnifiedTemplate {
    JobTemplate(JobTemplate),
    Project(Project),
    InventorySource(InventorySource),
    SystemJobTemplate(SystemJobTemplate),
}

impl UnifiedTemplate {
    pub fn kind(&self) -> TemplateKind {
        match self {
            UnifiedTemplate::JobTemplate(_) => TemplateKind::JobTemplate,
            UnifiedTemplate::Project(_) => TemplateKind::Project,
            UnifiedTemplate::InventorySource(_) => TemplateKind::InventorySource,
            UnifiedTemplate::SystemJobTemplate(_) => TemplateKind::SystemJobTemplate,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            UnifiedTemplate::JobTemplate(t) => t.id,
            UnifiedTemplate::Project(t) => t.id,
            UnifiedTemplate::InventorySource(t) => t.id,
            UnifiedTemplate::SystemJobTemplate(t) => t.id,
        }
    }

    pub fn set_id(&mut self, id: i64) {
        match self {
            UnifiedTemplate::JobTemplate(t) => t.id = id,
            UnifiedTemplate::Project(t) => t.id = id,
            UnifiedTemplate::InventorySource(t) => t.id = id,
            UnifiedTemplate::SystemJobTemplate(t) => t.id = id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            UnifiedTemplate::JobTemplate(t) => &t.name,
            UnifiedTemplate::Project(t) => &t.name,
            UnifiedTemplate::InventorySource(t) => &t.name,
            UnifiedTemplate::SystemJobTemplate(t) => &t.name,
        }
    }

    pub fn set_name(&mut self, name: String) {
        match self {
            UnifiedTemplate::JobTemplate(t) => t.name = name,
            UnifiedTemplate::Project(t) => t.name = name,
            UnifiedTemplate::InventorySource(t) => t.name = name,
            UnifiedTemplate::SystemJobTemplate(t) => t.name = name,
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            UnifiedTemplate::JobTemplate(t) => t.active,
            UnifiedTemplate::Project(t) => t.active,
            UnifiedTemplate::InventorySource(t) => t.active,
            UnifiedTemplate::SystemJobTemplate(t) => t.active,
        }
    }

    pub fn set_active(&mut self, active: bool) {
        match self {
            UnifiedTemplate::JobTemplate(t) => t.active = active,
            UnifiedTemplate::Project(t) => t.active = active,
            UnifiedTemplate::InventorySource(t) => t.active = active,
            UnifiedTemplate::SystemJobTemplate(t) => t.active = active,
        }
    }

    pub fn inventory_id(&self) -> Option<i64> {
        match self {
            UnifiedTemplate::JobTemplate(t) => t.inventory_id,
            UnifiedTemplate::InventorySource(t) => Some(t.inventory_id),
            _ => None,
        }
    }

    pub fn project_id(&self) -> Option<i64> {
        match self {
            UnifiedTemplate::JobTemplate(t) => t.project_id,
            UnifiedTemplate::Project(t) => Some(t.id),
            _ => None,
        }
    }

    /// 作业结束后的模板侧记录
    pub fn record_job_finished(&mut self, finished_at: DateTime<Utc>, failed: bool) {
        match self {
            UnifiedTemplate::JobTemplate(t) => {
                t.last_job_run = Some(finished_at);
                t.last_job_failed = failed;
            }
            UnifiedTemplate::Project(t) => {
                t.last_job_run = Some(finished_at);
                t.last_job_failed = failed;
                t.last_update_failed = failed;
                t.last_updated = Some(finished_at);
            }
            UnifiedTemplate::InventorySource(t) => {
                t.last_job_run = Some(finished_at);
                t.last_job_failed = failed;
                t.last_update_failed = failed;
                t.last_updated = Some(finished_at);
            }
            UnifiedTemplate::SystemJobTemplate(t) => {
                t.last_job_run = Some(finished_at);
                t.last_job_failed = failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_serialization() {
        let template = UnifiedTemplate::JobTemplate(JobTemplate {
            name: "deploy".into(),
            ..Default::default()
        });
        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["kind"], "job_template");
        assert_eq!(value["name"], "deploy");
    }

    #[test]
    fn test_partial_fields_use_defaults() {
        let template: UnifiedTemplate = serde_json::from_value(json!({
            "kind": "project",
            "name": "playbooks",
            "scm_type": "git"
        }))
        .unwrap();
        assert_eq!(template.kind(), TemplateKind::Project);
        assert!(template.is_active());
        assert_eq!(template.project_id(), Some(0));
    }

    #[test]
    fn test_record_job_finished_marks_update_failure() {
        let mut template = UnifiedTemplate::Project(Project::default());
        let now = Utc::now();
        template.record_job_finished(now, true);
        match template {
            UnifiedTemplate::Project(p) => {
                assert!(p.last_update_failed);
                assert_eq!(p.last_updated, Some(now));
            }
            _ => unreachable!(),
        }
    }
}
