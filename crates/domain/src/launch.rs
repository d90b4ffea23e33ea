//! 模板到作业的字段继承与启动覆盖项
//!
//! 每种模板声明一份字段名列表，作业创建时按列表冻结模板字段。

use std::collections::HashMap;

use conductor_core::models::{
    InventorySource, InventoryUpdateFields, JobDetails, JobFields, JobTemplate, JobType,
    LaunchType, Project, ProjectUpdateFields, QuestionType, SystemJobFields, SystemJobTemplate,
    UnifiedJob, UnifiedTemplate,
};
use conductor_core::vars::{self, Variables};
use conductor_core::{ConductorError, ConductorResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::survey;
use crate::vault::{Vault, ENCRYPTED_PREFIX};

pub const JOB_FIELD_NAMES: &[&str] = &[
    "job_type",
    "inventory_id",
    "project_id",
    "playbook",
    "credential_id",
    "cloud_credential_id",
    "network_credential_id",
    "forks",
    "limit",
    "verbosity",
    "extra_vars",
    "job_tags",
    "skip_tags",
    "become_enabled",
    "allow_simultaneous",
];

pub const PROJECT_UPDATE_FIELD_NAMES: &[&str] = &[
    "scm_type",
    "scm_url",
    "scm_branch",
    "scm_clean",
    "credential_id",
    "local_path",
];

pub const INVENTORY_UPDATE_FIELD_NAMES: &[&str] = &[
    "inventory_id",
    "group_id",
    "source",
    "source_path",
    "source_script",
    "source_vars",
    "source_regions",
    "instance_filters",
    "group_by",
    "credential_id",
    "overwrite",
    "overwrite_vars",
];

const START_ARGS_FIELD: &str = "start_args";

/// 按字段名列表复制
fn copy_fields<S: Serialize, T: DeserializeOwned>(
    source: &S,
    names: &[&str],
) -> ConductorResult<T> {
    let mut copied = Map::new();
    if let Value::Object(map) = serde_json::to_value(source)? {
        for (key, value) in map {
            if names.contains(&key.as_str()) {
                copied.insert(key, value);
            }
        }
    }
    Ok(serde_json::from_value(Value::Object(copied))?)
}

/// 启动时的覆盖项，也用作计划任务的 `extra_data`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOverrides {
    /// 字典或变量文本
    pub extra_vars: Option<Value>,
    pub limit: Option<String>,
    pub job_tags: Option<String>,
    pub skip_tags: Option<String>,
    pub job_type: Option<JobType>,
    pub inventory_id: Option<i64>,
    pub credential_id: Option<i64>,
    /// 提示名 -> 密码
    pub passwords: HashMap<String, String>,
}

impl LaunchOverrides {
    pub fn from_value(value: &Value) -> ConductorResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| ConductorError::validation(format!("启动参数无效: {e}")))
    }

    fn extra_vars(&self) -> ConductorResult<Variables> {
        match &self.extra_vars {
            None | Some(Value::Null) => Ok(Variables::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(Value::String(text)) => vars::parse_vars(text),
            Some(other) => Err(ConductorError::validation(format!(
                "extra_vars 必须是字典，实际为: {other}"
            ))),
        }
    }
}

/// 应用覆盖项后的作业字段
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub fields: JobFields,
    /// 模板未开放提示而被忽略的字段
    pub ignored_fields: Vec<String>,
}

/// 冻结作业模板字段并应用覆盖项
pub fn apply_overrides(
    template: &JobTemplate,
    overrides: &LaunchOverrides,
) -> ConductorResult<LaunchPlan> {
    let mut fields: JobFields = copy_fields(template, JOB_FIELD_NAMES)?;
    let mut ignored = Vec::new();

    fn prompt<T: Clone>(
        allowed: bool,
        name: &str,
        value: &Option<T>,
        slot: &mut T,
        ignored: &mut Vec<String>,
    ) {
        if let Some(value) = value {
            if allowed {
                *slot = value.clone();
            } else {
                ignored.push(name.to_string());
            }
        }
    }

    prompt(
        template.ask_limit_on_launch,
        "limit",
        &overrides.limit,
        &mut fields.limit,
        &mut ignored,
    );
    prompt(
        template.ask_tags_on_launch,
        "job_tags",
        &overrides.job_tags,
        &mut fields.job_tags,
        &mut ignored,
    );
    prompt(
        template.ask_skip_tags_on_launch,
        "skip_tags",
        &overrides.skip_tags,
        &mut fields.skip_tags,
        &mut ignored,
    );
    prompt(
        template.ask_job_type_on_launch,
        "job_type",
        &overrides.job_type,
        &mut fields.job_type,
        &mut ignored,
    );
    if let Some(credential_id) = overrides.credential_id {
        if template.ask_credential_on_launch {
            fields.credential_id = Some(credential_id);
        } else {
            ignored.push("credential_id".to_string());
        }
    }
    // 扫描作业的清单不可替换
    if let Some(inventory_id) = overrides.inventory_id {
        if template.ask_inventory_on_launch && fields.job_type != JobType::Scan {
            fields.inventory_id = Some(inventory_id);
        } else {
            ignored.push("inventory_id".to_string());
        }
    }

    let survey = template
        .survey_spec
        .as_ref()
        .filter(|_| template.survey_enabled);

    let mut extra_vars = vars::parse_vars(&template.extra_vars)?;
    if let Some(spec) = survey {
        vars::merge(&mut extra_vars, &survey::defaults(spec));
    }

    let requested = overrides.extra_vars()?;
    let mut accepted = Variables::new();
    let mut rejected = false;
    for (key, value) in requested {
        let question = survey.and_then(|s| s.spec.iter().find(|q| q.variable == key));
        if let Some(q) = question {
            // 回显的占位密码沿用默认值
            let masked = q.question_type == QuestionType::Password
                && value
                    .as_str()
                    .map(|s| s.starts_with(ENCRYPTED_PREFIX))
                    .unwrap_or(false);
            if !masked {
                accepted.insert(key, value);
            }
        } else if template.ask_variables_on_launch {
            accepted.insert(key, value);
        } else {
            rejected = true;
        }
    }
    if rejected {
        ignored.push("extra_vars".to_string());
    }
    vars::merge(&mut extra_vars, &accepted);

    if let Some(spec) = survey {
        survey::validate_answers(spec, &extra_vars)?;
        fields.survey_passwords = spec.password_variables();
    }
    fields.extra_vars = vars::to_json_text(&extra_vars);

    Ok(LaunchPlan {
        fields,
        ignored_fields: ignored,
    })
}

pub fn project_update_fields(project: &Project) -> ConductorResult<ProjectUpdateFields> {
    let mut fields: ProjectUpdateFields = copy_fields(project, PROJECT_UPDATE_FIELD_NAMES)?;
    fields.project_id = project.id;
    Ok(fields)
}

pub fn inventory_update_fields(source: &InventorySource) -> ConductorResult<InventoryUpdateFields> {
    let mut fields: InventoryUpdateFields = copy_fields(source, INVENTORY_UPDATE_FIELD_NAMES)?;
    fields.inventory_source_id = source.id;
    Ok(fields)
}

pub fn system_job_fields(
    template: &SystemJobTemplate,
    overrides: &LaunchOverrides,
) -> ConductorResult<SystemJobFields> {
    Ok(SystemJobFields {
        job_type: template.job_type,
        extra_vars: vars::to_json_text(&overrides.extra_vars()?),
    })
}

/// 由模板创建新作业（状态为 `new`）
pub fn new_job(
    template: &UnifiedTemplate,
    overrides: &LaunchOverrides,
    launch_type: LaunchType,
) -> ConductorResult<(UnifiedJob, Vec<String>)> {
    let (details, ignored) = match template {
        UnifiedTemplate::JobTemplate(t) => {
            let plan = apply_overrides(t, overrides)?;
            (JobDetails::Job(plan.fields), plan.ignored_fields)
        }
        UnifiedTemplate::Project(p) => (
            JobDetails::ProjectUpdate(project_update_fields(p)?),
            Vec::new(),
        ),
        UnifiedTemplate::InventorySource(s) => (
            JobDetails::InventoryUpdate(inventory_update_fields(s)?),
            Vec::new(),
        ),
        UnifiedTemplate::SystemJobTemplate(t) => (
            JobDetails::SystemJob(system_job_fields(t, overrides)?),
            Vec::new(),
        ),
    };

    let mut job = UnifiedJob::new(template.name(), Some(template.id()), details);
    job.launch_type = launch_type;
    Ok((job, ignored))
}

/// 复制已有作业的字段重新启动
pub fn relaunch(prior: &UnifiedJob) -> UnifiedJob {
    let mut job = UnifiedJob::new(prior.name.clone(), prior.template_id, prior.details.clone());
    job.launch_type = LaunchType::Relaunch;
    job
}

/// 未提供的启动密码
pub fn missing_passwords(needed: &[String], provided: &HashMap<String, String>) -> Vec<String> {
    needed
        .iter()
        .filter(|name| provided.get(*name).map(|v| v.is_empty()).unwrap_or(true))
        .cloned()
        .collect()
}

/// 加密保存启动密码
pub fn seal_start_args(
    vault: &Vault,
    job_id: i64,
    passwords: &HashMap<String, String>,
) -> ConductorResult<String> {
    if passwords.is_empty() {
        return Ok(String::new());
    }
    let text = serde_json::to_string(passwords)?;
    Ok(vault.encrypt(&text, job_id, START_ARGS_FIELD))
}

/// 解密启动密码，只应在 worker 内调用
pub fn open_start_args(vault: &Vault, job: &UnifiedJob) -> ConductorResult<HashMap<String, String>> {
    if job.start_args.is_empty() {
        return Ok(HashMap::new());
    }
    let text = vault.reveal(&job.start_args, job.id, START_ARGS_FIELD)?;
    Ok(serde_json::from_str(&text)?)
}
