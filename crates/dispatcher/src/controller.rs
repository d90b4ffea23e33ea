use std::collections::HashMap;
use std::sync::Arc;

use conductor_core::models::{
    queues, ActivityOperation, ContentType, JobDetails, JobEvent, JobKind, JobStatus, LaunchType,
    Message, ScmType, TemplateKind, UnifiedJob, UnifiedTemplate,
};
use conductor_core::{vars, ConductorError, ConductorResult, MessageQueue, Repositories};
use conductor_domain::launch::{self, LaunchOverrides};
use conductor_domain::{survey, ActivityRecorder, EventIngestor, EventPayload, RoleService, Vault};
use conductor_infrastructure::{MetricsCollector, StructuredLogger};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

/// 启动结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchResult {
    pub job_id: i64,
    pub ignored_fields: Vec<String>,
    /// 模板凭据要求在启动时提供的密码
    pub prompts_needed: Vec<String>,
}

/// 主机计数合计
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCounters {
    pub changed: i64,
    pub dark: i64,
    pub failures: i64,
    pub ok: i64,
    pub processed: i64,
    pub skipped: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: i64,
    pub status: JobStatus,
    pub failed: bool,
    pub job_explanation: String,
    pub counters: HostCounters,
    /// 已写入输出的行范围 `[start, end)`
    pub stdout_range: (i64, i64),
    pub next_event_counter: i64,
}

/// 作业提交入口
pub struct JobController {
    repos: Repositories,
    vault: Arc<Vault>,
    roles: Arc<RoleService>,
    activity: ActivityRecorder,
    ingestor: Arc<EventIngestor>,
    queue: Arc<dyn MessageQueue>,
    metrics: Arc<MetricsCollector>,
}

impl JobController {
    pub fn new(
        repos: Repositories,
        vault: Arc<Vault>,
        roles: Arc<RoleService>,
        activity: ActivityRecorder,
        ingestor: Arc<EventIngestor>,
        queue: Arc<dyn MessageQueue>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            repos,
            vault,
            roles,
            activity,
            ingestor,
            queue,
            metrics,
        }
    }

    async fn template(&self, template_id: i64) -> ConductorResult<UnifiedTemplate> {
        self.repos
            .templates
            .get_by_id(template_id)
            .await?
            .ok_or_else(|| ConductorError::not_found("模板", template_id))
    }

    async fn job(&self, job_id: i64) -> ConductorResult<UnifiedJob> {
        self.repos
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| ConductorError::not_found("作业", job_id))
    }

    /// 校验模板字段，收集全部错误
    async fn validate_template(&self, template: &mut UnifiedTemplate) -> ConductorResult<()> {
        let mut errors = Vec::new();
        if template.name().trim().is_empty() {
            errors.push("name 不能为空".to_string());
        }

        match template {
            UnifiedTemplate::JobTemplate(t) => {
                if t.playbook.trim().is_empty() {
                    errors.push("playbook 不能为空".to_string());
                }
                match t.project_id {
                    Some(project_id) => {
                        if !matches!(
                            self.repos.templates.get_by_id(project_id).await?,
                            Some(UnifiedTemplate::Project(_))
                        ) {
                            errors.push(format!("项目 {project_id} 不存在"));
                        }
                    }
                    None => errors.push("project 不能为空".to_string()),
                }
                match t.inventory_id {
                    Some(inventory_id) => {
                        if self
                            .repos
                            .inventories
                            .get_inventory(inventory_id)
                            .await?
                            .is_none()
                        {
                            errors.push(format!("清单 {inventory_id} 不存在"));
                        }
                    }
                    None if !t.ask_inventory_on_launch => {
                        errors.push("inventory 不能为空".to_string())
                    }
                    None => {}
                }
                if t.survey_enabled && t.survey_spec.is_none() {
                    errors.push("启用问卷时必须提供问卷定义".to_string());
                }
                if let Some(spec) = &t.survey_spec {
                    if let Err(ConductorError::Validation(survey_errors)) = survey::validate_spec(spec) {
                        errors.extend(survey_errors);
                    }
                }
                match vars::canonicalize(&t.extra_vars) {
                    Ok(text) => t.extra_vars = text,
                    Err(e) => errors.push(format!("extra_vars 无效: {e}")),
                }
            }
            UnifiedTemplate::Project(p) => {
                if p.scm_type != ScmType::None && p.scm_url.trim().is_empty() {
                    errors.push("源码类型项目必须提供 scm_url".to_string());
                }
                if p.scm_type == ScmType::None && p.local_path.trim().is_empty() {
                    errors.push("手动项目必须提供 local_path".to_string());
                }
            }
            UnifiedTemplate::InventorySource(s) => {
                if self
                    .repos
                    .inventories
                    .get_inventory(s.inventory_id)
                    .await?
                    .is_none()
                {
                    errors.push(format!("清单 {} 不存在", s.inventory_id));
                }
                if let Err(e) = vars::canonicalize(&s.source_vars) {
                    errors.push(format!("source_vars 无效: {e}"));
                }
            }
            UnifiedTemplate::SystemJobTemplate(_) => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConductorError::Validation(errors))
        }
    }

    /// 创建可启动模板并建立其隐式角色
    #[instrument(skip(self, fields), fields(kind = kind.as_str()))]
    pub async fn create_template(&self, kind: TemplateKind, fields: Value) -> ConductorResult<i64> {
        let mut doc = match fields {
            Value::Object(map) => map,
            other => {
                return Err(ConductorError::validation(format!(
                    "模板字段必须是对象，实际为: {other}"
                )))
            }
        };
        doc.insert("kind".to_string(), Value::String(kind.as_str().to_string()));
        let mut template: UnifiedTemplate = serde_json::from_value(Value::Object(doc))
            .map_err(|e| ConductorError::validation(format!("模板字段无效: {e}")))?;
        template.set_id(0);
        template.set_active(true);
        self.validate_template(&mut template).await?;

        let created = self.repos.templates.create(&template).await?;
        self.create_roles(&created).await?;
        self.activity
            .record(
                ActivityOperation::Create,
                kind.as_str(),
                created.id(),
                json!({ "name": created.name() }),
                None,
            )
            .await?;
        info!("创建 {} {} ({})", kind.as_str(), created.name(), created.id());
        Ok(created.id())
    }

    async fn organization_of_inventory(&self, inventory_id: Option<i64>) -> ConductorResult<Option<i64>> {
        match inventory_id {
            Some(id) => Ok(self
                .repos
                .inventories
                .get_inventory(id)
                .await?
                .map(|i| i.organization_id)),
            None => Ok(None),
        }
    }

    async fn organization_of_project(&self, project_id: Option<i64>) -> ConductorResult<Option<i64>> {
        match project_id {
            Some(id) => match self.repos.templates.get_by_id(id).await? {
                Some(UnifiedTemplate::Project(p)) => Ok(p.organization_id),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn create_roles(&self, template: &UnifiedTemplate) -> ConductorResult<()> {
        match template {
            UnifiedTemplate::JobTemplate(t) => {
                let mut links = Vec::new();
                if let Some(org) = self.organization_of_project(t.project_id).await? {
                    links.push(("project.organization", ContentType::Organization, org));
                }
                if let Some(org) = self.organization_of_inventory(t.inventory_id).await? {
                    links.push(("inventory.organization", ContentType::Organization, org));
                }
                self.roles
                    .create_object_roles(ContentType::JobTemplate, t.id, &links)
                    .await?;
            }
            UnifiedTemplate::Project(p) => {
                let links: Vec<_> = p
                    .organization_id
                    .map(|org| ("organization", ContentType::Organization, org))
                    .into_iter()
                    .collect();
                self.roles
                    .create_object_roles(ContentType::Project, p.id, &links)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// 作业所用凭据需要在启动时提供的密码
    async fn passwords_needed(&self, job: &UnifiedJob) -> ConductorResult<Vec<String>> {
        let credential_id = match &job.details {
            JobDetails::Job(f) => f.credential_id,
            JobDetails::ProjectUpdate(f) => f.credential_id,
            JobDetails::InventoryUpdate(f) => f.credential_id,
            JobDetails::SystemJob(_) => None,
        };
        match credential_id {
            Some(id) => match self.repos.credentials.get_by_id(id).await? {
                Some(credential) => Ok(credential.passwords_needed_to_start()),
                None => Err(ConductorError::validation(format!("凭据 {id} 不存在"))),
            },
            None => Ok(Vec::new()),
        }
    }

    pub async fn launch(
        &self,
        template_id: i64,
        overrides: &LaunchOverrides,
    ) -> ConductorResult<LaunchResult> {
        self.launch_as(template_id, overrides, LaunchType::Manual)
            .await
    }

    /// 检查用户的执行权限后启动
    pub async fn launch_by(
        &self,
        user_id: i64,
        template_id: i64,
        overrides: &LaunchOverrides,
    ) -> ConductorResult<LaunchResult> {
        let template = self.template(template_id).await?;
        if template.kind() == TemplateKind::JobTemplate {
            self.roles
                .check(user_id, ContentType::JobTemplate, template_id, "execute_role")
                .await?;
        }
        self.submit(&template, overrides, LaunchType::Manual, Some(user_id), None)
            .await
    }

    pub async fn launch_as(
        &self,
        template_id: i64,
        overrides: &LaunchOverrides,
        launch_type: LaunchType,
    ) -> ConductorResult<LaunchResult> {
        let template = self.template(template_id).await?;
        self.submit(&template, overrides, launch_type, None, None)
            .await
    }

    /// 主机回调启动，`limit` 固定为该主机
    pub async fn launch_callback(&self, template_id: i64, host_name: &str) -> ConductorResult<LaunchResult> {
        let template = self.template(template_id).await?;
        self.submit(
            &template,
            &LaunchOverrides::default(),
            LaunchType::Callback,
            None,
            Some(host_name.to_string()),
        )
        .await
    }

    async fn submit(
        &self,
        template: &UnifiedTemplate,
        overrides: &LaunchOverrides,
        launch_type: LaunchType,
        actor_id: Option<i64>,
        forced_limit: Option<String>,
    ) -> ConductorResult<LaunchResult> {
        if !template.is_active() {
            return Err(ConductorError::Conflict(format!(
                "模板 {} 已停用",
                template.id()
            )));
        }

        let (mut job, ignored_fields) = launch::new_job(template, overrides, launch_type)?;
        if let (Some(limit), JobDetails::Job(fields)) = (forced_limit, &mut job.details) {
            fields.limit = limit;
        }
        if let Some(inventory_id) = job.inventory_id() {
            if self.repos.inventories.get_inventory(inventory_id).await?.is_none() {
                return Err(ConductorError::validation(format!(
                    "清单 {inventory_id} 不存在"
                )));
            }
        } else if job.kind() == JobKind::Job {
            return Err(ConductorError::validation("作业缺少清单"));
        }

        let prompts_needed = self.passwords_needed(&job).await?;
        let missing = launch::missing_passwords(&prompts_needed, &overrides.passwords);
        if !missing.is_empty() {
            return Err(ConductorError::Validation(
                missing
                    .iter()
                    .map(|name| format!("缺少启动密码: {name}"))
                    .collect(),
            ));
        }
        let passwords: HashMap<String, String> = overrides
            .passwords
            .iter()
            .filter(|(name, _)| prompts_needed.contains(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut created = self.repos.jobs.create(&job).await?;
        created.start_args = launch::seal_start_args(&self.vault, created.id, &passwords)?;
        created.update_status(JobStatus::Pending);
        self.repos.jobs.update(&created).await?;

        self.activity
            .record(
                ActivityOperation::Create,
                "job",
                created.id,
                json!({ "template_id": template.id(), "launch_type": launch_type.as_str() }),
                actor_id,
            )
            .await?;
        self.metrics.record_job_launched(created.kind().as_str());
        StructuredLogger::log_job_launched(
            created.id,
            &created.name,
            created.kind().as_str(),
            launch_type.as_str(),
        );
        if !ignored_fields.is_empty() {
            debug!("作业 {} 忽略了未开放的字段: {:?}", created.id, ignored_fields);
        }

        Ok(LaunchResult {
            job_id: created.id,
            ignored_fields,
            prompts_needed,
        })
    }

    /// 以原作业的冻结字段重新启动
    pub async fn relaunch(
        &self,
        job_id: i64,
        passwords: &HashMap<String, String>,
    ) -> ConductorResult<LaunchResult> {
        let prior = self.job(job_id).await?;
        let job = launch::relaunch(&prior);
        let prompts_needed = self.passwords_needed(&job).await?;
        let missing = launch::missing_passwords(&prompts_needed, passwords);
        if !missing.is_empty() {
            return Err(ConductorError::Validation(
                missing
                    .iter()
                    .map(|name| format!("缺少启动密码: {name}"))
                    .collect(),
            ));
        }

        let mut created = self.repos.jobs.create(&job).await?;
        created.start_args = launch::seal_start_args(&self.vault, created.id, passwords)?;
        created.update_status(JobStatus::Pending);
        self.repos.jobs.update(&created).await?;
        self.metrics.record_job_launched(created.kind().as_str());
        StructuredLogger::log_job_launched(
            created.id,
            &created.name,
            created.kind().as_str(),
            LaunchType::Relaunch.as_str(),
        );
        Ok(LaunchResult {
            job_id: created.id,
            ignored_fields: Vec::new(),
            prompts_needed,
        })
    }

    /// 请求取消，可重复调用；排队中的作业立即取消，运行中的作业由 worker 协作结束
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: i64) -> ConductorResult<JobStatus> {
        let mut job = self.job(job_id).await?;
        if job.status.is_finished() {
            debug!("作业 {} 已结束 ({})，忽略取消", job_id, job.status);
            return Ok(job.status);
        }

        self.repos.jobs.request_cancel(job_id).await?;
        job.cancel_flag = true;
        StructuredLogger::log_cancel_requested(job_id, job.status.as_str());

        if matches!(
            job.status,
            JobStatus::New | JobStatus::Pending | JobStatus::Waiting
        ) {
            job.fail_with(JobStatus::Canceled, "canceled");
            self.repos.jobs.update(&job).await?;
            self.queue
                .publish_message(queues::SCHEDULER, &Message::job_completed(job_id, job.status))
                .await?;
        }
        Ok(job.status)
    }

    pub async fn status(&self, job_id: i64) -> ConductorResult<JobStatusReport> {
        let job = self.job(job_id).await?;

        let mut counters = HostCounters::default();
        for summary in self.repos.events.list_host_summaries(job_id).await? {
            counters.changed += summary.changed;
            counters.dark += summary.dark;
            counters.failures += summary.failures;
            counters.ok += summary.ok;
            counters.processed += summary.processed;
            counters.skipped += summary.skipped;
        }

        let events = self.repos.events.list_events(job_id).await?;
        let stdout_range = events
            .iter()
            .filter(|e| e.end_line > e.start_line)
            .fold(None, |range: Option<(i64, i64)>, e| match range {
                Some((start, end)) => Some((start.min(e.start_line), end.max(e.end_line))),
                None => Some((e.start_line, e.end_line)),
            })
            .unwrap_or((0, 0));
        let next_event_counter = self.repos.events.last_counter(job_id).await? + 1;

        Ok(JobStatusReport {
            job_id,
            status: job.status,
            failed: job.failed,
            job_explanation: job.job_explanation,
            counters,
            stdout_range,
            next_event_counter,
        })
    }

    /// 作业回传事件，只接受运行中作业的有效令牌
    pub async fn ingest_event(
        &self,
        job_id: i64,
        task_token: &str,
        payload: EventPayload,
    ) -> ConductorResult<JobEvent> {
        let job = self.job(job_id).await?;
        if !self.vault.verify_task_token(&job, task_token) {
            warn!(job.id = job_id, job.status = %job.status, "作业令牌校验失败");
            return Err(ConductorError::permission(format!(
                "作业 {job_id} 的令牌无效"
            )));
        }
        let event = self.ingestor.ingest(job_id, payload).await?;
        self.metrics.record_job_events(1);
        Ok(event)
    }
}
