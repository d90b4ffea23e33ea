use chrono::{DateTime, Utc};
use conductor_core::models::{JobDetails, JobStatus, LaunchType, UnifiedJob, UnifiedTemplate};
use conductor_core::{ConductorResult, Repositories};
use conductor_domain::launch::{self, LaunchOverrides};
use tracing::{debug, info};

/// 前置作业的完成情况
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyState {
    /// 全部成功或没有前置作业
    Ready,
    /// 仍有前置作业未结束
    Pending,
    Failed { job_id: i64 },
    Canceled { job_id: i64 },
}

/// 为 playbook 作业注入启动前需要的源码更新与清单同步
pub struct DependencyInjector {
    repos: Repositories,
}

impl DependencyInjector {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// 返回前置作业 id
    ///
    /// `active` 为尚未结束的更新作业，已有同源更新时直接复用；新建的更新作业
    /// 也会加入其中。
    pub async fn inject(
        &self,
        job: &UnifiedJob,
        active: &mut Vec<UnifiedJob>,
        now: DateTime<Utc>,
    ) -> ConductorResult<Vec<i64>> {
        let fields = match &job.details {
            JobDetails::Job(fields) => fields,
            _ => return Ok(Vec::new()),
        };

        let mut dependencies = Vec::new();
        if let Some(project_id) = fields.project_id {
            if let Some(UnifiedTemplate::Project(project)) =
                self.repos.templates.get_by_id(project_id).await?
            {
                if project.needs_update_on_launch(now) {
                    let existing = active
                        .iter()
                        .find(|j| {
                            matches!(&j.details, JobDetails::ProjectUpdate(u) if u.project_id == project_id)
                        })
                        .map(|j| j.id);
                    let id = match existing {
                        Some(id) => {
                            debug!("复用项目 {} 的更新作业 {}", project_id, id);
                            id
                        }
                        None => self.spawn(&UnifiedTemplate::Project(project), active).await?,
                    };
                    dependencies.push(id);
                }
            }
        }

        if let Some(inventory_id) = fields.inventory_id {
            for source in self.repos.templates.list_inventory_sources(inventory_id).await? {
                if !source.needs_update_on_launch(now) {
                    continue;
                }
                let existing = active
                    .iter()
                    .find(|j| {
                        matches!(&j.details, JobDetails::InventoryUpdate(u) if u.inventory_source_id == source.id)
                    })
                    .map(|j| j.id);
                let id = match existing {
                    Some(id) => {
                        debug!("复用清单来源 {} 的同步作业 {}", source.id, id);
                        id
                    }
                    None => {
                        self.spawn(&UnifiedTemplate::InventorySource(source), active)
                            .await?
                    }
                };
                dependencies.push(id);
            }
        }

        Ok(dependencies)
    }

    /// 新建的更新作业直接进入 waiting
    async fn spawn(
        &self,
        template: &UnifiedTemplate,
        active: &mut Vec<UnifiedJob>,
    ) -> ConductorResult<i64> {
        let (mut update, _) =
            launch::new_job(template, &LaunchOverrides::default(), LaunchType::Dependency)?;
        update.update_status(JobStatus::Waiting);
        let created = self.repos.jobs.create(&update).await?;
        info!(
            "为 {} {} 创建前置作业 {}",
            template.kind().as_str(),
            template.id(),
            created.id
        );
        let id = created.id;
        active.push(created);
        Ok(id)
    }

    /// 检查前置作业状态，失败优先于取消
    pub async fn state(&self, job: &UnifiedJob) -> ConductorResult<DependencyState> {
        let mut state = DependencyState::Ready;
        for &dependency_id in &job.dependent_job_ids {
            let status = self
                .repos
                .jobs
                .get_by_id(dependency_id)
                .await?
                .map(|d| d.status);
            match status {
                Some(JobStatus::Successful) => {}
                Some(JobStatus::Failed) | Some(JobStatus::Error) | None => {
                    return Ok(DependencyState::Failed {
                        job_id: dependency_id,
                    });
                }
                Some(JobStatus::Canceled) => {
                    state = DependencyState::Canceled {
                        job_id: dependency_id,
                    };
                }
                Some(_) => {
                    if state == DependencyState::Ready {
                        state = DependencyState::Pending;
                    }
                }
            }
        }
        Ok(state)
    }
}
