use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use conductor_core::models::{queues, JobKind, JobStatus, Message, MessageType, UnifiedJob};
use conductor_core::{ConductorError, ConductorResult, MessageQueue, Repositories};
use conductor_domain::{EventIngestor, EventPayload, InventoryService};
use conductor_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::blocking::first_blocker;
use crate::capacity::{task_impact, CapacityLedger};
use crate::dependencies::{DependencyInjector, DependencyState};
use crate::notifier::Notifier;

pub const DEPENDENCY_FAILED: &str = "dependency failed";
pub const DEPENDENCY_CANCELED: &str = "dependency canceled";

/// 单次调度周期的结果
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    /// 另一个周期正在进行，本次跳过
    pub skipped: bool,
    pub harvested: Vec<i64>,
    /// 从 pending 进入 waiting 的作业
    pub queued: Vec<i64>,
    pub promoted: Vec<i64>,
    pub blocked: Vec<i64>,
    /// 因前置作业失败或取消而结束的作业
    pub failed_dependents: Vec<i64>,
    pub capacity_remaining: i64,
}

/// 任务管理器
///
/// 作业状态只由这里推进：收集已结束作业并执行收尾、注入前置作业、
/// 按阻塞规则和容量放行等待中的作业。周期之间由单一所有者锁串行化。
pub struct TaskManager {
    repos: Repositories,
    queue: Arc<dyn MessageQueue>,
    inventory: Arc<InventoryService>,
    ingestor: Arc<EventIngestor>,
    notifiers: Vec<Arc<dyn Notifier>>,
    metrics: Arc<MetricsCollector>,
    injector: DependencyInjector,
    capacity: i64,
    cycle_lock: Mutex<()>,
}

impl TaskManager {
    pub fn new(
        repos: Repositories,
        queue: Arc<dyn MessageQueue>,
        inventory: Arc<InventoryService>,
        ingestor: Arc<EventIngestor>,
        metrics: Arc<MetricsCollector>,
        capacity: i64,
    ) -> Self {
        Self {
            injector: DependencyInjector::new(repos.clone()),
            repos,
            queue,
            inventory,
            ingestor,
            notifiers: Vec::new(),
            metrics,
            capacity,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> ConductorResult<CycleReport> {
        let _owner = match self.cycle_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("另一个调度周期正在进行，跳过");
                return Ok(CycleReport {
                    skipped: true,
                    ..Default::default()
                });
            }
        };
        let started = Instant::now();
        let mut report = CycleReport::default();

        report.harvested = self.harvest().await?;

        let active = self
            .repos
            .jobs
            .list_by_status(&[JobStatus::Pending, JobStatus::Waiting, JobStatus::Running])
            .await?;
        let mut open_updates: Vec<UnifiedJob> = active
            .iter()
            .filter(|j| matches!(j.kind(), JobKind::ProjectUpdate | JobKind::InventoryUpdate))
            .cloned()
            .collect();

        let now = Utc::now();
        for mut job in active.into_iter().filter(|j| j.status == JobStatus::Pending) {
            let dependencies = self.injector.inject(&job, &mut open_updates, now).await?;
            StructuredLogger::log_dependencies_injected(job.id, &dependencies);
            job.dependent_job_ids = dependencies;
            job.update_status(JobStatus::Waiting);
            self.repos.jobs.update(&job).await?;
            report.queued.push(job.id);
        }

        let running = self
            .repos
            .jobs
            .list_by_status(&[JobStatus::Running])
            .await?;
        let mut ledger = CapacityLedger::new(self.capacity);
        for job in &running {
            ledger.occupy(self.impact_of(job).await?);
        }

        let mut admitted: Vec<UnifiedJob> = running;
        let waiting = self
            .repos
            .jobs
            .list_by_status(&[JobStatus::Waiting])
            .await?;
        for mut job in waiting {
            if job.cancel_flag {
                job.fail_with(JobStatus::Canceled, "canceled");
                self.repos.jobs.update(&job).await?;
                self.finalize(&job).await?;
                continue;
            }

            match self.injector.state(&job).await? {
                DependencyState::Ready => {}
                DependencyState::Pending => continue,
                DependencyState::Failed { job_id } => {
                    self.fail_dependent(&mut job, DEPENDENCY_FAILED, job_id)
                        .await?;
                    report.failed_dependents.push(job.id);
                    continue;
                }
                DependencyState::Canceled { job_id } => {
                    self.fail_dependent(&mut job, DEPENDENCY_CANCELED, job_id)
                        .await?;
                    report.failed_dependents.push(job.id);
                    continue;
                }
            }

            if let Some(blocker) = first_blocker(&job, &admitted) {
                StructuredLogger::log_job_blocked(job.id, blocker.id);
                report.blocked.push(job.id);
                continue;
            }

            let impact = self.impact_of(&job).await?;
            if !ledger.fits(impact) {
                debug!(
                    "作业 {} 占用 {} 超出剩余容量 {}",
                    job.id,
                    impact,
                    ledger.remaining()
                );
                continue;
            }

            self.promote(&mut job).await?;
            ledger.occupy(impact);
            StructuredLogger::log_job_dispatched(job.id, impact, ledger.remaining());
            report.promoted.push(job.id);
            admitted.push(job);
        }

        report.capacity_remaining = ledger.remaining();
        self.metrics.record_scheduler_cycle(
            started.elapsed().as_secs_f64(),
            ledger.remaining(),
            admitted.len(),
        );
        if !report.promoted.is_empty() || !report.harvested.is_empty() {
            info!(
                "调度周期完成: 收尾 {} 个，放行 {} 个，阻塞 {} 个",
                report.harvested.len(),
                report.promoted.len(),
                report.blocked.len()
            );
        }
        Ok(report)
    }

    async fn impact_of(&self, job: &UnifiedJob) -> ConductorResult<i64> {
        let hosts = match (job.kind(), job.inventory_id()) {
            (JobKind::Job, Some(inventory_id)) => {
                self.repos.inventories.count_hosts(inventory_id).await?
            }
            _ => 0,
        };
        Ok(task_impact(job, hosts))
    }

    async fn promote(&self, job: &mut UnifiedJob) -> ConductorResult<()> {
        job.update_status(JobStatus::Running);
        self.repos.jobs.update(job).await?;
        self.queue
            .publish_message(queues::JOBS, &Message::job_dispatch(job.id))
            .await?;
        Ok(())
    }

    /// 前置作业失败或被取消；作业本身已请求取消时记为 canceled
    async fn fail_dependent(
        &self,
        job: &mut UnifiedJob,
        reason: &str,
        dependency_id: i64,
    ) -> ConductorResult<()> {
        if reason == DEPENDENCY_CANCELED && job.cancel_flag {
            job.fail_with(JobStatus::Canceled, "canceled");
        } else {
            job.result_traceback = ConductorError::DependencyFailed(format!(
                "{} (job {})",
                reason, dependency_id
            ))
            .to_string();
            job.fail_with(JobStatus::Error, reason);
        }
        self.repos.jobs.update(job).await?;

        let line = format!("{} (job {})\n", job.job_explanation, dependency_id);
        self.repos.jobs.append_stdout(job.id, &line).await?;
        self.ingestor
            .ingest(job.id, EventPayload::verbose(0, line, 0, 1))
            .await?;
        warn!("作业 {} 的前置作业 {} 未成功: {}", job.id, dependency_id, reason);
        self.finalize(job).await
    }

    /// 处理 worker 报告的完成消息
    async fn harvest(&self) -> ConductorResult<Vec<i64>> {
        let messages = self.queue.consume_messages(queues::SCHEDULER).await?;
        let mut harvested = Vec::new();
        for message in messages {
            let job_id = match message.message_type {
                MessageType::JobCompleted { job_id, .. } => job_id,
                other => {
                    warn!("调度队列收到无法处理的消息: {:?}", other);
                    continue;
                }
            };
            match self.repos.jobs.get_by_id(job_id).await? {
                Some(job) if job.status.is_finished() => {
                    self.finalize(&job).await?;
                    harvested.push(job_id);
                }
                Some(job) => warn!("作业 {} 报告结束但状态为 {}", job_id, job.status),
                None => warn!("已结束的作业 {} 不存在", job_id),
            }
        }
        Ok(harvested)
    }

    /// 作业结束后的收尾：模板记录、通知、清单重算
    pub async fn finalize(&self, job: &UnifiedJob) -> ConductorResult<()> {
        let finished_at = job.finished_at.unwrap_or_else(Utc::now);
        if let Some(template_id) = job.template_id {
            if let Some(mut template) = self.repos.templates.get_by_id(template_id).await? {
                template.record_job_finished(finished_at, job.failed);
                self.repos.templates.update(&template).await?;
            }
        }

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(job).await {
                warn!("通知 {} 发送失败: {}", notifier.name(), e);
            }
        }

        if matches!(job.kind(), JobKind::Job | JobKind::InventoryUpdate) {
            if let Some(inventory_id) = job.inventory_id() {
                let started = Instant::now();
                self.inventory.update_computed_fields(inventory_id).await?;
                self.metrics
                    .record_inventory_recompute(started.elapsed().as_secs_f64());
            }
        }

        self.ingestor.finish(job.id);
        self.metrics.record_job_finished(
            job.kind().as_str(),
            job.status.as_str(),
            job.elapsed_seconds(),
        );
        StructuredLogger::log_job_finished(
            job.id,
            job.status.as_str(),
            job.finished_at,
            &job.job_explanation,
        );
        Ok(())
    }
}
