use std::sync::Arc;
use std::time::Duration;

use conductor_core::models::{queues, JobStatus, Message, MessageType};
use conductor_core::{ConductorError, ConductorResult, MessageQueue, Repositories};
use conductor_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::executor::JobExecutor;

const MAX_STATUS_UPDATE_RETRIES: u32 = 3;

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    worker_id: String,
    queue: Arc<dyn MessageQueue>,
    executor: Arc<JobExecutor>,
    repos: Repositories,
    max_concurrent_jobs: usize,
    poll_interval_ms: u64,
    hostname: String,
    metrics: Option<Arc<MetricsCollector>>,
}

impl WorkerServiceBuilder {
    /// 创建新的构建器
    pub fn new(
        worker_id: String,
        queue: Arc<dyn MessageQueue>,
        executor: Arc<JobExecutor>,
        repos: Repositories,
    ) -> Self {
        Self {
            worker_id,
            queue,
            executor,
            repos,
            max_concurrent_jobs: 4,
            poll_interval_ms: 500,
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
            metrics: None,
        }
    }

    /// 设置最大并发作业数
    pub fn max_concurrent_jobs(mut self, max_concurrent_jobs: usize) -> Self {
        self.max_concurrent_jobs = max_concurrent_jobs.max(1);
        self
    }

    /// 设置轮询间隔
    pub fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// 设置主机名，作为作业的执行节点
    pub fn hostname(mut self, hostname: String) -> Self {
        self.hostname = hostname;
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 构建WorkerService
    pub fn build(self) -> WorkerService {
        WorkerService {
            worker_id: self.worker_id,
            queue: self.queue,
            executor: self.executor,
            repos: self.repos,
            max_concurrent_jobs: self.max_concurrent_jobs,
            poll_interval_ms: self.poll_interval_ms,
            hostname: self.hostname,
            metrics: self.metrics,
        }
    }
}

/// Worker服务
///
/// 从 jobs 队列领取调度器放行的作业并执行，结束后把最终状态写回
/// 作业记录，再通过 scheduler 队列通知调度器收尾。
#[derive(Clone)]
pub struct WorkerService {
    worker_id: String,
    queue: Arc<dyn MessageQueue>,
    executor: Arc<JobExecutor>,
    repos: Repositories,
    max_concurrent_jobs: usize,
    poll_interval_ms: u64,
    hostname: String,
    metrics: Option<Arc<MetricsCollector>>,
}

impl WorkerService {
    /// 创建构建器
    pub fn builder(
        worker_id: String,
        queue: Arc<dyn MessageQueue>,
        executor: Arc<JobExecutor>,
        repos: Repositories,
    ) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(worker_id, queue, executor, repos)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// 主循环，收到停止信号后等待正在执行的作业结束
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> ConductorResult<()> {
        self.queue.create_queue(queues::JOBS).await?;
        self.queue.create_queue(queues::SCHEDULER).await?;
        info!(
            "Worker {} 启动: 主机 {}, 最大并发 {}, 轮询间隔 {}ms",
            self.worker_id, self.hostname, self.max_concurrent_jobs, self.poll_interval_ms
        );

        let slots = Arc::new(Semaphore::new(self.max_concurrent_jobs));
        let poll = Duration::from_millis(self.poll_interval_ms);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Worker {} 收到停止信号", self.worker_id);
                    break;
                }
                permit = slots.clone().acquire_owned() => {
                    let permit = permit
                        .map_err(|e| ConductorError::Internal(format!("并发槽位不可用: {e}")))?;
                    match self.queue.receive_message(queues::JOBS, poll).await {
                        Ok(Some(message)) => {
                            let MessageType::JobDispatch { job_id } = message.message_type else {
                                warn!("jobs 队列收到无法处理的消息: {:?}", message.message_type);
                                continue;
                            };
                            let service = self.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = service.process_job(job_id).await {
                                    StructuredLogger::log_system_error("worker", "process_job", &e);
                                }
                            });
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!("领取作业失败: {}", e);
                            tokio::time::sleep(poll).await;
                        }
                    }
                }
            }
        }

        let running = self.max_concurrent_jobs - slots.available_permits();
        if running > 0 {
            info!("等待 {} 个正在执行的作业结束", running);
        }
        let _all = slots
            .acquire_many(self.max_concurrent_jobs as u32)
            .await
            .map_err(|e| ConductorError::Internal(format!("并发槽位不可用: {e}")))?;
        info!("Worker {} 已停止", self.worker_id);
        Ok(())
    }

    /// 执行单个作业并写回最终状态
    #[instrument(skip(self), fields(worker.id = %self.worker_id))]
    pub async fn process_job(&self, job_id: i64) -> ConductorResult<JobStatus> {
        let mut job = self
            .repos
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| ConductorError::not_found("作业", job_id))?;
        if job.status != JobStatus::Running {
            warn!("作业 {} 状态为 {}，跳过执行", job_id, job.status);
            return Ok(job.status);
        }

        job.execution_node = Some(self.hostname.clone());
        self.repos.jobs.update(&job).await?;
        StructuredLogger::log_job_started(job.id, job.kind().as_str(), &self.hostname);

        let outcome = self.executor.execute(&job).await;

        // 执行期间输出与取消标记有变化，重新读取
        let mut job = self
            .repos
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| ConductorError::not_found("作业", job_id))?;
        job.result_traceback = outcome.traceback;
        job.fail_with(outcome.status, outcome.explanation);
        self.repos.jobs.update(&job).await?;

        self.publish_completion(job.id, job.status).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_job_finished(
                job.kind().as_str(),
                job.status.as_str(),
                job.elapsed_seconds(),
            );
        }
        StructuredLogger::log_job_finished(
            job.id,
            job.status.as_str(),
            job.finished_at,
            &job.job_explanation,
        );
        Ok(job.status)
    }

    /// 通知调度器，失败时指数退避重试
    async fn publish_completion(&self, job_id: i64, status: JobStatus) {
        let message = Message::job_completed(job_id, status);
        let mut retry_count = 0;

        while retry_count < MAX_STATUS_UPDATE_RETRIES {
            match self.queue.publish_message(queues::SCHEDULER, &message).await {
                Ok(()) => {
                    debug!(
                        "完成通知发送成功: job_id={}, status={}, retry_count={}",
                        job_id, status, retry_count
                    );
                    return;
                }
                Err(e) => {
                    retry_count += 1;
                    error!(
                        "发送完成通知失败 (重试 {}/{}): job_id={}, error={}",
                        retry_count, MAX_STATUS_UPDATE_RETRIES, job_id, e
                    );
                    if retry_count < MAX_STATUS_UPDATE_RETRIES {
                        let delay = Duration::from_millis(100 * (1 << retry_count));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
