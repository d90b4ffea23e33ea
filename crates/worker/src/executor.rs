//! 单个作业的执行
//!
//! 生成执行器命令，经沙箱包装后启动子进程，把标准输出交给多路解析器，
//! 解析出的事件写入事件表，文本追加到作业输出。执行期间轮询取消标记，
//! 取消后超过期限仍未退出则强制结束。

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use conductor_core::config::{SandboxConfig, WorkerConfig};
use conductor_core::models::{
    InventoryUpdateFields, JobDetails, JobKind, JobStatus, SystemJobFields, UnifiedJob,
};
use conductor_core::{ConductorError, ConductorResult, Repositories};
use conductor_domain::{EventIngestor, EventPayload, InventoryService, Vault};
use serde_json::Value;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::inventory_import::InventoryImporter;
use crate::output::{OutputMultiplexer, Redactor};
use crate::runner::{CommandBuilder, RunnerCommand};
use crate::sandbox::SandboxLauncher;
use crate::system_jobs::SystemJobRunner;

const READ_CHUNK: usize = 8 * 1024;

/// 取消超时的说明
pub const CANCEL_TIMEOUT: &str = "cancel timeout";

/// 执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: JobStatus,
    pub explanation: String,
    pub traceback: String,
}

impl ExecutionOutcome {
    fn new(status: JobStatus) -> Self {
        Self {
            status,
            explanation: String::new(),
            traceback: String::new(),
        }
    }

    fn canceled() -> Self {
        Self {
            status: JobStatus::Canceled,
            explanation: "canceled".to_string(),
            traceback: String::new(),
        }
    }

    fn error(explanation: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            explanation: explanation.into(),
            traceback: String::new(),
        }
    }

    fn with_traceback(mut self, traceback: String) -> Self {
        self.traceback = traceback;
        self
    }
}

/// 子进程结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Exited(ExitStatus),
    Canceled,
    CancelTimeout,
}

pub struct JobExecutor {
    repos: Repositories,
    builder: CommandBuilder,
    sandbox: SandboxLauncher,
    ingestor: Arc<EventIngestor>,
    importer: InventoryImporter,
    system_jobs: SystemJobRunner,
    config: WorkerConfig,
}

impl JobExecutor {
    pub fn new(
        repos: Repositories,
        vault: Arc<Vault>,
        ingestor: Arc<EventIngestor>,
        inventory: Arc<InventoryService>,
        config: WorkerConfig,
        sandbox: SandboxConfig,
    ) -> Self {
        let builder = CommandBuilder::new(repos.clone(), vault, config.clone())
            .with_runner_venv(sandbox.runner_venv.clone());
        Self {
            importer: InventoryImporter::new(repos.inventories.clone(), inventory),
            system_jobs: SystemJobRunner::new(repos.maintenance.clone()),
            sandbox: SandboxLauncher::new(sandbox, &config),
            builder,
            ingestor,
            repos,
            config,
        }
    }

    /// 执行作业并给出最终状态，执行中的错误都折算为 `error`
    #[instrument(skip(self, job), fields(job.id = job.id, job.kind = job.kind().as_str()))]
    pub async fn execute(&self, job: &UnifiedJob) -> ExecutionOutcome {
        if self.cancel_requested(job.id).await {
            info!("作业 {} 在启动前已被取消", job.id);
            return ExecutionOutcome::canceled();
        }

        let result = match &job.details {
            JobDetails::SystemJob(fields) => self.run_system_job(job.id, fields).await,
            _ => self.run_external(job).await,
        };

        if let Err(e) = self.ingestor.propagate_flags(job.id).await {
            warn!("作业 {} 事件标记传播失败: {}", job.id, e);
        }
        self.ingestor.finish(job.id);

        result.unwrap_or_else(|e| {
            error!("作业 {} 执行出错: {}", job.id, e);
            ExecutionOutcome::error(e.to_string()).with_traceback(format!("{e:?}"))
        })
    }

    async fn cancel_requested(&self, job_id: i64) -> bool {
        self.repos
            .jobs
            .is_cancel_requested(job_id)
            .await
            .unwrap_or_else(|e| {
                warn!("读取作业 {} 取消标记失败: {}", job_id, e);
                false
            })
    }

    async fn run_system_job(
        &self,
        job_id: i64,
        fields: &SystemJobFields,
    ) -> ConductorResult<ExecutionOutcome> {
        let report = self.system_jobs.run(fields).await?;
        let mut mux = OutputMultiplexer::default();
        let note = mux.note(&report.summary());
        self.persist(job_id, vec![note]).await;
        Ok(ExecutionOutcome::new(JobStatus::Successful))
    }

    async fn run_external(&self, job: &UnifiedJob) -> ConductorResult<ExecutionOutcome> {
        let command = self.builder.build(job).await?;
        let wrapped = self
            .sandbox
            .wrap(&command.command, &command.cwd, command.private_data_dir());

        let mut mux = OutputMultiplexer::new(Redactor::new(command.secrets.iter().cloned()));
        if let Some(warning) = &wrapped.warning {
            let note = mux.note(warning);
            self.persist(job.id, vec![note]).await;
        }

        let mut child = Command::new(&wrapped.program)
            .args(&wrapped.args)
            .current_dir(&command.cwd)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ConductorError::Runner(format!("无法启动执行器 {}: {e}", wrapped.program))
            })?;
        info!("作业 {} 执行器已启动, pid={:?}", job.id, child.id());

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            if let Some(stderr) = stderr {
                if let Err(e) = BufReader::new(stderr).read_to_string(&mut text).await {
                    debug!("读取执行器错误输出失败: {}", e);
                }
            }
            text
        });

        let termination = self.supervise(job.id, &mut child, &mut mux).await?;
        let mut rest = mux.finish();
        if matches!(termination, Termination::Canceled | Termination::CancelTimeout) {
            // 中途取消的作业没有 stats，按已有结果补发，主机汇总依赖它
            rest.extend(mux.final_stats());
        }
        self.persist(job.id, rest).await;
        let traceback = stderr_task.await.unwrap_or_default();

        let outcome = match termination {
            Termination::CancelTimeout => ExecutionOutcome::error(CANCEL_TIMEOUT),
            Termination::Canceled => ExecutionOutcome::canceled(),
            Termination::Exited(status) => classify_exit(job.kind(), status, mux.saw_stats()),
        };
        let outcome = outcome.with_traceback(traceback);

        if outcome.status == JobStatus::Successful {
            if let JobDetails::InventoryUpdate(fields) = &job.details {
                self.import_inventory(fields, &command).await?;
            }
        }
        Ok(outcome)
    }

    /// 读取输出直到子进程结束，期间处理取消
    async fn supervise(
        &self,
        job_id: i64,
        child: &mut Child,
        mux: &mut OutputMultiplexer,
    ) -> ConductorResult<Termination> {
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConductorError::Runner("无法读取执行器输出".to_string()))?;
        let mut buf = vec![0u8; READ_CHUNK];
        let mut stdout_open = true;

        let mut ticker = interval(Duration::from_millis(
            self.config.cancel_poll_interval_ms.max(10),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cancel_deadline: Option<Instant> = None;
        let mut killed = false;

        loop {
            tokio::select! {
                read = stdout.read(&mut buf), if stdout_open => match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => {
                        let events = mux.feed(&buf[..n]);
                        self.persist(job_id, events).await;
                    }
                    Err(e) => {
                        warn!("读取作业 {} 输出失败: {}", job_id, e);
                        stdout_open = false;
                    }
                },
                _ = ticker.tick() => {
                    if cancel_deadline.is_none() && self.cancel_requested(job_id).await {
                        info!("作业 {} 收到取消请求，终止执行器", job_id);
                        terminate(job_id, child);
                        cancel_deadline = Some(
                            Instant::now() + Duration::from_secs(self.config.cancel_timeout_seconds),
                        );
                    }
                    if let Some(deadline) = cancel_deadline {
                        if !killed && Instant::now() >= deadline {
                            warn!("作业 {} 取消超时，强制结束执行器", job_id);
                            if let Err(e) = child.start_kill() {
                                warn!("强制结束作业 {} 失败: {}", job_id, e);
                            }
                            killed = true;
                        }
                    }
                }
            }

            if stdout_open {
                continue;
            }
            if let Some(status) = child.try_wait()? {
                debug!("作业 {} 执行器退出: {}", job_id, status);
                return Ok(match (cancel_deadline, killed) {
                    (_, true) => Termination::CancelTimeout,
                    (Some(_), false) => Termination::Canceled,
                    (None, false) => Termination::Exited(status),
                });
            }
        }
    }

    /// 写入事件并追加输出文本
    ///
    /// 无法写入的事件退化为 verbose，单个事件失败不影响后续。
    async fn persist(&self, job_id: i64, events: Vec<EventPayload>) {
        if events.is_empty() {
            return;
        }
        let mut text = String::new();
        for payload in events {
            if let Some(stdout) = &payload.stdout {
                text.push_str(stdout);
            }
            let fallback = EventPayload::verbose(
                payload.counter.unwrap_or_default(),
                payload.stdout.clone().unwrap_or_default(),
                payload.start_line.unwrap_or_default(),
                payload.end_line.unwrap_or_default(),
            );
            let event = payload.event.clone();
            if let Err(e) = self.ingestor.ingest(job_id, payload).await {
                warn!("作业 {} 事件 {} 写入失败，按普通输出保存: {}", job_id, event, e);
                if let Err(e) = self.ingestor.ingest(job_id, fallback).await {
                    warn!("作业 {} 事件写入失败: {}", job_id, e);
                }
            }
        }
        if !text.is_empty() {
            if let Err(e) = self.repos.jobs.append_stdout(job_id, &text).await {
                warn!("作业 {} 输出追加失败: {}", job_id, e);
            }
        }
    }

    async fn import_inventory(
        &self,
        fields: &InventoryUpdateFields,
        command: &RunnerCommand,
    ) -> ConductorResult<()> {
        let path = command.inventory_output();
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ConductorError::Runner(format!("无法读取清单同步结果 {}: {e}", path.display()))
        })?;
        let data: Value = serde_json::from_str(&raw)?;
        self.importer.import(fields, &data).await?;
        Ok(())
    }
}

/// 发送 SIGTERM，给执行器清理的机会
fn terminate(job_id: i64, child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    #[cfg(unix)]
    {
        match std::process::Command::new("kill").arg(pid.to_string()).output() {
            Ok(output) if output.status.success() => {
                debug!("已向作业 {} 的执行器发送终止信号, pid={}", job_id, pid)
            }
            Ok(output) => warn!(
                "终止作业 {} 的执行器失败: pid={}, error={}",
                job_id,
                pid,
                String::from_utf8_lossy(&output.stderr)
            ),
            Err(e) => warn!("执行kill命令失败: job_id={}, pid={}, error={}", job_id, pid, e),
        }
    }
    #[cfg(not(unix))]
    {
        debug!("当前平台不支持发送终止信号, job_id={}, pid={}", job_id, pid);
    }
}

/// 根据退出码判定状态
///
/// playbook 作业非零退出时，出现过 stats 事件说明 playbook 正常跑完但有失败，
/// 记为 `failed`；否则是执行器自身出错，记为 `error`。
fn classify_exit(kind: JobKind, status: ExitStatus, saw_stats: bool) -> ExecutionOutcome {
    match status.code() {
        Some(0) => ExecutionOutcome::new(JobStatus::Successful),
        Some(code) if kind == JobKind::Job && !saw_stats => {
            ExecutionOutcome::error(ConductorError::Runner(format!("执行器退出码 {code}")).to_string())
        }
        Some(code) => ExecutionOutcome {
            status: JobStatus::Failed,
            explanation: format!("执行器退出码 {code}"),
            traceback: String::new(),
        },
        None => ExecutionOutcome::error(
            ConductorError::Runner("执行器被信号终止".to_string()).to_string(),
        ),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn exit(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    #[test]
    fn test_classify_exit() {
        assert_eq!(
            classify_exit(JobKind::Job, exit(0), false).status,
            JobStatus::Successful
        );
        assert_eq!(
            classify_exit(JobKind::Job, exit(2), true).status,
            JobStatus::Failed
        );

        let runner_error = classify_exit(JobKind::Job, exit(1), false);
        assert_eq!(runner_error.status, JobStatus::Error);
        assert!(runner_error.explanation.contains("退出码 1"));

        assert_eq!(
            classify_exit(JobKind::ProjectUpdate, exit(1), false).status,
            JobStatus::Failed
        );
        // SIGKILL
        assert_eq!(
            classify_exit(JobKind::Job, ExitStatus::from_raw(9), false).status,
            JobStatus::Error
        );
    }
}
